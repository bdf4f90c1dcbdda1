use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nalgebra::{Matrix3, Matrix4};

use crate::config::{ConversionConfig, Split};
use crate::error::PrepError;
use crate::image_loader::box_mask;
use crate::processor::{DatasetAdapter, DatasetKind};

pub const COLOR_SUFFIX: &str = "-color.png";
pub const POSE_SUFFIX: &str = "-pose.txt";
pub const INTRINSIC_SUFFIX: &str = "-intrinsic.txt";

/// Whitespace-separated numbers from a text file
fn read_numbers(path: &Path) -> Result<Vec<f64>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .split_whitespace()
        .map(|v| v.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid number in {}", path.display()))
}

fn malformed(path: &Path, reason: &str) -> anyhow::Error {
    PrepError::MalformedAnnotation {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
    .into()
}

/// 3x4 or 4x4 row-major pose
pub fn read_pose(path: &Path) -> Result<Matrix4<f64>> {
    let values = read_numbers(path)?;
    match values.len() {
        16 => Ok(Matrix4::from_row_slice(&values)),
        12 => {
            let mut pose = Matrix4::identity();
            for (i, v) in values.iter().enumerate() {
                pose[(i / 4, i % 4)] = *v;
            }
            Ok(pose)
        }
        n => Err(malformed(path, &format!("expected 12 or 16 values, got {}", n))),
    }
}

pub fn read_intrinsics(path: &Path) -> Result<Matrix3<f64>> {
    let values = read_numbers(path)?;
    if values.len() != 9 {
        return Err(malformed(path, &format!("expected 9 values, got {}", values.len())));
    }
    Ok(Matrix3::from_row_slice(&values))
}

/// `x1 y1 x2 y2`
pub fn read_box(path: &Path) -> Result<[f64; 4]> {
    let values = read_numbers(path)?;
    if values.len() < 4 {
        return Err(malformed(path, &format!("expected 4 values, got {}", values.len())));
    }
    Ok([values[0], values[1], values[2], values[3]])
}

/// LINEMOD as packaged for OnePose: one flat directory per split with
/// `<id>-color.png`, `<id>-pose.txt`, `<id>-intrinsic.txt` and the box files.
///
/// Masks are rendered from the boxes and written next to the inputs.
pub struct OneposeAdapter {
    config: ConversionConfig,
    split: Split,
    input_dir: PathBuf,
    /// File prefixes (`<id>`) in numeric order
    frame_ids: Vec<String>,
}

impl OneposeAdapter {
    pub fn new(config: ConversionConfig, split: Split) -> Result<Self> {
        config.validate()?;

        let input_dir = config.data_path.join(split.as_str());
        let frame_ids = Self::discover_frames(&input_dir)?;
        config.check_length(frame_ids.len())?;

        log::info!("Found {} {} frames in {}", frame_ids.len(), split.as_str(), input_dir.display());

        Ok(Self {
            config,
            split,
            input_dir,
            frame_ids,
        })
    }

    /// Like [`OneposeAdapter::new`] with the split given as text
    pub fn from_split_name(config: ConversionConfig, split: &str) -> Result<Self> {
        let split: Split = split.parse()?;
        Self::new(config, split)
    }

    fn discover_frames(input_dir: &Path) -> Result<Vec<String>> {
        let entries = fs::read_dir(input_dir)
            .with_context(|| format!("Failed to read input directory: {}", input_dir.display()))?;

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("Failed to list input directory: {}", input_dir.display()))?;
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(COLOR_SUFFIX)) {
                ids.push(id.to_string());
            }
        }

        ids.sort_by(|a, b| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        });
        Ok(ids)
    }

    fn frame_file(&self, id: &str, suffix: &str) -> PathBuf {
        self.input_dir.join(format!("{}{}", id, suffix))
    }

    pub fn split(&self) -> Split {
        self.split
    }
}

impl DatasetAdapter for OneposeAdapter {
    fn kind(&self) -> DatasetKind {
        DatasetKind::Onepose
    }

    fn config(&self) -> &ConversionConfig {
        &self.config
    }

    fn load_rgb_files(&mut self) -> Result<Vec<PathBuf>> {
        Ok(self
            .frame_ids
            .iter()
            .map(|id| self.frame_file(id, COLOR_SUFFIX))
            .collect())
    }

    fn load_mask_files(&mut self) -> Result<Option<Vec<PathBuf>>> {
        let mut masks = Vec::with_capacity(self.frame_ids.len());
        for id in &self.frame_ids {
            let color = self.frame_file(id, COLOR_SUFFIX);
            let (width, height) = image::image_dimensions(&color)
                .with_context(|| format!("Failed to read image size: {}", color.display()))?;
            let bbox = read_box(&self.frame_file(id, self.split.box_suffix()))?;

            let mask_path = self.frame_file(id, self.split.mask_suffix());
            box_mask(width, height, bbox)
                .save(&mask_path)
                .with_context(|| format!("Failed to write mask: {}", mask_path.display()))?;
            masks.push(mask_path);
        }
        log::info!("Synthesized {} box masks", masks.len());
        log::warn!(
            "Box masks are 0 inside the box; after inversion the boxed object is written as 255 in {}/",
            crate::output::MASKS_DIR
        );
        Ok(Some(masks))
    }

    fn load_poses(&mut self) -> Result<Option<Vec<Matrix4<f64>>>> {
        self.frame_ids
            .iter()
            .map(|id| read_pose(&self.frame_file(id, POSE_SUFFIX)))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    fn load_intrinsics(&mut self) -> Result<Option<Vec<Matrix3<f64>>>> {
        self.frame_ids
            .iter()
            .map(|id| read_intrinsics(&self.frame_file(id, INTRINSIC_SUFFIX)))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    fn write_frame(dir: &Path, id: u32) {
        RgbImage::new(100, 100).save(dir.join(format!("{}{}", id, COLOR_SUFFIX))).unwrap();
        fs::write(
            dir.join(format!("{}{}", id, POSE_SUFFIX)),
            "1 0 0 0.1\n0 1 0 0.2\n0 0 1 0.3\n",
        )
        .unwrap();
        fs::write(
            dir.join(format!("{}{}", id, INTRINSIC_SUFFIX)),
            "572.4 0 325.3\n0 573.6 242.0\n0 0 1\n",
        )
        .unwrap();
        fs::write(dir.join(format!("{}-box.txt", id)), "10 10 50 50\n").unwrap();
        fs::write(dir.join(format!("{}-box_fasterrcnn.txt", id)), "20 20 60 60\n").unwrap();
    }

    fn write_split(root: &Path, split: &str, ids: &[u32]) {
        let dir = root.join(split);
        fs::create_dir_all(&dir).unwrap();
        for id in ids {
            write_frame(&dir, *id);
        }
    }

    #[test]
    fn test_numeric_frame_order() {
        let tmp = TempDir::new().unwrap();
        write_split(tmp.path(), "train", &[10, 2, 1]);

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let mut adapter = OneposeAdapter::new(config, Split::Train).unwrap();

        let rgb = adapter.load_rgb_files().unwrap();
        assert_eq!(rgb[0], tmp.path().join("train/1-color.png"));
        assert_eq!(rgb[2], tmp.path().join("train/10-color.png"));
    }

    #[test]
    fn test_train_masks_from_ground_truth_boxes() {
        let tmp = TempDir::new().unwrap();
        write_split(tmp.path(), "train", &[0]);

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let mut adapter = OneposeAdapter::new(config, Split::Train).unwrap();

        let masks = adapter.load_mask_files().unwrap().unwrap();
        assert_eq!(masks[0], tmp.path().join("train/0-mask.png"));

        let mask = image::open(&masks[0]).unwrap().to_luma8();
        assert_eq!(mask.get_pixel(10, 10)[0], 0);
        assert_eq!(mask.get_pixel(49, 49)[0], 0);
        assert_eq!(mask.get_pixel(50, 50)[0], 255);
        assert_eq!(mask.get_pixel(5, 30)[0], 255);
    }

    #[test]
    fn test_test_split_uses_detector_boxes() {
        let tmp = TempDir::new().unwrap();
        write_split(tmp.path(), "test", &[0]);

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let mut adapter = OneposeAdapter::from_split_name(config, "test").unwrap();
        assert_eq!(adapter.split(), Split::Test);

        let masks = adapter.load_mask_files().unwrap().unwrap();
        assert_eq!(masks[0], tmp.path().join("test/0-mask_fasterrcnn.png"));

        let mask = image::open(&masks[0]).unwrap().to_luma8();
        assert_eq!(mask.get_pixel(15, 15)[0], 255);
        assert_eq!(mask.get_pixel(55, 55)[0], 0);
    }

    #[test]
    fn test_pose_3x4_padded() {
        let tmp = TempDir::new().unwrap();
        write_split(tmp.path(), "train", &[0]);

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let mut adapter = OneposeAdapter::new(config, Split::Train).unwrap();

        let pose = adapter.load_poses().unwrap().unwrap()[0];
        assert_eq!(pose[(2, 3)], 0.3);
        assert_eq!(pose[(3, 3)], 1.0);
        assert_eq!(pose[(3, 0)], 0.0);

        let k = adapter.load_intrinsics().unwrap().unwrap()[0];
        assert_eq!(k[(0, 2)], 325.3);
    }

    #[test]
    fn test_invalid_split() {
        let tmp = TempDir::new().unwrap();
        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let err = OneposeAdapter::from_split_name(config, "val").err().unwrap();
        assert_eq!(
            err.downcast_ref::<PrepError>(),
            Some(&PrepError::InvalidSplit("val".to_string()))
        );
    }

    #[test]
    fn test_split_listing() {
        let tmp = TempDir::new().unwrap();
        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let err = OneposeAdapter::new(config.clone(), Split::Train).err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to read input directory"));

        // Only `-color.png` files name frames
        write_split(tmp.path(), "train", &[4]);
        fs::create_dir_all(tmp.path().join("train/5-color.png.d")).unwrap();
        fs::write(tmp.path().join("train/notes.txt"), "x").unwrap();

        let mut adapter = OneposeAdapter::new(config, Split::Train).unwrap();
        assert_eq!(adapter.load_rgb_files().unwrap(), vec![tmp.path().join("train/4-color.png")]);
    }

    #[test]
    fn test_empty_split() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("test")).unwrap();

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let err = OneposeAdapter::new(config, Split::Test).err().unwrap();
        assert_eq!(err.downcast_ref::<PrepError>(), Some(&PrepError::EmptySequence));
    }
}
