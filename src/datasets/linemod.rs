use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::ConversionConfig;
use crate::error::PrepError;
use crate::geometry::CoordinateConverter;
use crate::processor::{DatasetAdapter, DatasetKind};

pub const SCENE_CAMERA: &str = "scene_camera.json";
pub const SCENE_GT: &str = "scene_gt.json";

#[derive(Debug, Clone, Deserialize)]
pub struct CameraEntry {
    /// Row-major 3x3 camera matrix
    #[serde(rename = "cam_K")]
    pub cam_k: Vec<f64>,
    #[serde(default)]
    pub depth_scale: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroundTruthEntry {
    /// Row-major model-to-camera rotation
    #[serde(rename = "cam_R_m2c")]
    pub cam_r_m2c: Vec<f64>,
    /// Model-to-camera translation in millimetres
    pub cam_t_m2c: Vec<f64>,
    #[serde(default)]
    pub obj_id: Option<u32>,
}

#[derive(Debug, Clone)]
struct LinemodFrame {
    image_id: u32,
    camera: Matrix3<f64>,
    pose: Matrix4<f64>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read annotation file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse annotation file: {}", path.display()))
}

fn malformed(path: &Path, reason: String) -> anyhow::Error {
    PrepError::MalformedAnnotation {
        path: path.to_path_buf(),
        reason,
    }
    .into()
}

/// LINEMOD scene in BOP layout.
///
/// ```text
/// <scene>/scene_camera.json
/// <scene>/scene_gt.json
/// <scene>/rgb/000000.png
/// <scene>/mask_visib/000000_000000.png   (or mask/)
/// ```
pub struct LinemodAdapter {
    config: ConversionConfig,
    object_index: usize,
    frames: Vec<LinemodFrame>,
    mask_dir: Option<PathBuf>,
}

impl LinemodAdapter {
    pub fn new(config: ConversionConfig, object_index: usize) -> Result<Self> {
        config.validate()?;

        let frames = Self::parse_annotations(&config.data_path, object_index)?;
        config.check_length(frames.len())?;

        let mask_dir = ["mask_visib", "mask"]
            .iter()
            .map(|name| config.data_path.join(name))
            .find(|dir| dir.is_dir());
        if mask_dir.is_none() {
            log::warn!("No mask directory in {}, masks will be skipped", config.data_path.display());
        }

        log::info!("Loaded {} LINEMOD frames", frames.len());

        Ok(Self {
            config,
            object_index,
            frames,
            mask_dir,
        })
    }

    fn parse_annotations(scene: &Path, object_index: usize) -> Result<Vec<LinemodFrame>> {
        let camera_path = scene.join(SCENE_CAMERA);
        let gt_path = scene.join(SCENE_GT);

        let cameras: BTreeMap<String, CameraEntry> = read_json(&camera_path)?;
        let ground_truth: BTreeMap<String, Vec<GroundTruthEntry>> = read_json(&gt_path)?;

        let mut frames = Vec::with_capacity(ground_truth.len());
        for (key, objects) in &ground_truth {
            let image_id: u32 = key
                .parse()
                .map_err(|_| malformed(&gt_path, format!("frame key `{}` is not an index", key)))?;

            let camera = cameras
                .get(key)
                .ok_or_else(|| malformed(&camera_path, format!("no camera for frame {}", key)))?;
            let k = CoordinateConverter::matrix3_from_row_slice(&camera.cam_k)
                .ok_or_else(|| malformed(&camera_path, format!("cam_K of frame {} is not 3x3", key)))?;

            let object = objects.get(object_index).ok_or_else(|| {
                malformed(&gt_path, format!("frame {} has no object #{}", key, object_index))
            })?;
            let rotation = CoordinateConverter::matrix3_from_row_slice(&object.cam_r_m2c)
                .ok_or_else(|| malformed(&gt_path, format!("cam_R_m2c of frame {} is not 3x3", key)))?;
            if object.cam_t_m2c.len() != 3 {
                return Err(malformed(&gt_path, format!("cam_t_m2c of frame {} is not 3-vector", key)));
            }
            let translation = CoordinateConverter::millimeters_to_meters(&Vector3::from_column_slice(
                &object.cam_t_m2c,
            ));

            frames.push(LinemodFrame {
                image_id,
                camera: k,
                pose: CoordinateConverter::compose(&rotation, &translation),
            });
        }

        // JSON keys sort as strings
        frames.sort_by_key(|f| f.image_id);
        Ok(frames)
    }

    pub fn object_index(&self) -> usize {
        self.object_index
    }
}

impl DatasetAdapter for LinemodAdapter {
    fn kind(&self) -> DatasetKind {
        DatasetKind::Linemod
    }

    fn config(&self) -> &ConversionConfig {
        &self.config
    }

    fn load_rgb_files(&mut self) -> Result<Vec<PathBuf>> {
        let rgb_dir = self.config.data_path.join("rgb");
        Ok(self
            .frames
            .iter()
            .map(|f| rgb_dir.join(format!("{:06}.png", f.image_id)))
            .collect())
    }

    fn load_mask_files(&mut self) -> Result<Option<Vec<PathBuf>>> {
        Ok(self.mask_dir.as_ref().map(|dir| {
            self.frames
                .iter()
                .map(|f| dir.join(format!("{:06}_{:06}.png", f.image_id, self.object_index)))
                .collect()
        }))
    }

    fn load_poses(&mut self) -> Result<Option<Vec<Matrix4<f64>>>> {
        Ok(Some(self.frames.iter().map(|f| f.pose).collect()))
    }

    fn load_intrinsics(&mut self) -> Result<Option<Vec<Matrix3<f64>>>> {
        Ok(Some(self.frames.iter().map(|f| f.camera).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_scene(scene: &Path, ids: &[u32]) {
        fs::create_dir_all(scene).unwrap();
        let mut cameras = serde_json::Map::new();
        let mut gt = serde_json::Map::new();
        for id in ids {
            cameras.insert(
                id.to_string(),
                json!({ "cam_K": [572.4, 0.0, 325.3, 0.0, 573.6, 242.0, 0.0, 0.0, 1.0], "depth_scale": 1.0 }),
            );
            gt.insert(
                id.to_string(),
                json!([{
                    "cam_R_m2c": [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
                    "cam_t_m2c": [1000.0, 2000.0, 3000.0],
                    "obj_id": 1
                }]),
            );
        }
        fs::write(scene.join(SCENE_CAMERA), serde_json::Value::Object(cameras).to_string()).unwrap();
        fs::write(scene.join(SCENE_GT), serde_json::Value::Object(gt).to_string()).unwrap();
    }

    #[test]
    fn test_translation_in_meters() {
        let tmp = TempDir::new().unwrap();
        write_scene(tmp.path(), &[0, 1]);

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let mut adapter = LinemodAdapter::new(config, 0).unwrap();
        assert_eq!(adapter.object_index(), 0);

        let pose = adapter.load_poses().unwrap().unwrap()[0];
        assert_relative_eq!(pose[(0, 3)], 1.0);
        assert_relative_eq!(pose[(1, 3)], 2.0);
        assert_relative_eq!(pose[(2, 3)], 3.0);
        assert_relative_eq!(pose[(3, 3)], 1.0);

        let k = adapter.load_intrinsics().unwrap().unwrap()[0];
        assert_relative_eq!(k[(0, 0)], 572.4);
        assert_relative_eq!(k[(1, 2)], 242.0);
    }

    #[test]
    fn test_frames_sorted_numerically() {
        let tmp = TempDir::new().unwrap();
        write_scene(tmp.path(), &[10, 2, 1]);

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let mut adapter = LinemodAdapter::new(config, 0).unwrap();

        let rgb = adapter.load_rgb_files().unwrap();
        let names: Vec<_> = rgb
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["000001.png", "000002.png", "000010.png"]);

        assert!(adapter.load_mask_files().unwrap().is_none());
    }

    #[test]
    fn test_mask_visib_paths() {
        let tmp = TempDir::new().unwrap();
        write_scene(tmp.path(), &[3]);
        fs::create_dir_all(tmp.path().join("mask_visib")).unwrap();

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let mut adapter = LinemodAdapter::new(config, 0).unwrap();

        let masks = adapter.load_mask_files().unwrap().unwrap();
        assert_eq!(masks, vec![tmp.path().join("mask_visib/000003_000000.png")]);
    }

    #[test]
    fn test_mask_dir_fallback() {
        let tmp = TempDir::new().unwrap();
        write_scene(tmp.path(), &[7, 12]);
        fs::create_dir_all(tmp.path().join("mask")).unwrap();

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let mut adapter = LinemodAdapter::new(config, 0).unwrap();

        let masks = adapter.load_mask_files().unwrap().unwrap();
        assert_eq!(
            masks,
            vec![
                tmp.path().join("mask/000007_000000.png"),
                tmp.path().join("mask/000012_000000.png"),
            ]
        );
    }

    #[test]
    fn test_empty_sequence() {
        let tmp = TempDir::new().unwrap();
        write_scene(tmp.path(), &[0]);

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out")).with_length(Some(0));
        let err = LinemodAdapter::new(config, 0).err().unwrap();
        assert_eq!(err.downcast_ref::<PrepError>(), Some(&PrepError::EmptySequence));
    }

    #[test]
    fn test_missing_object_is_malformed() {
        let tmp = TempDir::new().unwrap();
        write_scene(tmp.path(), &[0]);

        let config = ConversionConfig::new(tmp.path(), tmp.path().join("out"));
        let err = LinemodAdapter::new(config, 1).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<PrepError>(),
            Some(PrepError::MalformedAnnotation { .. })
        ));
    }
}
