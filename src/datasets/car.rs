use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nalgebra::{Matrix3, Matrix4};

use crate::colmap::{ColmapTextReader, SparseModelReader};
use crate::config::ConversionConfig;
use crate::error::PrepError;
use crate::image_loader::{alpha_mask, ImageLoader};
use crate::output::frame_stem;
use crate::processor::{DatasetAdapter, DatasetKind};
use crate::segmentation::MaskPredictor;

#[derive(Debug, Clone)]
struct CarFrame {
    image: PathBuf,
    pose: Matrix4<f64>,
    intrinsics: Matrix3<f64>,
}

/// Custom capture reconstructed with COLMAP.
///
/// ```text
/// <root>/images/*.png|jpg
/// <root>/sparse/0/{cameras,images,points3D}.txt   (or <root>/sparse/)
/// <root>/masks/<stem>.png                         (created when missing)
/// ```
pub struct CarAdapter {
    config: ConversionConfig,
    frames: Vec<CarFrame>,
    mask_dir: PathBuf,
    predictor: Option<Box<dyn MaskPredictor>>,
}

impl CarAdapter {
    pub fn new(config: ConversionConfig) -> Result<Self> {
        Self::with_reader(config, &ColmapTextReader)
    }

    pub fn with_reader(config: ConversionConfig, reader: &dyn SparseModelReader) -> Result<Self> {
        config.validate()?;

        let sparse_dir = Self::sparse_dir(&config.data_path);
        let model = reader.read_sparse_model(&sparse_dir)?;
        log::info!(
            "Sparse model {}: {} cameras, {} images, {} points",
            sparse_dir.display(),
            model.cameras.len(),
            model.images.len(),
            model.points.len()
        );

        let mut images = model.images;
        images.sort_by(|a, b| a.name.cmp(&b.name));

        let image_dir = config.data_path.join("images");
        let mut frames = Vec::with_capacity(images.len());
        for image in &images {
            let camera = model.cameras.get(&image.camera_id).ok_or_else(|| {
                anyhow::Error::from(PrepError::MalformedAnnotation {
                    path: sparse_dir.join("images.txt"),
                    reason: format!("image {} references unknown camera {}", image.name, image.camera_id),
                })
            })?;

            frames.push(CarFrame {
                image: image_dir.join(&image.name),
                pose: image.world_to_camera(),
                intrinsics: camera.intrinsics()?,
            });
        }
        config.check_length(frames.len())?;

        let mask_dir = config.data_path.join("masks");
        Ok(Self {
            config,
            frames,
            mask_dir,
            predictor: None,
        })
    }

    /// Model used for frames that have neither a mask file nor an alpha channel.
    pub fn with_mask_predictor(mut self, predictor: Box<dyn MaskPredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    fn sparse_dir(root: &Path) -> PathBuf {
        let nested = root.join("sparse").join("0");
        if nested.is_dir() {
            nested
        } else {
            root.join("sparse")
        }
    }

    fn synthesize_mask(&mut self, image_path: &Path, mask_path: &Path) -> Result<()> {
        let image = ImageLoader::load(image_path)?;

        let mask = if ImageLoader::has_alpha(&image) {
            alpha_mask(&image)
        } else {
            let predictor = self
                .predictor
                .as_mut()
                .ok_or_else(|| PrepError::MissingSegmentationModel(image_path.to_path_buf()))?;
            predictor.predict_mask(&image.to_rgb8())?
        };

        mask.save(mask_path)
            .with_context(|| format!("Failed to write mask: {}", mask_path.display()))?;
        Ok(())
    }
}

impl DatasetAdapter for CarAdapter {
    fn kind(&self) -> DatasetKind {
        DatasetKind::Car
    }

    fn config(&self) -> &ConversionConfig {
        &self.config
    }

    fn load_rgb_files(&mut self) -> Result<Vec<PathBuf>> {
        Ok(self.frames.iter().map(|f| f.image.clone()).collect())
    }

    fn load_mask_files(&mut self) -> Result<Option<Vec<PathBuf>>> {
        fs::create_dir_all(&self.mask_dir)
            .with_context(|| format!("Failed to create mask directory: {}", self.mask_dir.display()))?;

        let images: Vec<PathBuf> = self.frames.iter().map(|f| f.image.clone()).collect();
        let mut masks = Vec::with_capacity(images.len());
        let mut synthesized = 0;
        for image in &images {
            let mask_path = self.mask_dir.join(format!("{}.png", frame_stem(image)?));
            if !mask_path.exists() {
                self.synthesize_mask(image, &mask_path)?;
                synthesized += 1;
            }
            masks.push(mask_path);
        }

        if synthesized > 0 {
            log::info!("Synthesized {} missing masks", synthesized);
        }
        Ok(Some(masks))
    }

    fn load_poses(&mut self) -> Result<Option<Vec<Matrix4<f64>>>> {
        Ok(Some(self.frames.iter().map(|f| f.pose).collect()))
    }

    fn load_intrinsics(&mut self) -> Result<Option<Vec<Matrix3<f64>>>> {
        Ok(Some(self.frames.iter().map(|f| f.intrinsics).collect()))
    }
}
