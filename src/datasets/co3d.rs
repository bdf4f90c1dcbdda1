use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::ConversionConfig;
use crate::error::PrepError;
use crate::geometry::{ndc_to_pixel_intrinsics, CoordinateConverter};
use crate::processor::{DatasetAdapter, DatasetKind};

pub const FRAME_ANNOTATIONS: &str = "frame_annotations.jgz";
pub const SEQUENCE_ANNOTATIONS: &str = "sequence_annotations.jgz";

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceAnnotation {
    pub sequence_name: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageAnnotation {
    pub path: String,
    /// `[height, width]`
    pub size: [u32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaskAnnotation {
    pub path: String,
}

/// PyTorch3D camera, NDC intrinsics
#[derive(Debug, Clone, Deserialize)]
pub struct ViewpointAnnotation {
    #[serde(rename = "R")]
    pub r: [[f64; 3]; 3],
    #[serde(rename = "T")]
    pub t: [f64; 3],
    pub focal_length: [f64; 2],
    pub principal_point: [f64; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameAnnotation {
    pub sequence_name: String,
    #[serde(default)]
    pub frame_number: Option<u64>,
    pub image: ImageAnnotation,
    pub mask: MaskAnnotation,
    pub viewpoint: ViewpointAnnotation,
}

impl FrameAnnotation {
    pub fn pose(&self) -> Matrix4<f64> {
        let r = &self.viewpoint.r;
        let rotation = Matrix3::new(
            r[0][0], r[0][1], r[0][2],
            r[1][0], r[1][1], r[1][2],
            r[2][0], r[2][1], r[2][2],
        );
        let translation = Vector3::from(self.viewpoint.t);
        CoordinateConverter::pytorch3d_to_opencv(&rotation, &translation)
    }

    pub fn intrinsics(&self) -> Matrix3<f64> {
        let size = self.image.size;
        ndc_to_pixel_intrinsics(
            self.viewpoint.focal_length,
            self.viewpoint.principal_point,
            (size[0], size[1]),
        )
    }
}

/// Read a gzip-compressed JSON document
pub fn read_jgz<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open annotation file: {}", path.display()))?;
    let reader = BufReader::new(GzDecoder::new(file));
    serde_json::from_reader(reader)
        .with_context(|| format!("Failed to parse annotation file: {}", path.display()))
}

/// CO3D: one sequence of one category.
///
/// Layout: `<root>/<category>/{sequence,frame}_annotations.jgz`, with image
/// and mask paths in the annotations relative to `<root>`.
pub struct Co3dAdapter {
    config: ConversionConfig,
    sequence_name: String,
    category: String,
    metadata: Vec<FrameAnnotation>,
}

impl Co3dAdapter {
    /// Parses both annotation files right away.
    pub fn new(config: ConversionConfig, sequence_name: &str, category: &str) -> Result<Self> {
        config.validate()?;

        let category_dir = config.data_path.join(category);
        let metadata = Self::parse_annotations(&category_dir, sequence_name)?;
        config.check_length(metadata.len())?;

        log::info!("Loaded {} frames for sequence {}", metadata.len(), sequence_name);

        Ok(Self {
            config,
            sequence_name: sequence_name.to_string(),
            category: category.to_string(),
            metadata,
        })
    }

    fn parse_annotations(category_dir: &Path, sequence_name: &str) -> Result<Vec<FrameAnnotation>> {
        let sequences: Vec<SequenceAnnotation> =
            read_jgz(&category_dir.join(SEQUENCE_ANNOTATIONS))?;

        if !sequences.iter().any(|s| s.sequence_name == sequence_name) {
            return Err(PrepError::MissingSequence(sequence_name.to_string()).into());
        }
        log::info!("Found sequence info for {}", sequence_name);

        let frames: Vec<FrameAnnotation> = read_jgz(&category_dir.join(FRAME_ANNOTATIONS))?;
        Ok(frames
            .into_iter()
            .filter(|f| f.sequence_name == sequence_name)
            .collect())
    }

    pub fn sequence_name(&self) -> &str {
        &self.sequence_name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn metadata(&self) -> &[FrameAnnotation] {
        &self.metadata
    }
}

impl DatasetAdapter for Co3dAdapter {
    fn kind(&self) -> DatasetKind {
        DatasetKind::Co3d
    }

    fn config(&self) -> &ConversionConfig {
        &self.config
    }

    fn load_rgb_files(&mut self) -> Result<Vec<PathBuf>> {
        Ok(self
            .metadata
            .iter()
            .map(|f| self.config.data_path.join(&f.image.path))
            .collect())
    }

    fn load_mask_files(&mut self) -> Result<Option<Vec<PathBuf>>> {
        Ok(Some(
            self.metadata
                .iter()
                .map(|f| self.config.data_path.join(&f.mask.path))
                .collect(),
        ))
    }

    fn load_poses(&mut self) -> Result<Option<Vec<Matrix4<f64>>>> {
        Ok(Some(self.metadata.iter().map(FrameAnnotation::pose).collect()))
    }

    fn load_intrinsics(&mut self) -> Result<Option<Vec<Matrix3<f64>>>> {
        Ok(Some(self.metadata.iter().map(FrameAnnotation::intrinsics).collect()))
    }
}
