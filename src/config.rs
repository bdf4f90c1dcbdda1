use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PrepError;

/// Mask pixels above this value count as foreground before inversion.
pub const DEFAULT_MASK_THRESHOLD: u8 = 0;

fn default_stride() -> usize {
    1
}

/// Settings shared by every dataset adapter.
///
/// Fully populated when the adapter is built and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionConfig {
    /// Root of the source dataset
    pub data_path: PathBuf,

    /// Root of the output tree (deleted and recreated on every run)
    pub output_path: PathBuf,

    /// Number of frames to consider; `None` means all of them
    #[serde(default)]
    pub length: Option<usize>,

    /// Sampling interval over the frame list
    #[serde(default = "default_stride")]
    pub stride: usize,

    #[serde(default)]
    pub mask_threshold: u8,
}

impl ConversionConfig {
    pub fn new(data_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            output_path: output_path.into(),
            length: None,
            stride: default_stride(),
            mask_threshold: DEFAULT_MASK_THRESHOLD,
        }
    }

    pub fn with_length(mut self, length: Option<usize>) -> Self {
        self.length = length;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_mask_threshold(mut self, threshold: u8) -> Self {
        self.mask_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(PrepError::InvalidStride.into());
        }
        Ok(())
    }

    /// Check a requested frame count against what the annotations provide.
    pub fn check_length(&self, available: usize) -> Result<()> {
        if let Some(requested) = self.length {
            if requested > available {
                return Err(PrepError::LengthExceedsAvailable {
                    requested,
                    available,
                }
                .into());
            }
            if requested == 0 {
                return Err(PrepError::EmptySequence.into());
            }
        }
        if available == 0 {
            return Err(PrepError::EmptySequence.into());
        }
        Ok(())
    }
}

/// Onepose split; decides both the input directory and the box/mask suffixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }

    /// Ground-truth boxes for train, detector boxes for test
    pub fn box_suffix(&self) -> &'static str {
        match self {
            Split::Train => "-box.txt",
            Split::Test => "-box_fasterrcnn.txt",
        }
    }

    pub fn mask_suffix(&self) -> &'static str {
        match self {
            Split::Train => "-mask.png",
            Split::Test => "-mask_fasterrcnn.png",
        }
    }
}

impl std::str::FromStr for Split {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Split::Train),
            "test" => Ok(Split::Test),
            other => Err(PrepError::InvalidSplit(other.to_string())),
        }
    }
}

/// One conversion in a job file, tagged by dataset kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "dataset", rename_all = "lowercase")]
pub enum JobSpec {
    Co3d {
        #[serde(flatten)]
        config: ConversionConfig,
        sequence_name: String,
        category: String,
    },
    Linemod {
        #[serde(flatten)]
        config: ConversionConfig,
        #[serde(default)]
        object_index: usize,
    },
    Onepose {
        #[serde(flatten)]
        config: ConversionConfig,
        split: Split,
    },
    Car {
        #[serde(flatten)]
        config: ConversionConfig,
        /// ONNX network used for frames without a mask or alpha channel
        #[serde(default)]
        segmentation_model: Option<PathBuf>,
    },
}

/// Batch of conversions run one after another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFile {
    pub jobs: Vec<JobSpec>,
}

impl JobFile {
    /// Load a job file, YAML unless the extension says JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let file: JobFile = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON job file: {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML job file: {}", path.display()))?
        };

        Ok(file)
    }
}
