use std::path::PathBuf;

use thiserror::Error;

/// Fatal conditions raised while preparing a dataset.
///
/// Everything is surfaced through `anyhow`; match on these with
/// `err.downcast_ref::<PrepError>()`.
#[derive(Debug, Error, PartialEq)]
pub enum PrepError {
    #[error("sequence `{0}` not found in sequence annotations")]
    MissingSequence(String),

    #[error("unsupported camera model: {0}")]
    UnsupportedCameraModel(String),

    #[error("invalid split `{0}`, expected `train` or `test`")]
    InvalidSplit(String),

    #[error("requested {requested} frames but only {available} are annotated")]
    LengthExceedsAvailable { requested: usize, available: usize },

    #[error("empty sequence")]
    EmptySequence,

    #[error("frame lists are not aligned: {what} has {actual} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("stride must be at least 1")]
    InvalidStride,

    #[error("no segmentation model available to synthesize mask for {0}")]
    MissingSegmentationModel(PathBuf),

    #[error("segmentation model not found: {0}")]
    SegmentationModelNotFound(PathBuf),

    #[error("malformed annotation in {path}: {reason}")]
    MalformedAnnotation { path: PathBuf, reason: String },
}
