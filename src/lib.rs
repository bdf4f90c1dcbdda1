pub mod colmap;
pub mod config;
pub mod datasets;
pub mod error;
pub mod geometry;
pub mod image_loader;
pub mod output;
pub mod processor;
pub mod segmentation;

// Re-export commonly used types
pub use config::{ConversionConfig, JobFile, JobSpec, Split};
pub use error::PrepError;
pub use processor::{ConversionSummary, DatasetAdapter, DatasetKind, FramePlan, LoadedFrames, Processor};
