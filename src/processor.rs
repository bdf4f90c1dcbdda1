use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::{Matrix3, Matrix4};

use crate::config::ConversionConfig;
use crate::error::PrepError;
use crate::image_loader::{binarize_inverted, ImageLoader};
use crate::output::{frame_stem, OutputTree};

/// Dataset tag, chosen when the adapter is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Co3d,
    Linemod,
    Onepose,
    Car,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatasetKind::Co3d => "CO3D",
            DatasetKind::Linemod => "LINEMOD",
            DatasetKind::Onepose => "LINEMOD-Onepose",
            DatasetKind::Car => "Car",
        };
        f.write_str(name)
    }
}

/// The four accessors every dataset exposes.
///
/// Lists must be index-aligned: entry `i` of each list describes the same
/// frame. Masks, poses and intrinsics may be absent altogether.
pub trait DatasetAdapter {
    fn kind(&self) -> DatasetKind;

    fn config(&self) -> &ConversionConfig;

    fn load_rgb_files(&mut self) -> Result<Vec<PathBuf>>;

    fn load_mask_files(&mut self) -> Result<Option<Vec<PathBuf>>>;

    fn load_poses(&mut self) -> Result<Option<Vec<Matrix4<f64>>>>;

    fn load_intrinsics(&mut self) -> Result<Option<Vec<Matrix3<f64>>>>;
}

impl<A: DatasetAdapter + ?Sized> DatasetAdapter for Box<A> {
    fn kind(&self) -> DatasetKind {
        (**self).kind()
    }

    fn config(&self) -> &ConversionConfig {
        (**self).config()
    }

    fn load_rgb_files(&mut self) -> Result<Vec<PathBuf>> {
        (**self).load_rgb_files()
    }

    fn load_mask_files(&mut self) -> Result<Option<Vec<PathBuf>>> {
        (**self).load_mask_files()
    }

    fn load_poses(&mut self) -> Result<Option<Vec<Matrix4<f64>>>> {
        (**self).load_poses()
    }

    fn load_intrinsics(&mut self) -> Result<Option<Vec<Matrix3<f64>>>> {
        (**self).load_intrinsics()
    }
}

/// Everything an adapter produced, validated to be aligned.
#[derive(Debug, Clone)]
pub struct LoadedFrames {
    pub rgb_files: Vec<PathBuf>,
    pub mask_files: Option<Vec<PathBuf>>,
    pub poses: Option<Vec<Matrix4<f64>>>,
    pub intrinsics: Option<Vec<Matrix3<f64>>>,
    /// Upper bound of the sampled index range
    pub length: usize,
}

impl LoadedFrames {
    /// Indices that will be written: `0..length` stepped by `stride`.
    pub fn selected(&self, stride: usize) -> impl Iterator<Item = usize> {
        (0..self.length).step_by(stride)
    }
}

/// What a dump produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    pub frames: usize,
    pub masks: usize,
    pub poses: usize,
    pub intrinsics: usize,
}

/// What a dump would write, worked out without touching the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePlan {
    pub total: usize,
    pub selected: Vec<usize>,
    pub masks: bool,
    pub poses: bool,
    pub intrinsics: bool,
}

fn check_aligned(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(PrepError::LengthMismatch {
            what,
            expected,
            actual,
        }
        .into());
    }
    Ok(())
}

/// Drives a dataset adapter through `load` and `dump`.
pub struct Processor<A: DatasetAdapter> {
    adapter: A,
    frames: Option<LoadedFrames>,
}

impl<A: DatasetAdapter> Processor<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            frames: None,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn frames(&self) -> Option<&LoadedFrames> {
        self.frames.as_ref()
    }

    /// Call the four accessors in order and check that their lists line up.
    pub fn load(&mut self) -> Result<&LoadedFrames> {
        log::info!("Loading data from {}", self.adapter.config().data_path.display());

        let rgb_files = self.adapter.load_rgb_files()?;
        let mask_files = self.adapter.load_mask_files()?;
        let poses = self.adapter.load_poses()?;
        let intrinsics = self.adapter.load_intrinsics()?;

        let total = rgb_files.len();
        let unrecognized = rgb_files
            .iter()
            .filter(|p| !ImageLoader::is_supported_format(p))
            .count();
        if unrecognized > 0 {
            log::warn!("{} of {} images have an unrecognized extension", unrecognized, total);
        }

        if let Some(masks) = &mask_files {
            check_aligned("mask list", total, masks.len())?;
        }
        if let Some(poses) = &poses {
            check_aligned("pose list", total, poses.len())?;
        }
        if let Some(intrinsics) = &intrinsics {
            check_aligned("intrinsics list", total, intrinsics.len())?;
        }

        // No explicit frame limit means every frame
        let length = match self.adapter.config().length {
            Some(length) => {
                self.adapter.config().check_length(total)?;
                length
            }
            None => total,
        };

        log::info!("Data loaded: {} frames, using {}", total, length);

        Ok(self.frames.insert(LoadedFrames {
            rgb_files,
            mask_files,
            poses,
            intrinsics,
            length,
        }))
    }

    /// Load and report the frames a dump would write.
    pub fn plan(&mut self) -> Result<FramePlan> {
        self.adapter.config().validate()?;
        let stride = self.adapter.config().stride;

        let frames = self.load()?;
        Ok(FramePlan {
            total: frames.rgb_files.len(),
            selected: frames.selected(stride).collect(),
            masks: frames.mask_files.is_some(),
            poses: frames.poses.is_some(),
            intrinsics: frames.intrinsics.is_some(),
        })
    }

    /// Recreate the output root and write every selected frame.
    pub fn dump(&self) -> Result<ConversionSummary> {
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("dump() called before load()"))?;
        let config = self.adapter.config();
        config.validate()?;

        log::info!("Dumping data to {}", config.output_path.display());
        let tree = OutputTree::recreate(&config.output_path)?;

        let selected: Vec<usize> = frames.selected(config.stride).collect();
        let progress = ProgressBar::new(selected.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("#>-"),
        );

        let mut summary = ConversionSummary::default();
        for i in selected {
            let rgb_file = &frames.rgb_files[i];
            let stem = frame_stem(rgb_file)?;

            tree.write_image(rgb_file)?;
            summary.frames += 1;

            if let Some(masks) = &frames.mask_files {
                let mask = ImageLoader::load_grayscale(&masks[i])?;
                tree.write_mask(&stem, &binarize_inverted(&mask, config.mask_threshold))?;
                summary.masks += 1;
            }

            if let Some(poses) = &frames.poses {
                tree.write_pose(&stem, &poses[i])?;
                summary.poses += 1;
            }

            if let Some(intrinsics) = &frames.intrinsics {
                tree.write_intrinsics(&stem, &intrinsics[i])?;
                summary.intrinsics += 1;
            }

            log::debug!("Wrote frame {} ({})", i, stem);
            progress.inc(1);
        }
        progress.finish_and_clear();

        log::info!("Data dumped successfully: {} frames", summary.frames);
        Ok(summary)
    }

    pub fn process(&mut self) -> Result<ConversionSummary> {
        log::info!("Processing data for {}", self.adapter.kind());

        self.load()?;
        let summary = self.dump()?;

        log::info!("Data processed successfully");
        Ok(summary)
    }
}
