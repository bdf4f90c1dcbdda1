use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::GrayImage;
use nalgebra::{Matrix3, Matrix4};

pub const IMAGES_DIR: &str = "images";
pub const MASKS_DIR: &str = "masks";
pub const POSES_DIR: &str = "poses";
pub const INTRINSICS_DIR: &str = "intrinsics";

/// Canonical output layout consumed by the SfM pipeline:
///
/// ```text
/// <root>/images/<stem>.<ext>
/// <root>/masks/<stem>.jpg
/// <root>/poses/<stem>.txt
/// <root>/intrinsics/<stem>.txt
/// ```
pub struct OutputTree {
    root: PathBuf,
}

impl OutputTree {
    /// Delete whatever is at `root` and start from an empty directory.
    ///
    /// There is no rollback: a failure part-way through a dump leaves a
    /// partially written tree behind.
    pub fn recreate(root: &Path) -> Result<Self> {
        if root.exists() {
            log::info!("Output path {} already exists, removing it", root.display());
            fs::remove_dir_all(root)
                .with_context(|| format!("Failed to remove output path: {}", root.display()))?;
        }
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create output path: {}", root.display()))?;

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        Ok(dir)
    }

    /// Copy the source image verbatim, keeping its file name
    pub fn write_image(&self, src: &Path) -> Result<PathBuf> {
        let file_name = src
            .file_name()
            .with_context(|| format!("Image path has no file name: {}", src.display()))?;
        let dst = self.subdir(IMAGES_DIR)?.join(file_name);
        fs::copy(src, &dst)
            .with_context(|| format!("Failed to copy image: {}", src.display()))?;
        Ok(dst)
    }

    pub fn write_mask(&self, stem: &str, mask: &GrayImage) -> Result<PathBuf> {
        let dst = self.subdir(MASKS_DIR)?.join(format!("{}.jpg", stem));
        mask.save(&dst)
            .with_context(|| format!("Failed to write mask: {}", dst.display()))?;
        Ok(dst)
    }

    pub fn write_pose(&self, stem: &str, pose: &Matrix4<f64>) -> Result<PathBuf> {
        let dst = self.subdir(POSES_DIR)?.join(format!("{}.txt", stem));
        fs::write(&dst, format_matrix(pose.row_iter().map(|r| r.iter().copied().collect())))
            .with_context(|| format!("Failed to write pose: {}", dst.display()))?;
        Ok(dst)
    }

    pub fn write_intrinsics(&self, stem: &str, intrinsics: &Matrix3<f64>) -> Result<PathBuf> {
        let dst = self.subdir(INTRINSICS_DIR)?.join(format!("{}.txt", stem));
        fs::write(
            &dst,
            format_matrix(intrinsics.row_iter().map(|r| r.iter().copied().collect())),
        )
        .with_context(|| format!("Failed to write intrinsics: {}", dst.display()))?;
        Ok(dst)
    }
}

/// One row per line, values separated by single spaces, no trailing newline.
fn format_matrix(rows: impl Iterator<Item = Vec<f64>>) -> String {
    rows.map(|row| {
        row.iter()
            .map(|v| format!("{:?}", v))
            .collect::<Vec<_>>()
            .join(" ")
    })
    .collect::<Vec<_>>()
    .join("\n")
}

/// Shared per-frame key: the file name with its last extension removed.
pub fn frame_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("Cannot derive frame stem from {}", path.display()))
}
