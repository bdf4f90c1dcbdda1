use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, GrayImage, Luma};

/// Reads source images and masks, and applies the pixel-level mask transforms
/// used when writing the output tree.
pub struct ImageLoader;

impl ImageLoader {
    pub fn is_supported_format(path: &Path) -> bool {
        if let Some(ext) = path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            matches!(
                ext_lower.as_str(),
                "jpg" | "jpeg" | "png" | "bmp" | "tiff" | "tif" | "webp"
            )
        } else {
            false
        }
    }

    pub fn load(path: &Path) -> Result<DynamicImage> {
        image::open(path).with_context(|| format!("Failed to load image: {}", path.display()))
    }

    /// Load an image as a single 8-bit channel
    pub fn load_grayscale(path: &Path) -> Result<GrayImage> {
        Ok(Self::load(path)?.to_luma8())
    }

    pub fn has_alpha(image: &DynamicImage) -> bool {
        image.color().has_alpha()
    }
}

/// Binarize at `threshold` and invert in one pass.
///
/// The SfM consumer treats zero pixels as valid, so foreground
/// (`v > threshold`) becomes 0 and everything else 255.
pub fn binarize_inverted(mask: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y)[0] > threshold {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

/// Foreground mask from an alpha channel: any non-transparent pixel is 255.
pub fn alpha_mask(image: &DynamicImage) -> GrayImage {
    let rgba = image.to_rgba8();
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        if rgba.get_pixel(x, y)[3] > 0 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Axis-aligned box `(x1, y1, x2, y2)` punched as 0 into a 255 canvas.
///
/// Coordinates are truncated to pixels and clamped to the canvas; the box
/// covers rows `y1..y2` and columns `x1..x2`.
pub fn box_mask(width: u32, height: u32, bbox: [f64; 4]) -> GrayImage {
    let clamp = |v: f64, max: u32| -> u32 { v.max(0.0).min(max as f64) as u32 };
    let x1 = clamp(bbox[0], width);
    let y1 = clamp(bbox[1], height);
    let x2 = clamp(bbox[2], width);
    let y2 = clamp(bbox[3], height);

    GrayImage::from_fn(width, height, |x, y| {
        if x >= x1 && x < x2 && y >= y1 && y < y2 {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_supported_formats() {
        assert!(ImageLoader::is_supported_format(Path::new("a/frame000001.jpg")));
        assert!(ImageLoader::is_supported_format(Path::new("0-color.PNG")));
        assert!(!ImageLoader::is_supported_format(Path::new("0-pose.txt")));
        assert!(!ImageLoader::is_supported_format(Path::new("no_extension")));
    }

    #[test]
    fn test_binarize_inverted() {
        let mask = GrayImage::from_raw(4, 1, vec![0, 1, 127, 255]).unwrap();

        let out = binarize_inverted(&mask, 0);
        assert_eq!(out.as_raw(), &vec![255, 0, 0, 0]);

        let out = binarize_inverted(&mask, 127);
        assert_eq!(out.as_raw(), &vec![255, 255, 255, 0]);
    }

    #[test]
    fn test_box_mask() {
        let mask = box_mask(100, 100, [10.0, 10.0, 50.0, 50.0]);
        for (x, y, p) in mask.enumerate_pixels() {
            let inside = (10..50).contains(&x) && (10..50).contains(&y);
            assert_eq!(p[0], if inside { 0 } else { 255 }, "pixel ({}, {})", x, y);
        }
    }

    #[test]
    fn test_box_mask_clamped() {
        let mask = box_mask(20, 10, [-5.0, 2.0, 40.0, 30.0]);
        assert_eq!(mask.get_pixel(0, 2)[0], 0);
        assert_eq!(mask.get_pixel(19, 9)[0], 0);
        assert_eq!(mask.get_pixel(0, 1)[0], 255);
    }

    #[test]
    fn test_alpha_mask() {
        let mut rgba = RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([10, 20, 30, 0]));
        rgba.put_pixel(1, 0, Rgba([10, 20, 30, 200]));
        let image = DynamicImage::ImageRgba8(rgba);

        assert!(ImageLoader::has_alpha(&image));
        assert_eq!(alpha_mask(&image).as_raw(), &vec![0, 255]);
    }
}
