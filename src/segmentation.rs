//! Foreground mask prediction for images that ship without masks.
//!
//! [`SegmentationModel`] is the seam a network plugs into; [`OnnxSegmentationModel`]
//! runs an exported ONNX graph through ONNX Runtime. [`MaskSynthesizer`] owns
//! the pre- and post-processing around a model so that any backend only has
//! to map a normalized tensor to a probability map.

use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use ndarray::{Array2, Array4};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;

use crate::error::PrepError;

/// ImageNet statistics the pretrained segmentation backbones expect
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub const DEFAULT_RESOLUTION: u32 = 1024;

/// Image in, same-size single-channel soft mask out.
pub trait MaskPredictor {
    fn predict_mask(&mut self, image: &RgbImage) -> Result<GrayImage>;
}

/// A pretrained network taking a `1x3xSxS` normalized tensor and returning an
/// `SxS` foreground probability map.
pub trait SegmentationModel {
    fn forward(&mut self, input: Array4<f32>) -> Result<Array2<f32>>;
}

pub struct MaskSynthesizer<M: SegmentationModel> {
    model: M,
    resolution: u32,
}

impl<M: SegmentationModel> MaskSynthesizer<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            resolution: DEFAULT_RESOLUTION,
        }
    }

    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    /// Resize to the model resolution and normalize into NCHW layout
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let size = self.resolution;
        let resized = imageops::resize(image, size, size, FilterType::Triangle);

        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }
        tensor
    }

    /// Quantize the probability map and bring it back to `width x height`
    pub fn postprocess(&self, probabilities: &Array2<f32>, width: u32, height: u32) -> Result<GrayImage> {
        let (rows, cols) = probabilities.dim();
        let pixels: Vec<f32> = probabilities.iter().map(|p| p.clamp(0.0, 1.0)).collect();
        let map: ImageBuffer<Luma<f32>, Vec<f32>> =
            ImageBuffer::from_raw(cols as u32, rows as u32, pixels)
                .context("Segmentation output has an inconsistent shape")?;

        let resized = imageops::resize(&map, width, height, FilterType::Triangle);
        Ok(GrayImage::from_fn(width, height, |x, y| {
            Luma([(resized.get_pixel(x, y)[0].clamp(0.0, 1.0) * 255.0).round() as u8])
        }))
    }
}

impl<M: SegmentationModel> MaskPredictor for MaskSynthesizer<M> {
    fn predict_mask(&mut self, image: &RgbImage) -> Result<GrayImage> {
        let input = self.preprocess(image);
        let probabilities = self.model.forward(input)?;

        let expected = (self.resolution as usize, self.resolution as usize);
        if probabilities.dim() != expected {
            anyhow::bail!(
                "Segmentation model returned a {:?} map, expected {:?}",
                probabilities.dim(),
                expected
            );
        }

        self.postprocess(&probabilities, image.width(), image.height())
    }
}

/// Segmentation network exported to ONNX.
///
/// Requires `ORT_DYLIB_PATH` to point at the ONNX Runtime shared library.
/// The first input receives the `1x3xSxS` tensor; the last `SxS` plane of the
/// first output is taken as the foreground map.
pub struct OnnxSegmentationModel {
    session: Session,
    input_name: String,
    apply_sigmoid: bool,
}

impl OnnxSegmentationModel {
    pub fn load(model_path: &Path) -> Result<Self> {
        Self::load_with_threads(model_path, 4)
    }

    pub fn load_with_threads(model_path: &Path, num_threads: usize) -> Result<Self> {
        if !model_path.is_file() {
            return Err(PrepError::SegmentationModelNotFound(model_path.to_path_buf()).into());
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load segmentation model: {}", model_path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .with_context(|| format!("Segmentation model has no inputs: {}", model_path.display()))?;

        log::info!("Loaded segmentation model {} (input `{}`)", model_path.display(), input_name);

        Ok(Self {
            session,
            input_name,
            apply_sigmoid: true,
        })
    }

    /// Models that already end in a sigmoid output probabilities, not logits
    pub fn with_sigmoid(mut self, apply_sigmoid: bool) -> Self {
        self.apply_sigmoid = apply_sigmoid;
        self
    }
}

impl SegmentationModel for OnnxSegmentationModel {
    fn forward(&mut self, input: Array4<f32>) -> Result<Array2<f32>> {
        let (n, c, height, width) = input.dim();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = ort::value::Tensor::from_array(([n, c, height, width], data))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor]?)
            .context("Segmentation inference failed")?;
        let (shape, values) = outputs[0].try_extract_raw_tensor::<f32>()?;

        output_to_map(&shape, values, self.apply_sigmoid)
    }
}

/// Last two dimensions of a raw output tensor as a probability map.
fn output_to_map(shape: &[i64], values: &[f32], apply_sigmoid: bool) -> Result<Array2<f32>> {
    if shape.len() < 2 {
        anyhow::bail!("Segmentation output has rank {}, expected at least 2", shape.len());
    }
    let rows = shape[shape.len() - 2].max(0) as usize;
    let cols = shape[shape.len() - 1].max(0) as usize;
    let plane = rows * cols;
    if plane == 0 || values.len() < plane || values.len() % plane != 0 {
        anyhow::bail!("Segmentation output of shape {:?} holds {} values", shape, values.len());
    }

    let probabilities = values[values.len() - plane..]
        .iter()
        .map(|&v| if apply_sigmoid { 1.0 / (1.0 + (-v).exp()) } else { v })
        .collect();
    Array2::from_shape_vec((rows, cols), probabilities).context("Segmentation output has an inconsistent shape")
}
