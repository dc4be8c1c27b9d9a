#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectParams, Detection};
use crate::detect::yolo;

const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLOv8-style ONNX exports.
///
/// The model is loaded once from a local file. Frames are resized to the
/// square model input, scaled to `0..1` and laid out as NCHW.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    class_names: Vec<String>,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, class_names: Vec<String>) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the default NMS overlap threshold.
    pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
        self.iou_threshold = threshold;
        self
    }

    fn build_input(&self, image: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        let side = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        input.into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, image: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot run detection on an empty image"));
        }

        let input = self.build_input(image);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let values: Vec<f32> = view.iter().copied().collect();

        let candidates = yolo::decode_output(&values, &shape, params)?;
        let kept = yolo::non_max_suppression(candidates, self.iou_threshold);
        let scale = (
            width as f32 / self.input_size as f32,
            height as f32 / self.input_size as f32,
        );
        Ok(yolo::into_detections(kept, scale, (width, height), &self.class_names))
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank, &DetectParams::default()).map(|_| ())
    }
}
