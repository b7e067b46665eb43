// Salient-object segmentation with a u2net-family ONNX model

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use ndarray::Array4;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::core::config::Config;
use crate::core::errors::{SegmentationError, SegmentationResult};
use crate::services::onnx_builder::{self, SessionPool};

/// ImageNet channel statistics the u2net family was trained with
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Anything that can tell foreground from background.
///
/// The returned mask has the input's dimensions: 255 is foreground, 0 is
/// background, values in between are soft edges.
pub trait ForegroundSegmenter: Send + Sync {
    fn predict_mask(&self, img: &DynamicImage) -> SegmentationResult<GrayImage>;

    /// Name of the inference backend, for health reporting
    fn backend(&self) -> &str {
        "unknown"
    }
}

fn load_model_bytes(path: &str) -> Result<Vec<u8>> {
    debug!("Loading segmentation model from: {}", path);
    let bytes = std::fs::read(path).with_context(|| {
        format!(
            "Failed to load segmentation model from {} (set MODEL_PATH to a u2net .onnx file)",
            path
        )
    })?;

    if bytes.len() < 100 {
        anyhow::bail!(
            "Model file {} is too small ({} bytes). This might be a Git LFS stub \
            or an interrupted download.",
            path,
            bytes.len()
        );
    }

    Ok(bytes)
}

/// Resize, scale and normalize an image into a `[1, 3, size, size]` NCHW tensor.
pub fn preprocess(img: &DynamicImage, size: u32) -> Array4<f32> {
    let resized = img.resize_exact(size, size, FilterType::Lanczos3).to_rgb8();

    // Scale by the brightest channel value; guard all-black input
    let max = resized.as_raw().iter().copied().max().unwrap_or(0).max(1) as f32;

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            let scaled = pixel[c] as f32 / max;
            tensor[[0, c, y as usize, x as usize]] = (scaled - MEAN[c]) / STD[c];
        }
    }
    tensor
}

/// Turn a raw `size x size` prediction into a mask of the original dimensions.
///
/// The prediction is min-max normalized first. A flat prediction carries no
/// information and becomes all background.
pub fn postprocess(
    prediction: &[f32],
    size: u32,
    orig_width: u32,
    orig_height: u32,
) -> SegmentationResult<GrayImage> {
    let expected = (size * size) as usize;
    if prediction.len() < expected {
        return Err(SegmentationError::UnexpectedOutput {
            expected,
            actual: prediction.len(),
        });
    }
    let prediction = &prediction[..expected];

    let (min, max) = prediction
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    let pixels: Vec<u8> = if range.is_finite() && range > f32::EPSILON {
        prediction
            .iter()
            .map(|&v| (((v - min) / range) * 255.0) as u8)
            .collect()
    } else {
        vec![0; expected]
    };

    let low_res = GrayImage::from_raw(size, size, pixels).ok_or_else(|| {
        SegmentationError::PreprocessingFailed("mask buffer size mismatch".to_string())
    })?;

    if (orig_width, orig_height) == (size, size) {
        return Ok(low_res);
    }
    Ok(image::imageops::resize(
        &low_res,
        orig_width,
        orig_height,
        FilterType::Lanczos3,
    ))
}

/// ONNX-backed segmenter with a lazily grown session pool
pub struct SegmentationService {
    session_pool: SessionPool,
    model_bytes: Arc<Vec<u8>>,
    input_size: u32,
    input_name: String,
    output_name: String,
    device_type: String,
    inference_backend: Option<String>,
}

impl SegmentationService {
    /// Load the model, build the first session and run a warmup inference.
    #[instrument(skip(config), fields(model = config.model_path()))]
    pub fn new(config: &Config) -> Result<Self> {
        let model_bytes = Arc::new(load_model_bytes(config.model_path())?);
        info!(
            "Loaded segmentation model ({:.1} MB)",
            model_bytes.len() as f64 / 1_048_576.0
        );

        let (device_type, first_session) = onnx_builder::build_session(
            &model_bytes,
            "segmentation",
            config.inference_backend(),
        )?;

        let input_name = first_session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("Segmentation model declares no inputs")?;
        let output_name = first_session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("Segmentation model declares no outputs")?;
        debug!("Model input '{}', output '{}'", input_name, output_name);

        let session_pool = SessionPool::new(config.onnx_pool_size());
        session_pool.add_session(first_session);

        let service = Self {
            session_pool,
            model_bytes,
            input_size: config.model_input_size(),
            input_name,
            output_name,
            device_type,
            inference_backend: config.inference_backend().map(str::to_string),
        };

        info!("Running warmup inference for segmentation...");
        let warmup_start = Instant::now();
        service
            .predict_mask(&DynamicImage::new_rgb8(service.input_size, service.input_size))
            .context("Warmup inference failed")?;
        info!(
            "✓ Segmentation warmup completed in {:.2}ms",
            warmup_start.elapsed().as_secs_f64() * 1000.0
        );

        info!(
            "✓ Segmentation: {} (1/{} sessions allocated)",
            service.device_type,
            service.session_pool.capacity()
        );

        Ok(service)
    }

    /// Create another session when every existing one is busy and there is headroom
    fn expand_if_needed(&self) {
        if self.session_pool.available() > 0 {
            return;
        }
        let Some(slot) = self.session_pool.try_reserve() else {
            return;
        };

        match onnx_builder::build_session(
            &self.model_bytes,
            "segmentation",
            self.inference_backend.as_deref(),
        ) {
            Ok((_, session)) => {
                slot.fill(session);
                info!(
                    "✓ Expanded segmentation pool: {}/{} sessions",
                    self.session_pool.total(),
                    self.session_pool.capacity()
                );
            }
            Err(e) => debug!("⚠️  Failed to create additional segmentation session: {:#}", e),
        }
    }

    /// Drop idle sessions and free their memory
    pub fn cleanup_sessions(&self) {
        let count = self.session_pool.drain_all();
        info!("🧹 Dropped {} segmentation sessions", count);
    }
}

impl ForegroundSegmenter for SegmentationService {
    #[instrument(skip(self, img), fields(width = img.width(), height = img.height()))]
    fn predict_mask(&self, img: &DynamicImage) -> SegmentationResult<GrayImage> {
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err(SegmentationError::InvalidImageSize { width, height });
        }

        let start = Instant::now();
        let input_value = ort::value::Value::from_array(preprocess(img, self.input_size))?;

        self.expand_if_needed();

        let prediction = {
            let mut session = self.session_pool.acquire();
            let outputs = session.run(ort::inputs![self.input_name.as_str() => input_value])?;
            let (_shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
            data.to_vec()
        };

        let mask = postprocess(&prediction, self.input_size, width, height)?;

        debug!(
            "Segmentation completed in {:.2}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(mask)
    }

    fn backend(&self) -> &str {
        &self.device_type
    }
}
