// Background removal: segmentation, cutout and alpha refinement

use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::errors::{RemovalError, RemovalResult};
use crate::core::types::{ProcessedImage, RemovalOptions};
use crate::services::segmentation::ForegroundSegmenter;
use crate::utils::image_ops::{apply_alpha_mask, binarize_alpha, decode_image, encode_png};
use crate::utils::Metrics;

/// Alpha values above this survive the matte as fully opaque
pub const DEFAULT_ALPHA_THRESHOLD: u8 = 200;

/// Strips the background from images.
///
/// Stateless between calls; cloning shares the underlying segmenter.
#[derive(Clone)]
pub struct BackgroundRemover {
    segmenter: Arc<dyn ForegroundSegmenter>,
    alpha_threshold: u8,
    metrics: Option<Metrics>,
}

impl BackgroundRemover {
    pub fn new(segmenter: Arc<dyn ForegroundSegmenter>) -> Self {
        Self {
            segmenter,
            alpha_threshold: DEFAULT_ALPHA_THRESHOLD,
            metrics: None,
        }
    }

    pub fn with_alpha_threshold(mut self, threshold: u8) -> Self {
        self.alpha_threshold = threshold;
        self
    }

    /// Record inference latency into `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn backend(&self) -> &str {
        self.segmenter.backend()
    }

    /// Remove the background from `image`.
    ///
    /// The result is always RGBA with the input's dimensions. With
    /// `alpha_matte` every alpha value is either 0 or 255.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn process(&self, image: &DynamicImage, alpha_matte: bool) -> RemovalResult<DynamicImage> {
        let inference_start = Instant::now();
        let mask = self.segmenter.predict_mask(image)?;
        if let Some(metrics) = &self.metrics {
            metrics.record_inference(inference_start.elapsed());
        }

        let mut cutout = apply_alpha_mask(image, &mask)?;

        if alpha_matte {
            binarize_alpha(&mut cutout, self.alpha_threshold);
        }

        debug!(
            "Removed background in {:.2}ms (alpha_matte={})",
            inference_start.elapsed().as_secs_f64() * 1000.0,
            alpha_matte
        );
        Ok(DynamicImage::ImageRgba8(cutout))
    }

    /// Decode, process and PNG-encode `bytes` on a blocking worker thread.
    pub async fn process_bytes(
        &self,
        bytes: Vec<u8>,
        options: RemovalOptions,
    ) -> RemovalResult<ProcessedImage> {
        let remover = self.clone();
        tokio::task::spawn_blocking(move || remover.process_encoded(&bytes, options))
            .await
            .map_err(|e| RemovalError::TaskJoinFailed(e.to_string()))?
    }

    /// Synchronous counterpart of [`process_bytes`](Self::process_bytes)
    pub fn process_encoded(
        &self,
        bytes: &[u8],
        options: RemovalOptions,
    ) -> RemovalResult<ProcessedImage> {
        let image = decode_image(bytes)?;
        let result = self.process(&image, options.alpha_matte)?;
        let png_bytes = encode_png(&result)?;

        Ok(ProcessedImage {
            width: result.width(),
            height: result.height(),
            alpha_matte: options.alpha_matte,
            png_bytes,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::errors::{SegmentationError, SegmentationResult};
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
    use std::io::Cursor;

    /// Deterministic stand-in for the model: foreground is whatever is far
    /// from the top-left corner colour, with a soft ramp in between.
    pub(crate) struct ColourDistanceSegmenter;

    impl ForegroundSegmenter for ColourDistanceSegmenter {
        fn predict_mask(&self, img: &DynamicImage) -> SegmentationResult<GrayImage> {
            if img.width() == 0 || img.height() == 0 {
                return Err(SegmentationError::InvalidImageSize {
                    width: img.width(),
                    height: img.height(),
                });
            }
            let rgb = img.to_rgb8();
            let bg = *rgb.get_pixel(0, 0);
            Ok(GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let p = rgb.get_pixel(x, y);
                let distance: u32 = (0..3).map(|c| p[c].abs_diff(bg[c]) as u32).sum();
                Luma([distance.min(255) as u8])
            }))
        }

        fn backend(&self) -> &str {
            "test"
        }
    }

    struct FailingSegmenter;

    impl ForegroundSegmenter for FailingSegmenter {
        fn predict_mask(&self, _img: &DynamicImage) -> SegmentationResult<GrayImage> {
            Err(SegmentationError::PreprocessingFailed("model exploded".to_string()))
        }
    }

    pub(crate) fn remover() -> BackgroundRemover {
        BackgroundRemover::new(Arc::new(ColourDistanceSegmenter))
    }

    /// Solid red square in the middle of a white 100x100 canvas
    pub(crate) fn subject_on_white_jpeg() -> Vec<u8> {
        let img = RgbImage::from_fn(100, 100, |x, y| {
            if (30..70).contains(&x) && (30..70).contains(&y) {
                Rgb([200, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    #[test]
    fn test_jpeg_subject_on_contrasting_background() {
        let processed = remover()
            .process_encoded(&subject_on_white_jpeg(), RemovalOptions::default())
            .unwrap();

        assert_eq!((processed.width, processed.height), (100, 100));
        let out = image::load_from_memory(&processed.png_bytes).unwrap().to_rgba8();
        assert_eq!(out.dimensions(), (100, 100));

        // Background corners and the subject's centre
        assert_eq!(out.get_pixel(2, 2)[3], 0);
        assert_eq!(out.get_pixel(97, 97)[3], 0);
        assert_eq!(out.get_pixel(50, 50)[3], 255);
        assert_eq!(out.get_pixel(35, 64)[3], 255);
    }

    #[test]
    fn test_alpha_matte_output_is_binary() {
        let image = image::load_from_memory(&subject_on_white_jpeg()).unwrap();
        let out = remover().process(&image, true).unwrap().to_rgba8();
        assert!(out.pixels().all(|p| p[3] == 0 || p[3] == 255));
    }

    #[test]
    fn test_without_alpha_matte_keeps_soft_edges() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(3, 1, |x, _| {
            Rgb([255, 255 - (x as u8 * 50), 255])
        }));

        let out = remover().process(&image, false).unwrap();

        assert!(out.color().has_alpha());
        let alphas: Vec<u8> = out.to_rgba8().pixels().map(|p| p[3]).collect();
        assert_eq!(alphas, vec![0, 50, 100]);
    }

    #[test]
    fn test_preserves_dimensions_for_odd_sizes() {
        for (w, h) in [(1, 1), (17, 3), (64, 129)] {
            let image = DynamicImage::new_rgb8(w, h);
            let out = remover().process(&image, true).unwrap();
            assert_eq!((out.width(), out.height()), (w, h));
        }
    }

    #[test]
    fn test_custom_threshold() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 { Rgb([0, 0, 0]) } else { Rgb([40, 0, 0]) }
        }));

        let strict = remover().process(&image, true).unwrap().to_rgba8();
        assert_eq!(strict.get_pixel(1, 0)[3], 0);

        let lenient = remover()
            .with_alpha_threshold(10)
            .process(&image, true)
            .unwrap()
            .to_rgba8();
        assert_eq!(lenient.get_pixel(1, 0)[3], 255);
    }

    #[test]
    fn test_corrupted_bytes_report_error() {
        let result = remover().process_encoded(b"\xff\xd8\xff garbage", RemovalOptions::default());
        let err = result.unwrap_err();
        assert!(matches!(err, RemovalError::DecodeFailed(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_model_failure_is_reported() {
        let remover = BackgroundRemover::new(Arc::new(FailingSegmenter));
        let err = remover
            .process(&DynamicImage::new_rgb8(4, 4), true)
            .unwrap_err();
        assert!(err.to_string().contains("model exploded"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_records_inference_metrics() {
        let metrics = Metrics::new();
        let remover = remover().with_metrics(metrics.clone());
        remover.process(&DynamicImage::new_rgb8(8, 8), true).unwrap();
        remover.process(&DynamicImage::new_rgb8(8, 8), false).unwrap();
        assert_eq!(metrics.snapshot().inferences, 2);
        assert_eq!(remover.backend(), "test");
    }

    #[tokio::test]
    async fn test_process_bytes_async() {
        let processed = remover()
            .process_bytes(subject_on_white_jpeg(), RemovalOptions { alpha_matte: false })
            .await
            .unwrap();

        assert!(!processed.alpha_matte);
        assert!(processed.data_uri().starts_with("data:image/png;base64,"));
    }
}
