// Request and response types shared by the HTTP API and the CLI

use serde::{Deserialize, Serialize};

use crate::utils::image_ops::png_data_uri;

/// Filename offered for the downloaded result
pub const DOWNLOAD_FILENAME: &str = "processed_image.png";

/// Per-request options, passed explicitly from the handler to the remover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalOptions {
    /// Binarize the alpha channel after segmentation
    pub alpha_matte: bool,
}

impl Default for RemovalOptions {
    fn default() -> Self {
        Self { alpha_matte: true }
    }
}

/// Encoded result of one background removal
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub width: u32,
    pub height: u32,
    pub alpha_matte: bool,
    pub png_bytes: Vec<u8>,
}

impl ProcessedImage {
    /// `data:image/png;base64,...` URI for embedding or downloading
    pub fn data_uri(&self) -> String {
        png_data_uri(&self.png_bytes)
    }
}

/// JSON body returned by `POST /remove`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovalResponse {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub alpha_matte: bool,
    pub processing_time_ms: f64,
    pub data_url: String,
}

impl RemovalResponse {
    pub fn new(image: &ProcessedImage, processing_time_ms: f64) -> Self {
        Self {
            filename: DOWNLOAD_FILENAME.to_string(),
            width: image.width,
            height: image.height,
            alpha_matte: image.alpha_matte,
            processing_time_ms,
            data_url: image.data_uri(),
        }
    }
}

/// JSON body for any failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
