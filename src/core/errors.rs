// Error types for each layer of the service
//
// Services return these typed errors; binaries and start-up glue wrap them
// with anyhow context, HTTP handlers map them onto status codes.

use std::path::PathBuf;
use thiserror::Error;

/// Segmentation model errors
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("ONNX inference failed: {0}")]
    InferenceFailed(#[from] ort::Error),

    #[error("Image preprocessing failed: {0}")]
    PreprocessingFailed(String),

    #[error("Unexpected model output: expected {expected} values, got {actual}")]
    UnexpectedOutput { expected: usize, actual: usize },

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },
}

/// Background removal errors
#[derive(Debug, Error)]
pub enum RemovalError {
    #[error("Could not decode image: {0}")]
    DecodeFailed(#[source] image::ImageError),

    #[error("Background removal failed: {0}")]
    SegmentationFailed(#[from] SegmentationError),

    #[error("Mask size {mask_width}x{mask_height} does not match image size {width}x{height}")]
    MaskMismatch {
        width: u32,
        height: u32,
        mask_width: u32,
        mask_height: u32,
    },

    #[error("Could not encode PNG: {0}")]
    EncodeFailed(#[source] image::ImageError),

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

impl RemovalError {
    /// True when the caller sent something unusable (as opposed to a server-side failure)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RemovalError::DecodeFailed(_)
                | RemovalError::SegmentationFailed(SegmentationError::InvalidImageSize { .. })
        )
    }
}

/// File mode errors
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("File not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Output path must end in .png: {}", .0.display())]
    NotPngPath(PathBuf),

    #[error("Output directory does not exist: {}", .0.display())]
    MissingOutputDir(PathBuf),

    #[error("Output file already exists (use --force to overwrite): {}", .0.display())]
    OutputExists(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Removal(#[from] RemovalError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid server config: {0}")]
    InvalidServerConfig(String),

    #[error("Invalid model config: {0}")]
    InvalidModelConfig(String),

    #[error("Alpha threshold must be below 255, got {0}")]
    InvalidAlphaThreshold(u8),

    #[error("ONNX pool size must be > 0, got {0}")]
    InvalidPoolSize(usize),
}

pub type SegmentationResult<T> = Result<T, SegmentationError>;
pub type RemovalResult<T> = Result<T, RemovalError>;
pub type ExportResult<T> = Result<T, ExportError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_message_is_distinct() {
        let err = ExportError::InputNotFound(PathBuf::from("photo.jpg"));
        assert_eq!(err.to_string(), "File not found: photo.jpg");
    }

    #[test]
    fn test_decode_failure_is_client_error() {
        let decode = image::load_from_memory(b"not an image").unwrap_err();
        assert!(RemovalError::DecodeFailed(decode).is_client_error());
        assert!(!RemovalError::TaskJoinFailed("panicked".into()).is_client_error());
    }
}
