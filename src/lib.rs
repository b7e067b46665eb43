// Image background removal service
//
// Interactive mode is the HTTP server in main.rs, file mode is bin/remove_bg.rs;
// both drive the same BackgroundRemover.

pub mod api;
pub mod core;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{ConfigError, ExportError, RemovalError, SegmentationError},
    types::{ProcessedImage, RemovalOptions, RemovalResponse, DOWNLOAD_FILENAME},
};

pub use services::{BackgroundRemover, ForegroundSegmenter, SegmentationService};

pub use utils::{Metrics, png_data_uri};

/// Build the `tracing` filter used by both binaries
pub fn log_filter(level: tracing::Level) -> tracing_subscriber::EnvFilter {
    let level = match level {
        tracing::Level::TRACE => "trace",
        tracing::Level::DEBUG => "debug",
        tracing::Level::INFO => "info",
        tracing::Level::WARN => "warn",
        tracing::Level::ERROR => "error",
    };
    tracing_subscriber::EnvFilter::new(format!("cutout_server={},remove_bg={},ort=off", level, level))
}
