pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{ConfigError, ExportError, RemovalError, SegmentationError};
pub use types::{ProcessedImage, RemovalOptions, RemovalResponse, DOWNLOAD_FILENAME};
