pub mod background_remover;
pub mod file_export;
pub mod onnx_builder; // Shared ONNX session builder and session pool
pub mod segmentation;

// Re-export commonly used services
pub use background_remover::BackgroundRemover;
pub use file_export::remove_background_file;
pub use segmentation::{ForegroundSegmenter, SegmentationService};
