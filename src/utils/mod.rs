pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{
    apply_alpha_mask,
    binarize_alpha,
    decode_image,
    encode_png,
    png_data_uri,
};
pub use metrics::{Metrics, MetricsSnapshot};
