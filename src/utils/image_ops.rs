use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, GrayImage, ImageFormat, RgbaImage};
use std::io::Cursor;

use crate::core::errors::{RemovalError, RemovalResult};

/// Decode JPEG/PNG bytes into an image.
pub fn decode_image(bytes: &[u8]) -> RemovalResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(RemovalError::DecodeFailed)
}

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> RemovalResult<Vec<u8>> {
    let mut png_bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .map_err(RemovalError::EncodeFailed)?;
    Ok(png_bytes)
}

/// Wrap PNG bytes in a `data:image/png;base64,` URI.
pub fn png_data_uri(png_bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(png_bytes)
    )
}

/// Cut `img` out with `mask`, keeping its colours.
///
/// The mask scales the image's own alpha, so regions that were already
/// transparent stay transparent. The mask must have the same dimensions as
/// the image.
pub fn apply_alpha_mask(img: &DynamicImage, mask: &GrayImage) -> RemovalResult<RgbaImage> {
    let (width, height) = (img.width(), img.height());
    let (mask_width, mask_height) = mask.dimensions();
    if (width, height) != (mask_width, mask_height) {
        return Err(RemovalError::MaskMismatch {
            width,
            height,
            mask_width,
            mask_height,
        });
    }

    let mut rgba = img.to_rgba8();
    for (pixel, alpha) in rgba.pixels_mut().zip(mask.pixels()) {
        pixel[3] = ((pixel[3] as u16 * alpha[0] as u16 + 127) / 255) as u8;
    }
    Ok(rgba)
}

/// Hard-threshold the alpha channel: `a > threshold` becomes 255, everything else 0.
///
/// Soft edges produced by the model are discarded.
pub fn binarize_alpha(img: &mut RgbaImage, threshold: u8) {
    for pixel in img.pixels_mut() {
        pixel[3] = if pixel[3] > threshold { 255 } else { 0 };
    }
}
