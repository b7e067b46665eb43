// File mode: read an image from disk, remove its background, write a PNG

use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, instrument};

use crate::core::errors::{ExportError, ExportResult};
use crate::core::types::{ProcessedImage, RemovalOptions};
use crate::services::background_remover::BackgroundRemover;

/// Check the input exists and the output is a writable, non-clobbering `.png` path.
pub fn validate_paths(input: &Path, output: &Path, overwrite: bool) -> ExportResult<()> {
    if !input.is_file() {
        return Err(ExportError::InputNotFound(input.to_path_buf()));
    }

    let is_png = output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if !is_png {
        return Err(ExportError::NotPngPath(output.to_path_buf()));
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(ExportError::MissingOutputDir(parent.to_path_buf()));
        }
    }

    if output.exists() && !overwrite {
        return Err(ExportError::OutputExists(output.to_path_buf()));
    }

    Ok(())
}

/// Remove the background of `input` and write the PNG to `output`.
#[instrument(skip(remover), fields(input = %input.display(), output = %output.display()))]
pub fn remove_background_file(
    remover: &BackgroundRemover,
    input: &Path,
    output: &Path,
    options: RemovalOptions,
    overwrite: bool,
) -> ExportResult<ProcessedImage> {
    validate_paths(input, output, overwrite)?;

    let bytes = std::fs::read(input).map_err(|source| match source.kind() {
        ErrorKind::NotFound => ExportError::InputNotFound(input.to_path_buf()),
        _ => ExportError::ReadFailed {
            path: input.to_path_buf(),
            source,
        },
    })?;

    let processed = remover.process_encoded(&bytes, options)?;

    std::fs::write(output, &processed.png_bytes).map_err(|source| ExportError::WriteFailed {
        path: output.to_path_buf(),
        source,
    })?;

    info!(
        "Wrote {}x{} PNG ({} bytes)",
        processed.width,
        processed.height,
        processed.png_bytes.len()
    );
    Ok(processed)
}
