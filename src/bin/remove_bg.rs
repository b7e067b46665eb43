//! File mode: remove the background of one image and write a transparent PNG
//!
//! Usage: cargo run --release --bin remove-bg -- photo.jpg --output photo_cutout.png

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use cutout_server::core::Config;
use cutout_server::services::file_export::remove_background_file;
use cutout_server::{BackgroundRemover, RemovalOptions, SegmentationService};

#[derive(Debug, Parser)]
#[command(name = "remove-bg", version, about = "Remove the background of an image")]
struct Args {
    /// Input image (JPEG or PNG)
    input: PathBuf,

    /// Where to write the PNG result
    #[arg(short, long)]
    output: PathBuf,

    /// Keep the model's soft edges instead of a hard 0/255 alpha matte
    #[arg(long)]
    no_alpha_matte: bool,

    /// Overwrite the output file if it already exists
    #[arg(short, long)]
    force: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::new().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(cutout_server::log_filter(config.log_level()))
        .with_target(false)
        .init();

    // Fail on bad paths before paying for model start-up
    cutout_server::services::file_export::validate_paths(&args.input, &args.output, args.force)?;

    let start = Instant::now();
    let segmentation = SegmentationService::new(&config)?;
    let remover = BackgroundRemover::new(Arc::new(segmentation))
        .with_alpha_threshold(config.alpha_threshold());

    let options = RemovalOptions {
        alpha_matte: !args.no_alpha_matte,
    };
    let processed = remove_background_file(&remover, &args.input, &args.output, options, args.force)?;

    info!(
        "Saved {} ({}x{}, alpha_matte={}) in {:.2}s",
        args.output.display(),
        processed.width,
        processed.height,
        processed.alpha_matte,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
