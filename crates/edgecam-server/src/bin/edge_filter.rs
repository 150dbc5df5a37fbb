//! Offline edge filter
//!
//! Applies the same filter the server runs per frame to a single image file,
//! for trying out thresholds without a camera or browser.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use edgecam_media::filter;
use edgecam_media::{PixelFormat, VideoFrame};
use edgecam_protocol::{FilterMode, FilterSettings};
use std::path::PathBuf;

/// Run the edge filter over a PNG or JPEG image
#[derive(Parser, Debug)]
#[command(name = "edge-filter", author, version, about, long_about = None)]
struct Args {
    /// Image to read
    input: PathBuf,

    /// Where to write the result; format follows the extension
    output: PathBuf,

    /// passthrough, edges or canny
    #[arg(long, default_value_t = FilterMode::Edges)]
    mode: FilterMode,

    #[arg(long, default_value_t = 100)]
    threshold1: u16,

    #[arg(long, default_value_t = 200)]
    threshold2: u16,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = FilterSettings::new(args.threshold1, args.threshold2)?;

    let rgb = image::open(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();
    let frame = VideoFrame::new(width, height, rgb.into_raw(), PixelFormat::Rgb24);

    let output = filter::apply(args.mode, &frame, &settings)?;
    let edge_pixels = match output.format {
        PixelFormat::Gray8 => output.data.iter().filter(|&&v| v == filter::EDGE).count(),
        PixelFormat::Rgb24 => output.data.chunks(3).filter(|px| px[0] == filter::EDGE).count(),
    };

    match output.format {
        PixelFormat::Gray8 => image::GrayImage::from_raw(width, height, output.data)
            .ok_or_else(|| anyhow!("Filter output does not match {}x{}", width, height))?
            .save(&args.output)?,
        PixelFormat::Rgb24 => image::RgbImage::from_raw(width, height, output.data)
            .ok_or_else(|| anyhow!("Filter output does not match {}x{}", width, height))?
            .save(&args.output)?,
    }

    println!(
        "{} -> {} ({}, {}x{}, {} edge pixels)",
        args.input.display(),
        args.output.display(),
        args.mode,
        width,
        height,
        edge_pixels
    );
    Ok(())
}
