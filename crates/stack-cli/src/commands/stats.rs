use std::path::PathBuf;

use clap::Args;
use stack_core::io::fits::load_fits;
use stack_core::io::image_io::save_histogram_png;
use stack_core::stats::{basic, histogram, location_scale, noise, LocationScaleMode};

use super::resolve_primary_output;

#[derive(Args)]
pub struct StatsArgs {
    pub input: PathBuf,

    /// Write a histogram preview PNG alongside the input.
    #[arg(long)]
    pub histogram: bool,

    #[arg(long, default_value = "%auto")]
    pub output: String,
}

pub fn run(args: StatsArgs) -> anyhow::Result<()> {
    let frame = load_fits(&args.input, 0)?;
    let pixels = frame.data.as_slice().unwrap_or(&[]);

    let b = basic(pixels);
    let (location, scale) = location_scale(pixels, LocationScaleMode::SampledSigmaClipQn, frame.id);
    let noise_estimate = noise(&frame.data);

    println!("dimensions : {}x{}", frame.width(), frame.height());
    println!("min/max    : {:.3} / {:.3}", b.min, b.max);
    println!("mean/stddev: {:.3} / {:.3}", b.mean, b.stddev);
    println!("location   : {location:.3}");
    println!("scale      : {scale:.3}");
    println!("noise      : {noise_estimate:.3}");

    if args.histogram {
        let counts = histogram(pixels, 256);
        let input_dir = args.input.parent().unwrap_or_else(|| std::path::Path::new("."));
        let output_path = resolve_primary_output(&args.output, input_dir, "histogram.png");
        save_histogram_png(&output_path, &counts, 512, 256)?;
        println!("histogram  : {}", output_path.display());
    }

    Ok(())
}
