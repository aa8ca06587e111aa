use std::path::PathBuf;

use clap::{Args, ValueEnum};
use stack_core::io::fits::{load_fits, save_fits_rgb};
use stack_core::io::image_io::save_png_rgb;
use stack_core::pipeline::color::{combine_argb, combine_lrgb, combine_rgb};

use super::{resolve_auto_extension, resolve_primary_output};

#[derive(Clone, Copy, ValueEnum)]
pub enum CombineMode {
    Rgb,
    Argb,
    Lrgb,
}

#[derive(Args)]
pub struct RgbArgs {
    pub mode: CombineMode,

    /// Pre-stacked red channel.
    pub red: PathBuf,
    /// Pre-stacked green channel.
    pub green: PathBuf,
    /// Pre-stacked blue channel.
    pub blue: PathBuf,

    /// Fourth channel: alpha (for argb) or luminance (for lrgb).
    #[arg(long)]
    pub fourth: Option<PathBuf>,

    /// Blend strength for the `argb` alpha channel.
    #[arg(long, default_value_t = 0.5)]
    pub alpha_strength: f32,

    #[arg(long, default_value = "%auto")]
    pub output: String,

    /// Also write a preview PNG alongside the FITS output.
    #[arg(long)]
    pub png: bool,

    /// Preview PNG path, or `%auto` to derive it from `--output` by
    /// swapping its extension for `.png`. Only used with `--png`.
    #[arg(long, default_value = "%auto")]
    pub png_output: String,
}

pub fn run(args: RgbArgs) -> anyhow::Result<()> {
    let r = load_fits(&args.red, 0)?.data;
    let g = load_fits(&args.green, 1)?.data;
    let b = load_fits(&args.blue, 2)?.data;

    let combined = match args.mode {
        CombineMode::Rgb => combine_rgb(&r, &g, &b)?,
        CombineMode::Argb => {
            let alpha_path = args.fourth.as_ref().ok_or_else(|| anyhow::anyhow!("--fourth is required for argb mode"))?;
            let alpha = load_fits(alpha_path, 3)?.data;
            combine_argb(&r, &g, &b, &alpha, args.alpha_strength)?
        }
        CombineMode::Lrgb => {
            let luminance_path = args.fourth.as_ref().ok_or_else(|| anyhow::anyhow!("--fourth is required for lrgb mode"))?;
            let luminance = load_fits(luminance_path, 3)?.data;
            combine_lrgb(&r, &g, &b, &luminance)?
        }
    };

    let input_dir = args.red.parent().unwrap_or_else(|| std::path::Path::new("."));
    let output_path = resolve_primary_output(&args.output, input_dir, "combined.fits");
    save_fits_rgb(&output_path, &combined)?;
    println!("wrote {}", output_path.display());

    if args.png {
        let png_path = resolve_auto_extension(&args.png_output, &output_path, "png");
        let (min, max) = min_max(&combined);
        save_png_rgb(&png_path, &combined, min, max)?;
        println!("wrote {}", png_path.display());
    }
    Ok(())
}

fn min_max(channels: &[ndarray::Array2<f32>; 3]) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for c in channels {
        for &v in c.iter() {
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
            }
        }
    }
    (min, max)
}
