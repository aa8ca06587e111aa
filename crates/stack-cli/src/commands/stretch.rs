use std::path::PathBuf;

use clap::Args;
use stack_core::io::fits::load_fits;
use stack_core::io::image_io::save_png_mono;
use stack_core::stats::{basic, histogram_peak};

use super::resolve_primary_output;

#[derive(Args)]
pub struct StretchArgs {
    pub input: PathBuf,

    /// Use the histogram peak as the black point instead of the observed
    /// minimum (auto mode).
    #[arg(long)]
    pub auto: bool,

    #[arg(long, default_value = "%auto")]
    pub output: String,
}

pub fn run(args: StretchArgs) -> anyhow::Result<()> {
    let frame = load_fits(&args.input, 0)?;
    let pixels = frame.data.as_slice().unwrap_or(&[]);
    let b = basic(pixels);

    let black = if args.auto {
        let (peak, _) = histogram_peak(pixels, 256);
        peak
    } else {
        b.min
    };

    let input_dir = args.input.parent().unwrap_or_else(|| std::path::Path::new("."));
    let output_path = resolve_primary_output(&args.output, input_dir, "stretched.png");
    save_png_mono(&output_path, &frame.data, black, b.max)?;

    println!("wrote {} (black={black:.3}, white={:.3})", output_path.display(), b.max);
    Ok(())
}
