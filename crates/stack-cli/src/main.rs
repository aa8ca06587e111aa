mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackengine", version, about = "Deep-sky frame calibration and stacking engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate, align, and stack a set of light frames.
    Stack(commands::stack::StackArgs),
    /// Combine three or four pre-stacked channels into one RGB image.
    Rgb(commands::rgb::RgbArgs),
    /// Dump per-frame statistics, optionally with a histogram preview.
    Stats(commands::stats::StatsArgs),
    /// Apply a linear/auto histogram stretch to a stacked result.
    Stretch(commands::stretch::StretchArgs),
    /// Print license information.
    Legal,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stack(args) => commands::stack::run(args),
        Commands::Rgb(args) => commands::rgb::run(args),
        Commands::Stats(args) => commands::stats::run(args),
        Commands::Stretch(args) => commands::stretch::run(args),
        Commands::Legal => {
            println!("stackengine is distributed under the MIT license.");
            Ok(())
        }
    }
}
