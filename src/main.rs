use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use mp4demux::Config;

/// Extracts the H.264 video track of an MP4 file as an Annex-B elementary stream.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Container to read
    input: PathBuf,
}

fn main() -> miette::Result<()> {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();

    let args = Cli::parse();
    let config = Config::from_env()?;
    mp4demux::extract_file(&args.input, &config)?;
    Ok(())
}
