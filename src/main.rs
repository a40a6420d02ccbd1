// SPDX-License-Identifier: GPL-3.0-only

use clap::Parser;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "fusion-node")]
#[command(about = "Live RGB-D reconstruction node")]
#[command(version)]
pub struct Cli {
    /// Calibration file
    #[arg(value_name = "CALIB", default_value = "./Files/Teddy/calib.txt")]
    calibration: PathBuf,

    /// Color frame mask (e.g. rgb/%04i.ppm), or a device hint when DEPTH is omitted
    #[arg(value_name = "COLOR_OR_DEVICE")]
    color_or_device: Option<String>,

    /// Depth frame mask (e.g. depth/%04i.pgm)
    #[arg(value_name = "DEPTH")]
    depth: Option<String>,

    /// IMU data mask (e.g. imu/%04i.txt)
    #[arg(value_name = "IMU")]
    imu: Option<String>,

    /// Config file (default: ~/.config/fusion-node/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start a session immediately instead of waiting for `start`
    #[arg(short, long)]
    autostart: bool,

    /// Log at info level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=fusion_node=debug, RUST_LOG=info
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    cli::run(cli)
}
