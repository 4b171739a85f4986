//! The `justvpn` daemon binary: parses the configuration file, brings up
//! the packet pipeline, and tears it down again on SIGINT.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Command-line args for the `justvpn` daemon.
#[derive(Parser, Debug)]
#[command(name = "justvpn", bin_name = "justvpn", about, long_about = None)]
struct Cli {
    /// Run as server.
    #[arg(short = 's', long)]
    server: bool,

    /// More verbose output.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Write cpu profile to file. Accepted for compatibility; this build
    /// does not link a profiler, so passing it only logs a warning.
    #[arg(long, value_name = "PATH")]
    cpuprofile: Option<PathBuf>,

    /// Path to the JSON configuration file.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Some(path) = &cli.cpuprofile {
        tracing::warn!(path = %path.display(), "cpuprofile is not supported by this build, ignoring");
    }

    if cli.server {
        tracing::info!("running as server");
    }

    let config = config::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    let pipeline = vpn_pipeline::Pipeline::init(cli.server, &config)
        .await
        .context("failed to initialize vpn pipeline")?;
    let running = pipeline.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    tracing::warn!("ctrl-c received, shutting down");

    running.destroy().await;
    Ok(())
}
