//! themesync - color theme harvesting.
//!
//! This is the main entry point, which:
//! - Loads configuration from TOML
//! - Initializes logging
//! - Runs one harvesting or maintenance command

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use themesync_engine::config::{HarvestConfig, locate_config, xdg_config_dir};
use themesync_engine::marketplace::{HarvestCommand, execute};

/// themesync - color theme harvesting from the extension gallery
#[derive(Parser, Debug)]
#[command(name = "themesync")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Run in verbose mode (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the listing page size
    #[arg(long, value_name = "N", global = true)]
    page_size: Option<u32>,

    /// Override the number of listing pages fetched
    #[arg(long, value_name = "N", global = true)]
    max_pages: Option<u32>,

    /// Hide progress bars
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: HarvestCommand,
}

/// Load configuration from the given path or default locations.
fn load_config(path: Option<PathBuf>) -> Result<HarvestConfig> {
    let working_dir = std::env::current_dir().context("Failed to read working directory")?;
    let xdg = xdg_config_dir();

    match locate_config(path.as_deref(), &working_dir, xdg.as_deref()) {
        Some(config_path) => {
            info!("Loading configuration from {}", config_path.display());
            Ok(HarvestConfig::load(&config_path)?)
        }
        None => {
            info!("No configuration file found, using defaults");
            Ok(HarvestConfig::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        args.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let mut config = load_config(args.config).context("Failed to load configuration")?;
    if let Some(page_size) = args.page_size {
        config.listing.page_size = page_size;
    }
    if let Some(max_pages) = args.max_pages {
        config.listing.max_pages = max_pages;
    }
    config.validate().context("Invalid configuration")?;

    execute(args.command, &config, !args.no_progress)
        .await
        .context("Command failed")?;
    Ok(())
}
