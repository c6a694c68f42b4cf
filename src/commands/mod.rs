//! Subcommand implementations

pub mod backtest;
pub mod optimize;
pub mod params;

use anyhow::Result;
use signal_tuner::Config;
use tracing::info;

/// Config from a file when given, otherwise defaults plus environment
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            let config = Config::from_file(path)?;
            info!("Loaded configuration from: {}", path);
            Ok(config)
        }
        None => {
            info!("No config file given; using defaults");
            Config::from_env()
        }
    }
}
