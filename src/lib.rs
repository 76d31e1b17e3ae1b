pub mod cli;
pub mod core;
pub mod providers;

pub use cli::convert::ConvertOptions;

use anyhow::Result;
use tracing::{debug, info};

pub enum AppCommand {
    Convert(ConvertOptions),
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("stockfx starting...");

    let config = match config_path {
        Some(path) => crate::core::config::AppConfig::load_from_path(path)?,
        None => crate::core::config::AppConfig::load()?,
    };
    debug!(
        ticker = %config.ticker,
        mode = ?config.mode,
        target_currency = %config.target_currency,
        "Loaded config"
    );

    match command {
        AppCommand::Convert(options) => cli::convert::run(config, &options).await,
    }
}
