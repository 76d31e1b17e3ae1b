use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use stockfx::core::log::init_logging;
use stockfx::core::market::Timespan;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// Also append logs to this file, e.g. logs/app.log
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch prices and convert them into the target currency
    Convert {
        /// Ticker to fetch instead of the configured one
        #[arg(short, long)]
        ticker: Option<String>,

        /// Currency to convert into instead of the configured one
        #[arg(short = 'T', long = "target")]
        target_currency: Option<String>,

        /// Bar size, e.g. minute, hour or day
        #[arg(long)]
        timespan: Option<Timespan>,

        /// Use the latest prices and rates instead of the configured range
        #[arg(short, long)]
        latest: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_file.as_deref())?;

    let result = match cli.command {
        Some(Commands::Setup) => stockfx::cli::setup::setup(),
        Some(Commands::Convert {
            ticker,
            target_currency,
            timespan,
            latest,
            json,
        }) => {
            let options = stockfx::ConvertOptions {
                ticker,
                target_currency,
                timespan,
                latest,
                json,
            };
            stockfx::run_command(
                stockfx::AppCommand::Convert(options),
                cli.config_path.as_deref(),
            )
            .await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
