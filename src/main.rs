use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rss_relay::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "rss-relay",
    version,
    about = "Fetches RSS feeds, summarizes new items with Google Gemini and republishes them"
)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(value_name = "CONFIG_FILEPATH")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Error: failed to load config '{}': {}",
                args.config.display(),
                e
            );
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the config's verbosity
    let default_level = if config.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        path = %args.config.display(),
        feeds = config.feeds.len(),
        "Loaded configuration"
    );

    tracing::debug!(config = ?config, "Starting");

    if let Err(e) = rss_relay::run::run(config).await {
        tracing::error!("Exiting: {e:#}");
        std::process::exit(1);
    }
}
