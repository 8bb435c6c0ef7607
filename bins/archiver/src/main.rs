mod cmd;
mod config;
mod error;
mod prometheus;

use clap::Parser;
use config::{ArchiverConfig, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ArchiverConfig::load(&cli.args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = cmd::run::run(config).await {
        tracing::error!(error = %e, "archiver stopped");
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}
