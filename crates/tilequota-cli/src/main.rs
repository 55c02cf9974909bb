//! tilequota CLI entry point.

use clap::Parser;

use tilequota_core::config::{AppConfig, LoggingConfig, logging};

mod commands;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configured = AppConfig::load(&cli.config)
        .map(|c| c.logging)
        .unwrap_or_default();
    logging::init(&LoggingConfig {
        level: cli.log_level.clone(),
        ..configured
    });

    if let Err(e) = cli.execute().await {
        output::print_error(&e.to_string());
        std::process::exit(1);
    }
}
