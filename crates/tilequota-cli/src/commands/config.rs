//! Configuration management CLI commands.

use clap::{Args, Subcommand};

use tilequota_core::error::AppError;
use tilequota_database::connection::redact_url;
use tilequota_entity::policy::PolicyRegistry;

use crate::output::{self, OutputFormat};

/// Arguments for config commands
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}

/// Execute config commands
pub async fn execute(
    args: &ConfigArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    match &args.command {
        ConfigCommand::Show => {
            let mut config = super::load_config(config_path)?;
            config.database.url = redact_url(&config.database.url);
            output::print_item(&config, format);
        }
        ConfigCommand::Validate => {
            let config = match super::load_config(config_path) {
                Ok(config) => config,
                Err(e) => {
                    output::print_error(&format!("Configuration invalid: {e}"));
                    return Err(e);
                }
            };

            let policies = PolicyRegistry::with_defaults();
            let names = policies.names();
            let known: Vec<&str> = names.iter().map(String::as_str).collect();
            if let Err(e) = config.diskquota.check(&known) {
                output::print_error(&format!("Disk quota configuration invalid: {e}"));
                return Err(e);
            }

            let quota = &config.diskquota;
            output::print_success(&format!("Configuration '{config_path}' is valid"));
            output::print_kv("Store", &config.store.provider);
            if config.store.provider == "postgres" {
                output::print_kv("Database", &redact_url(&config.database.url));
            }
            output::print_kv("Enabled", &quota.enabled.to_string());
            output::print_kv(
                "Cleanup interval",
                &format!("{}s", quota.cleanup_interval().as_secs()),
            );
            output::print_kv(
                "Global quota",
                &quota
                    .global_quota
                    .map(|q| q.to_string())
                    .unwrap_or_else(|| "none".to_string()),
            );
            output::print_kv("Layer quotas", &quota.layer_quotas.len().to_string());
            output::print_kv("Layers", &config.layers.len().to_string());
            if tilequota_core::config::disabled_by_env() {
                output::print_warning("Disk quota is disabled through the environment");
            }
        }
    }

    Ok(())
}
