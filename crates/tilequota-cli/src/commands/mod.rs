//! CLI command definitions and dispatch.

pub mod admin;
pub mod config;
pub mod inspect;
pub mod migrate;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use tilequota_core::clock::SystemClock;
use tilequota_core::config::AppConfig;
use tilequota_core::error::AppError;
use tilequota_service::StaticLayerCatalog;
use tilequota_store::{QuotaStore, QuotaStoreManager, TilePageCalculator};

use crate::output::OutputFormat;

/// tilequota: disk quota administration for the tile cache
#[derive(Debug, Parser)]
#[command(name = "tilequota", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Configuration management
    Config(config::ConfigArgs),
    /// Used and allowed bytes per layer
    Usage(inspect::UsageArgs),
    /// Tracked tile sets
    Tilesets(inspect::TileSetsArgs),
    /// Next page an expiration policy would evict
    Candidate(inspect::CandidateArgs),
    /// Forget every tile set of a layer
    DeleteLayer(admin::DeleteLayerArgs),
    /// Forget the tile sets of one gridset of a layer
    DeleteGridset(admin::DeleteGridsetArgs),
    /// Forget the tile sets of one parameter variant of a layer
    DeleteParameters(admin::DeleteParametersArgs),
    /// Move a layer's counters and statistics to a new name
    RenameLayer(admin::RenameLayerArgs),
    /// Reconcile tracked tile sets with the configured layers
    Reconcile(admin::ReconcileArgs),
    /// Database migration management
    Migrate(migrate::MigrateArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        match &self.command {
            Commands::Config(args) => config::execute(args, &self.config, self.format).await,
            Commands::Usage(args) => inspect::usage(args, &self.config, self.format).await,
            Commands::Tilesets(args) => inspect::tile_sets(args, &self.config, self.format).await,
            Commands::Candidate(args) => inspect::candidate(args, &self.config, self.format).await,
            Commands::DeleteLayer(args) => admin::delete_layer(args, &self.config).await,
            Commands::DeleteGridset(args) => admin::delete_gridset(args, &self.config).await,
            Commands::DeleteParameters(args) => admin::delete_parameters(args, &self.config).await,
            Commands::RenameLayer(args) => admin::rename_layer(args, &self.config).await,
            Commands::Reconcile(args) => admin::reconcile(args, &self.config).await,
            Commands::Migrate(args) => migrate::execute(args, &self.config).await,
        }
    }
}

/// Helper: load configuration from file
pub fn load_config(config_path: &str) -> Result<AppConfig, AppError> {
    AppConfig::load(config_path)
}

/// An opened quota store together with the catalog it was built over.
pub struct StoreContext {
    pub config: AppConfig,
    pub calculator: TilePageCalculator,
    pub store: QuotaStoreManager,
}

impl StoreContext {
    /// Open the configured store over the `[[layers]]` catalog.
    pub async fn open(config_path: &str) -> Result<Self, AppError> {
        let config = load_config(config_path)?;
        let catalog = Arc::new(StaticLayerCatalog::from_config(&config.layers));
        let calculator = TilePageCalculator::new(catalog, config.paging.clone());
        debug!(provider = %config.store.provider, layers = config.layers.len(), "Opening quota store");
        let store = QuotaStoreManager::new(
            &config.store,
            &config.database,
            calculator.clone(),
            Arc::new(SystemClock),
        )
        .await?;
        Ok(Self {
            config,
            calculator,
            store,
        })
    }

    /// Flush pending writes and release the store.
    pub async fn close(self) -> Result<(), AppError> {
        self.store.destroy().await
    }
}

/// Ask for confirmation unless `yes` is set.
pub fn confirm(prompt: &str, yes: bool) -> Result<bool, AppError> {
    if yes {
        return Ok(true);
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| AppError::internal(format!("Input error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_delete_gridset() {
        let cli = Cli::try_parse_from([
            "tilequota",
            "--format",
            "json",
            "delete-gridset",
            "roads",
            "EPSG:4326",
            "--yes",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::DeleteGridset(args) => {
                assert_eq!(args.layer, "roads");
                assert_eq!(args.gridset, "EPSG:4326");
                assert!(args.yes);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parses_candidate_layers() {
        let cli = Cli::try_parse_from([
            "tilequota", "candidate", "--policy", "LRU", "roads", "rivers",
        ])
        .unwrap();
        match cli.command {
            Commands::Candidate(args) => {
                assert_eq!(args.policy, "LRU");
                assert_eq!(args.layers, vec!["roads", "rivers"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
