//! Application configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from a
//! TOML file overlaid with `TILEQUOTA__*` environment variables. Each
//! sub-module represents a logical configuration section.

pub mod database;
pub mod diskquota;
pub mod layer;
pub mod logging;
pub mod paging;
pub mod store;

use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

pub use self::database::DatabaseConfig;
pub use self::diskquota::{ConfigChange, DiskQuotaConfig, LayerQuota, TimeUnit};
pub use self::layer::LayerConfig;
pub use self::logging::LoggingConfig;
pub use self::paging::{DEFAULT_PAGE_BLOCK_SIZE, PageSizing, PagingConfig};
pub use self::store::StoreConfig;

use crate::error::AppError;

/// Environment variable that disables quota enforcement regardless of the
/// configured `diskquota.enabled` flag.
pub const DISKQUOTA_DISABLED_ENV: &str = "DISKQUOTA_DISABLED";

/// Environment variable naming the configuration overlay to load.
pub const CONFIG_ENV: &str = "TILEQUOTA_ENV";

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database connection settings (used by the `postgres` store).
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Quota store selection.
    #[serde(default)]
    pub store: StoreConfig,
    /// Page geometry.
    #[serde(default)]
    pub paging: PagingConfig,
    /// Disk quota limits and cleanup schedule.
    #[serde(default)]
    pub diskquota: DiskQuotaConfig,
    /// Statically configured layers.
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// The file is optional. When `TILEQUOTA_ENV` is set, `{env}.toml` next
    /// to it is layered on top; environment variables prefixed with
    /// `TILEQUOTA__` (e.g. `TILEQUOTA__DISKQUOTA__ENABLED=true`) override both.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let mut builder =
            config::Config::builder().add_source(config::File::with_name(path).required(false));
        if let Ok(env) = std::env::var(CONFIG_ENV) {
            let overlay = Path::new(path).with_file_name(format!("{env}.toml"));
            builder = builder.add_source(config::File::from(overlay).required(false));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("TILEQUOTA")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: AppConfig = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config.paging.validate()?;
        Ok(config)
    }
}

/// Whether quota enforcement is switched off through the environment.
pub fn disabled_by_env() -> bool {
    std::env::var(DISKQUOTA_DISABLED_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
