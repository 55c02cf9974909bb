//! Embedded schema migrations for the `tileset` and `tilepage` tables.

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::info;

use tilequota_core::error::{AppError, ErrorKind};

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Number of migrations bundled into the binary.
pub fn bundled_migrations() -> usize {
    MIGRATOR.iter().count()
}

/// Apply pending migrations. Already applied ones are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), AppError> {
    info!(bundled = bundled_migrations(), "Applying quota schema migrations");

    MIGRATOR.run(pool).await.map_err(|e| {
        AppError::with_source(
            ErrorKind::Database,
            format!("Failed to run migrations: {e}"),
            e,
        )
    })?;

    info!("Quota schema is up to date");
    Ok(())
}
