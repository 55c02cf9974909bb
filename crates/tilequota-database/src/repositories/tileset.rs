//! Tile set and usage counter repository.

use sqlx::{FromRow, PgConnection, PgPool};

use tilequota_core::error::{AppError, ErrorKind};
use tilequota_core::result::AppResult;
use tilequota_core::types::Quota;
use tilequota_entity::tileset::{TileSet, TileSetId};

use super::parse_bytes;

/// A `tileset` row without its counter.
#[derive(Debug, Clone, FromRow)]
struct TileSetRow {
    layer_name: String,
    gridset_id: String,
    blob_format: String,
    parameters_id: Option<String>,
}

impl From<TileSetRow> for TileSet {
    fn from(row: TileSetRow) -> Self {
        TileSet::new(row.layer_name, row.gridset_id, row.blob_format, row.parameters_id)
    }
}

/// A tile set together with the bytes it currently uses.
#[derive(Debug, Clone, FromRow)]
struct UsageRow {
    layer_name: String,
    gridset_id: String,
    blob_format: String,
    parameters_id: Option<String>,
    bytes: String,
}

/// Repository for tile sets and their byte counters.
#[derive(Debug, Clone)]
pub struct TileSetRepository {
    pool: PgPool,
}

impl TileSetRepository {
    /// Create a new tile set repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the global counter row if missing.
    pub async fn ensure_global(&self, conn: &mut PgConnection) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO tileset (key, layer_name, gridset_id, blob_format, parameters_id, bytes) \
             VALUES ($1, '', '', '', NULL, 0) ON CONFLICT (key) DO NOTHING",
        )
        .bind(TileSetId::GLOBAL_KEY)
        .execute(conn)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to create global quota row", e)
        })?;
        Ok(())
    }

    /// List every tracked tile set.
    pub async fn find_all(&self) -> AppResult<Vec<TileSet>> {
        let rows = sqlx::query_as::<_, TileSetRow>(
            "SELECT layer_name, gridset_id, blob_format, parameters_id FROM tileset \
             WHERE key <> $1 ORDER BY key",
        )
        .bind(TileSetId::GLOBAL_KEY)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list tile sets", e))?;
        Ok(rows.into_iter().map(TileSet::from).collect())
    }

    /// List every tracked tile set with its used bytes.
    pub async fn find_all_with_usage(&self) -> AppResult<Vec<(TileSet, Quota)>> {
        let rows = sqlx::query_as::<_, UsageRow>(
            "SELECT layer_name, gridset_id, blob_format, parameters_id, bytes::text AS bytes \
             FROM tileset WHERE key <> $1 ORDER BY key",
        )
        .bind(TileSetId::GLOBAL_KEY)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list tile set usage", e))?;

        rows.into_iter()
            .map(|row| {
                let bytes = parse_bytes(&row.bytes)?;
                let tile_set =
                    TileSet::new(row.layer_name, row.gridset_id, row.blob_format, row.parameters_id);
                Ok((tile_set, bytes))
            })
            .collect()
    }

    /// Find a tile set by key.
    pub async fn find_by_id(&self, id: &TileSetId) -> AppResult<Option<TileSet>> {
        let row = sqlx::query_as::<_, TileSetRow>(
            "SELECT layer_name, gridset_id, blob_format, parameters_id FROM tileset WHERE key = $1",
        )
        .bind(id.key())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find tile set", e))?;
        Ok(row.map(TileSet::from))
    }

    /// List the tile sets of a layer.
    pub async fn find_by_layer(
        &self,
        conn: &mut PgConnection,
        layer_name: &str,
    ) -> AppResult<Vec<(TileSet, Quota)>> {
        let rows = sqlx::query_as::<_, UsageRow>(
            "SELECT layer_name, gridset_id, blob_format, parameters_id, bytes::text AS bytes \
             FROM tileset WHERE layer_name = $1 AND key <> $2 FOR UPDATE",
        )
        .bind(layer_name)
        .bind(TileSetId::GLOBAL_KEY)
        .fetch_all(conn)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to list layer tile sets", e)
        })?;

        rows.into_iter()
            .map(|row| {
                let bytes = parse_bytes(&row.bytes)?;
                let tile_set =
                    TileSet::new(row.layer_name, row.gridset_id, row.blob_format, row.parameters_id);
                Ok((tile_set, bytes))
            })
            .collect()
    }

    /// Insert a tile set with a zero counter. Returns `false` if it existed.
    pub async fn insert_if_absent(
        &self,
        conn: &mut PgConnection,
        tile_set: &TileSet,
        bytes: Quota,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT INTO tileset (key, layer_name, gridset_id, blob_format, parameters_id, bytes) \
             VALUES ($1, $2, $3, $4, $5, $6::numeric) ON CONFLICT (key) DO NOTHING",
        )
        .bind(tile_set.id().key())
        .bind(&tile_set.layer_name)
        .bind(&tile_set.gridset_id)
        .bind(&tile_set.blob_format)
        .bind(&tile_set.parameters_id)
        .bind(bytes.bytes().to_string())
        .execute(conn)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create tile set", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// Lock a counter row for update and return its bytes.
    ///
    /// Pass [`TileSetId::GLOBAL_KEY`] to lock the global counter.
    pub async fn lock_bytes(&self, conn: &mut PgConnection, key: &str) -> AppResult<Option<Quota>> {
        let bytes: Option<String> =
            sqlx::query_scalar("SELECT bytes::text FROM tileset WHERE key = $1 FOR UPDATE")
                .bind(key)
                .fetch_optional(conn)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to lock quota row", e)
                })?;
        bytes.as_deref().map(parse_bytes).transpose()
    }

    /// Overwrite a counter.
    pub async fn set_bytes(&self, conn: &mut PgConnection, key: &str, bytes: Quota) -> AppResult<()> {
        sqlx::query("UPDATE tileset SET bytes = $2::numeric WHERE key = $1")
            .bind(key)
            .bind(bytes.bytes().to_string())
            .execute(conn)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to update quota", e))?;
        Ok(())
    }

    /// Bytes used by one counter row, zero if absent.
    pub async fn used_by_key(&self, key: &str) -> AppResult<Quota> {
        let bytes: Option<String> =
            sqlx::query_scalar("SELECT bytes::text FROM tileset WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to read used quota", e)
                })?;
        Ok(bytes.as_deref().map(parse_bytes).transpose()?.unwrap_or(Quota::ZERO))
    }

    /// Bytes used by all tile sets of a layer.
    pub async fn used_by_layer(&self, layer_name: &str) -> AppResult<Quota> {
        let bytes: String = sqlx::query_scalar(
            "SELECT COALESCE(SUM(bytes), 0)::text FROM tileset WHERE layer_name = $1 AND key <> $2",
        )
        .bind(layer_name)
        .bind(TileSetId::GLOBAL_KEY)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to read layer quota", e)
        })?;
        parse_bytes(&bytes)
    }

    /// Sum of every per-tile-set counter.
    pub async fn sum_all(&self, conn: &mut PgConnection) -> AppResult<Quota> {
        let bytes: String = sqlx::query_scalar(
            "SELECT COALESCE(SUM(bytes), 0)::text FROM tileset WHERE key <> $1",
        )
        .bind(TileSetId::GLOBAL_KEY)
        .fetch_one(conn)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to sum quotas", e))?;
        parse_bytes(&bytes)
    }

    /// Delete a tile set; its pages cascade. Returns the bytes it held.
    pub async fn delete(&self, conn: &mut PgConnection, id: &TileSetId) -> AppResult<Quota> {
        let bytes: Option<String> =
            sqlx::query_scalar("DELETE FROM tileset WHERE key = $1 RETURNING bytes::text")
                .bind(id.key())
                .fetch_optional(conn)
                .await
                .map_err(|e| {
                    AppError::with_source(ErrorKind::Database, "Failed to delete tile set", e)
                })?;
        Ok(bytes.as_deref().map(parse_bytes).transpose()?.unwrap_or(Quota::ZERO))
    }
}
