//! Tile page and page statistics repository.

use sqlx::{FromRow, PgConnection, PgPool};

use tilequota_core::error::{AppError, ErrorKind};
use tilequota_core::result::AppResult;
use tilequota_entity::page::TilePage;
use tilequota_entity::policy::PolicyKind;
use tilequota_entity::stats::PageStats;
use tilequota_entity::tileset::{TileSet, TileSetId};

const PAGE_COLUMNS: &str = "t.layer_name, t.gridset_id, t.blob_format, t.parameters_id, \
     p.page_x, p.page_y, p.zoom_level, p.num_hits, p.frequency_of_use, \
     p.last_access_time_minutes, p.creation_time_minutes, p.tile_count, p.fill_factor";

/// A `tilepage` row joined with its tile set identity.
#[derive(Debug, Clone, FromRow)]
struct PageRow {
    layer_name: String,
    gridset_id: String,
    blob_format: String,
    parameters_id: Option<String>,
    page_x: i64,
    page_y: i64,
    zoom_level: i16,
    num_hits: i64,
    frequency_of_use: Option<f32>,
    last_access_time_minutes: i64,
    creation_time_minutes: i64,
    tile_count: i64,
    fill_factor: f32,
}

impl PageRow {
    fn into_stats(self) -> AppResult<PageStats> {
        let id = TileSet::new(self.layer_name, self.gridset_id, self.blob_format, self.parameters_id)
            .id();
        let coordinate = |value: i64, name: &str| {
            u32::try_from(value)
                .map_err(|_| AppError::internal(format!("Page {name} {value} out of range")))
        };
        let zoom_level = u8::try_from(self.zoom_level)
            .map_err(|_| AppError::internal(format!("Zoom level {} out of range", self.zoom_level)))?;
        let page = TilePage::new(
            id,
            coordinate(self.page_x, "column")?,
            coordinate(self.page_y, "row")?,
            zoom_level,
        );
        Ok(PageStats {
            page,
            num_hits: self.num_hits.max(0) as u64,
            frequency_of_use: self.frequency_of_use,
            last_access_time_minutes: self.last_access_time_minutes,
            creation_time_minutes: self.creation_time_minutes,
            tile_count: self.tile_count.max(0) as u64,
            fill_factor: self.fill_factor,
        })
    }
}

/// Repository for pages and their statistics.
#[derive(Debug, Clone)]
pub struct TilePageRepository {
    pool: PgPool,
}

impl TilePageRepository {
    /// Create a new tile page repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find the statistics of a page.
    pub async fn find(&self, page: &TilePage) -> AppResult<Option<PageStats>> {
        let sql = format!(
            "SELECT {PAGE_COLUMNS} FROM tilepage p JOIN tileset t ON t.key = p.tileset_key \
             WHERE p.key = $1"
        );
        sqlx::query_as::<_, PageRow>(&sql)
            .bind(page.key())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to find page", e))?
            .map(PageRow::into_stats)
            .transpose()
    }

    /// Lock a page row for update and return its statistics.
    pub async fn lock(
        &self,
        conn: &mut PgConnection,
        page: &TilePage,
    ) -> AppResult<Option<PageStats>> {
        let sql = format!(
            "SELECT {PAGE_COLUMNS} FROM tilepage p JOIN tileset t ON t.key = p.tileset_key \
             WHERE p.key = $1 FOR UPDATE OF p"
        );
        sqlx::query_as::<_, PageRow>(&sql)
            .bind(page.key())
            .fetch_optional(conn)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to lock page", e))?
            .map(PageRow::into_stats)
            .transpose()
    }

    /// Insert or overwrite the statistics of a page.
    pub async fn upsert(&self, conn: &mut PgConnection, stats: &PageStats) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO tilepage (key, tileset_key, page_x, page_y, zoom_level, num_hits, \
             frequency_of_use, last_access_time_minutes, creation_time_minutes, tile_count, fill_factor) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (key) DO UPDATE SET num_hits = EXCLUDED.num_hits, \
             frequency_of_use = EXCLUDED.frequency_of_use, \
             last_access_time_minutes = EXCLUDED.last_access_time_minutes, \
             tile_count = EXCLUDED.tile_count, fill_factor = EXCLUDED.fill_factor",
        )
        .bind(stats.page.key())
        .bind(stats.page.tile_set_id.key())
        .bind(i64::from(stats.page.page_x))
        .bind(i64::from(stats.page.page_y))
        .bind(i16::from(stats.page.zoom_level))
        .bind(i64::try_from(stats.num_hits).unwrap_or(i64::MAX))
        .bind(stats.frequency_of_use)
        .bind(stats.last_access_time_minutes)
        .bind(stats.creation_time_minutes)
        .bind(i64::try_from(stats.tile_count).unwrap_or(i64::MAX))
        .bind(stats.fill_factor)
        .execute(conn)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to save page", e))?;
        Ok(())
    }

    /// Delete a page. Returns `true` if it existed.
    pub async fn delete(&self, conn: &mut PgConnection, page: &TilePage) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM tilepage WHERE key = $1")
            .bind(page.key())
            .execute(conn)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to delete page", e))?;
        Ok(result.rows_affected() > 0)
    }

    /// The least valuable page holding tiles among the given layers.
    ///
    /// Ties are broken like the in-process policies: higher zoom first, then
    /// tile set identity and page coordinates.
    pub async fn find_candidate(
        &self,
        kind: PolicyKind,
        layer_names: &[String],
    ) -> AppResult<Option<PageStats>> {
        let primary = match kind {
            PolicyKind::LeastRecentlyUsed => "p.last_access_time_minutes ASC",
            PolicyKind::LeastFrequentlyUsed => "p.num_hits ASC",
        };
        let sql = format!(
            "SELECT {PAGE_COLUMNS} FROM tilepage p JOIN tileset t ON t.key = p.tileset_key \
             WHERE p.tile_count > 0 AND t.layer_name = ANY($1) \
             ORDER BY {primary}, p.zoom_level DESC, \
             t.layer_name COLLATE \"C\", t.gridset_id COLLATE \"C\", \
             t.blob_format COLLATE \"C\", t.parameters_id COLLATE \"C\" NULLS FIRST, \
             p.page_x, p.page_y LIMIT 1"
        );
        sqlx::query_as::<_, PageRow>(&sql)
            .bind(layer_names)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find expiration candidate", e)
            })?
            .map(PageRow::into_stats)
            .transpose()
    }

    /// Move every page of one tile set under another tile set key.
    pub async fn reassign(
        &self,
        conn: &mut PgConnection,
        from: &TileSetId,
        to: &TileSetId,
    ) -> AppResult<u64> {
        let from_key = from.key();
        let result = sqlx::query(
            "UPDATE tilepage SET tileset_key = $2, key = $2 || substr(key, length($1) + 1) \
             WHERE tileset_key = $1",
        )
        .bind(&from_key)
        .bind(to.key())
        .execute(conn)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to move pages", e))?;
        Ok(result.rows_affected())
    }
}
