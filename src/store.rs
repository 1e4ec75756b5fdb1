//! Persistence of tiles, tile history and diary entries.
//!
//! [`TileStore`] is the contract the pipeline and the personal-risk adapter
//! depend on; [`SqliteTileStore`] is the shipped engine. The store is the
//! single source of truth: nothing above it caches tiles across runs.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::hexgrid::CellId;
use crate::models::{DiaryEntry, HistoryRecord, NewDiaryEntry, Tile};

// ---

#[async_trait]
pub trait TileStore: Send + Sync {
    async fn get_tile(&self, cell: &CellId) -> Result<Option<Tile>, sqlx::Error>;

    /// Tiles for every listed cell that has one; missing cells are skipped.
    async fn get_tiles(&self, cells: &[CellId]) -> Result<Vec<Tile>, sqlx::Error>;

    /// Replace-or-insert keyed by cell id.
    async fn upsert_tile(&self, tile: &Tile) -> Result<(), sqlx::Error>;

    /// Append a history row snapshotting `tile` at `tile.updated_at`.
    async fn append_history(&self, tile: &Tile) -> Result<HistoryRecord, sqlx::Error>;

    /// Upsert the tile and append its history row as one atomic unit.
    ///
    /// Readers see both writes or neither, and dropping the returned future
    /// before it resolves commits nothing.
    async fn persist_update(&self, tile: &Tile) -> Result<HistoryRecord, sqlx::Error>;

    /// History rows newest first, optionally for a single cell.
    async fn query_history(
        &self,
        cell: Option<&CellId>,
        limit: u32,
    ) -> Result<Vec<HistoryRecord>, sqlx::Error>;

    async fn insert_diary_entry(&self, entry: &NewDiaryEntry) -> Result<DiaryEntry, sqlx::Error>;

    /// Diary entries newest first; `None` returns all of them.
    async fn list_diary_entries(&self, limit: Option<u32>) -> Result<Vec<DiaryEntry>, sqlx::Error>;
}

const TILE_COLUMNS: &str =
    "cell_id, tree_index, grass_index, weed_index, risk_level, air_quality_index, updated_at";

const HISTORY_COLUMNS: &str =
    "id, cell_id, tree_index, grass_index, weed_index, risk_level, air_quality_index, date";

/// SQLite-backed store. Expects `schema::apply_migrations` to have run.
#[derive(Debug, Clone)]
pub struct SqliteTileStore {
    pool: SqlitePool,
}

impl SqliteTileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn upsert_tile_on<'e, E>(executor: E, tile: &Tile) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    // ---
    sqlx::query(
        r#"
        INSERT INTO pollen_tiles (
            cell_id, tree_index, grass_index, weed_index,
            risk_level, air_quality_index, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (cell_id) DO UPDATE SET
            tree_index        = excluded.tree_index,
            grass_index       = excluded.grass_index,
            weed_index        = excluded.weed_index,
            risk_level        = excluded.risk_level,
            air_quality_index = excluded.air_quality_index,
            updated_at        = excluded.updated_at
        "#,
    )
    .bind(&tile.cell_id)
    .bind(tile.tree_index)
    .bind(tile.grass_index)
    .bind(tile.weed_index)
    .bind(tile.risk_level)
    .bind(tile.air_quality_index)
    .bind(tile.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

async fn append_history_on<'e, E>(executor: E, tile: &Tile) -> Result<HistoryRecord, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    // ---
    let result = sqlx::query(
        r#"
        INSERT INTO tile_history (
            cell_id, tree_index, grass_index, weed_index,
            risk_level, air_quality_index, date
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&tile.cell_id)
    .bind(tile.tree_index)
    .bind(tile.grass_index)
    .bind(tile.weed_index)
    .bind(tile.risk_level)
    .bind(tile.air_quality_index)
    .bind(tile.updated_at)
    .execute(executor)
    .await?;

    Ok(HistoryRecord {
        id: result.last_insert_rowid(),
        cell_id: tile.cell_id.clone(),
        tree_index: tile.tree_index,
        grass_index: tile.grass_index,
        weed_index: tile.weed_index,
        risk_level: tile.risk_level,
        air_quality_index: tile.air_quality_index,
        date: tile.updated_at,
    })
}

#[async_trait]
impl TileStore for SqliteTileStore {
    async fn get_tile(&self, cell: &CellId) -> Result<Option<Tile>, sqlx::Error> {
        // ---
        let sql = format!("SELECT {TILE_COLUMNS} FROM pollen_tiles WHERE cell_id = ?");
        sqlx::query_as::<_, Tile>(&sql)
            .bind(cell)
            .fetch_optional(&self.pool)
            .await
    }

    async fn get_tiles(&self, cells: &[CellId]) -> Result<Vec<Tile>, sqlx::Error> {
        // ---
        if cells.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {TILE_COLUMNS} FROM pollen_tiles WHERE cell_id IN ("
        ));
        let mut separated = builder.separated(", ");
        for cell in cells {
            separated.push_bind(cell.clone());
        }
        separated.push_unseparated(") ORDER BY cell_id");

        builder.build_query_as::<Tile>().fetch_all(&self.pool).await
    }

    async fn upsert_tile(&self, tile: &Tile) -> Result<(), sqlx::Error> {
        upsert_tile_on(&self.pool, tile).await
    }

    async fn append_history(&self, tile: &Tile) -> Result<HistoryRecord, sqlx::Error> {
        append_history_on(&self.pool, tile).await
    }

    async fn persist_update(&self, tile: &Tile) -> Result<HistoryRecord, sqlx::Error> {
        // ---
        let mut tx = self.pool.begin().await?;
        upsert_tile_on(&mut *tx, tile).await?;
        let record = append_history_on(&mut *tx, tile).await?;
        tx.commit().await?;

        tracing::debug!("Persisted tile {} with history row {}", tile.cell_id, record.id);
        Ok(record)
    }

    async fn query_history(
        &self,
        cell: Option<&CellId>,
        limit: u32,
    ) -> Result<Vec<HistoryRecord>, sqlx::Error> {
        // ---
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {HISTORY_COLUMNS} FROM tile_history"));
        if let Some(cell) = cell {
            builder.push(" WHERE cell_id = ").push_bind(cell.clone());
        }
        builder
            .push(" ORDER BY date DESC, id DESC LIMIT ")
            .push_bind(i64::from(limit));

        builder
            .build_query_as::<HistoryRecord>()
            .fetch_all(&self.pool)
            .await
    }

    async fn insert_diary_entry(&self, entry: &NewDiaryEntry) -> Result<DiaryEntry, sqlx::Error> {
        // ---
        let result = sqlx::query(
            r#"
            INSERT INTO diary_entries (date, feeling_score, symptoms, cell_id)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(entry.date)
        .bind(entry.feeling_score)
        .bind(&entry.symptoms)
        .bind(&entry.cell_id)
        .execute(&self.pool)
        .await?;

        Ok(DiaryEntry {
            id: result.last_insert_rowid(),
            date: entry.date,
            feeling_score: entry.feeling_score,
            symptoms: entry.symptoms.clone(),
            cell_id: entry.cell_id.clone(),
        })
    }

    async fn list_diary_entries(&self, limit: Option<u32>) -> Result<Vec<DiaryEntry>, sqlx::Error> {
        // ---
        // SQLite treats a negative LIMIT as "no limit"
        let limit = limit.map(i64::from).unwrap_or(-1);

        sqlx::query_as::<_, DiaryEntry>(
            r#"
            SELECT id, date, feeling_score, symptoms, cell_id
            FROM diary_entries
            ORDER BY date DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
