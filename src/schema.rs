//! Database schema management for `pollenflow`.
//!
//! The schema evolves through an ordered list of additive migrations. Each
//! one runs in its own transaction together with its `schema_migrations`
//! bookkeeping row, so a crash mid-migration leaves the previous version
//! intact. Applied once on startup from `main.rs` (single gateway call).

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

// ---

/// One schema step. Steps are never edited once released, only appended.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

/// Registry of all migrations in version order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "pollen_tiles and diary_entries",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS pollen_tiles (
                cell_id     TEXT PRIMARY KEY,
                tree_index  REAL NOT NULL,
                grass_index REAL NOT NULL,
                weed_index  REAL NOT NULL,
                risk_level  REAL NOT NULL,
                updated_at  TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS diary_entries (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                date          TEXT    NOT NULL,
                feeling_score INTEGER NOT NULL CHECK (feeling_score BETWEEN 0 AND 5),
                symptoms      TEXT,
                cell_id       TEXT    NOT NULL
            );
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_diary_entries_date
                ON diary_entries (date);
            "#,
        ],
    },
    Migration {
        version: 2,
        description: "append-only tile_history",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS tile_history (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                cell_id     TEXT NOT NULL,
                tree_index  REAL NOT NULL,
                grass_index REAL NOT NULL,
                weed_index  REAL NOT NULL,
                risk_level  REAL NOT NULL,
                date        TEXT NOT NULL
            );
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_tile_history_cell_date
                ON tile_history (cell_id, date);
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_tile_history_date
                ON tile_history (date);
            "#,
        ],
    },
    Migration {
        version: 3,
        description: "optional air_quality_index on tiles and history",
        statements: &[
            "ALTER TABLE pollen_tiles ADD COLUMN air_quality_index INTEGER;",
            "ALTER TABLE tile_history ADD COLUMN air_quality_index INTEGER;",
        ],
    },
];

/// Bring the database up to the latest schema version (idempotent).
///
/// Safe to call on every startup; already applied versions are skipped.
/// Returns the number of migrations applied by this call.
pub async fn apply_migrations(pool: &SqlitePool) -> Result<usize> {
    // ---
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL,
            description TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    let mut applied = 0;
    for migration in MIGRATIONS {
        let exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations WHERE version = ?")
                .bind(migration.version)
                .fetch_one(pool)
                .await?;
        if exists > 0 {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(*statement)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("migration {} failed", migration.version))?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(Utc::now())
            .bind(migration.description)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            "Applied migration {}: {}",
            migration.version,
            migration.description
        );
        applied += 1;
    }

    Ok(applied)
}

/// Highest applied schema version, 0 for an empty database.
pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    // ---
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}
