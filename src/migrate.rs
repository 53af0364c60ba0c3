use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('ADMIN', 'EDITOR')),
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create pages table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            content_json TEXT NOT NULL,
            content_text TEXT NOT NULL DEFAULT '',
            page_type TEXT NOT NULL,
            parent_id TEXT REFERENCES pages(id) ON DELETE CASCADE,
            order_key TEXT NOT NULL,
            icon TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            deleted_at INTEGER,
            trash_batch TEXT,
            view_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            created_by TEXT,
            updated_by TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before trash batches: group old trash by timestamp.
    let has_trash_batch: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('pages') WHERE name = 'trash_batch'",
    )
    .fetch_one(pool)
    .await?;
    if !has_trash_batch {
        sqlx::query("ALTER TABLE pages ADD COLUMN trash_batch TEXT")
            .execute(pool)
            .await?;
        sqlx::query(
            "UPDATE pages SET trash_batch = CAST(deleted_at AS TEXT) WHERE deleted_at IS NOT NULL",
        )
        .execute(pool)
        .await?;
    }

    // Active siblings must have distinct order keys. NULL parents are
    // folded to '' so root pages are covered too.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_sibling_order
        ON pages (COALESCE(parent_id, ''), order_key)
        WHERE deleted_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='pages_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE pages_fts USING fts5(
                page_id UNINDEXED,
                title,
                content_text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Reference entities (scribes, providers, physicians, terminology)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reference_entries (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            slug TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(kind, slug)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Shifts. The natural key is looked up by the sync pipeline rather than
    // enforced here; duplicate cleanup handles rows that slip through.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shifts (
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            label TEXT NOT NULL,
            zone TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            site TEXT,
            scribe_id TEXT REFERENCES reference_entries(id) ON DELETE SET NULL,
            provider_id TEXT REFERENCES reference_entries(id) ON DELETE SET NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS animated_messages (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            style TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            starts_at INTEGER,
            ends_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per shift sync run
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            fetched INTEGER NOT NULL,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            unchanged INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            errors_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_parent_id ON pages(parent_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_page_type ON pages(page_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_deleted_at ON pages(deleted_at)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_reference_name ON reference_entries(kind, name COLLATE NOCASE)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_shifts_natural_key
        ON shifts (date, label, start_time, end_time, scribe_id, provider_id)
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_shifts_zone ON shifts(date, zone)")
        .execute(pool)
        .await?;

    Ok(())
}
