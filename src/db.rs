use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    open(&config.db.path).await
}

/// Open (creating if needed) the SQLite database at `db_path`.
pub async fn open(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5))
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open a database and bring its schema up to date.
pub async fn open_migrated(db_path: &Path) -> Result<SqlitePool> {
    let pool = open(db_path).await?;
    crate::migrate::apply(&pool).await?;
    Ok(pool)
}
