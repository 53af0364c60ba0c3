//! Database statistics overview.
//!
//! Counts pages by type (active and trashed), users, reference entries by
//! kind, shifts and messages, plus the most recent sync run. Served by
//! `GET /api/admin/stats` and printed by `scribe stats`.

use anyhow::Result as AnyResult;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::config::Config;
use crate::db;
use crate::error::Result;
use crate::shift_sync::{self, SyncRun};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub pages: i64,
    pub pages_by_type: BTreeMap<String, i64>,
    pub trashed_pages: i64,
    pub users: i64,
    pub reference_by_kind: BTreeMap<String, i64>,
    pub shifts: i64,
    pub first_shift_date: Option<String>,
    pub last_shift_date: Option<String>,
    pub messages: i64,
    pub last_sync: Option<SyncRun>,
}

async fn count(pool: &SqlitePool, sql: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).fetch_one(pool).await?)
}

async fn grouped(pool: &SqlitePool, sql: &str) -> Result<BTreeMap<String, i64>> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>(0), r.get::<i64, _>(1)))
        .collect())
}

pub async fn collect(pool: &SqlitePool) -> Result<Stats> {
    let pages_by_type = grouped(
        pool,
        "SELECT page_type, COUNT(*) FROM pages WHERE deleted_at IS NULL GROUP BY page_type",
    )
    .await?;
    let reference_by_kind = grouped(
        pool,
        "SELECT kind, COUNT(*) FROM reference_entries GROUP BY kind",
    )
    .await?;
    let span = sqlx::query("SELECT MIN(date) AS first, MAX(date) AS last FROM shifts")
        .fetch_one(pool)
        .await?;

    Ok(Stats {
        pages: pages_by_type.values().sum(),
        pages_by_type,
        trashed_pages: count(pool, "SELECT COUNT(*) FROM pages WHERE deleted_at IS NOT NULL").await?,
        users: count(pool, "SELECT COUNT(*) FROM users").await?,
        reference_by_kind,
        shifts: count(pool, "SELECT COUNT(*) FROM shifts").await?,
        first_shift_date: span.get("first"),
        last_shift_date: span.get("last"),
        messages: count(pool, "SELECT COUNT(*) FROM animated_messages").await?,
        last_sync: shift_sync::recent_runs(pool, 1).await?.into_iter().next(),
    })
}

/// `scribe stats`.
pub async fn run_stats(config: &Config) -> AnyResult<()> {
    let pool = db::connect(config).await?;
    let stats = collect(&pool).await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Scribe Hub Database Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Pages:       {} ({} in trash)", stats.pages, stats.trashed_pages);
    for (page_type, n) in &stats.pages_by_type {
        println!("    {:<14} {:>6}", page_type, n);
    }
    println!("  Users:       {}", stats.users);
    println!("  Reference:");
    for (kind, n) in &stats.reference_by_kind {
        println!("    {:<14} {:>6}", kind, n);
    }
    match (&stats.first_shift_date, &stats.last_shift_date) {
        (Some(first), Some(last)) => {
            println!("  Shifts:      {} ({} to {})", stats.shifts, first, last)
        }
        _ => println!("  Shifts:      {}", stats.shifts),
    }
    println!("  Messages:    {}", stats.messages);

    let last_sync = match &stats.last_sync {
        Some(run) => format!(
            "{} via {} ({} created, {} errors)",
            format_ts_relative(run.finished_at),
            run.source,
            run.created,
            run.errors.len()
        ),
        None => "never".to_string(),
    };
    println!("  Last sync:   {}", last_sync);
    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// "3 hours ago" style rendering of a unix timestamp.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    let plural = |n: i64| if n == 1 { "" } else { "s" };
    match delta {
        d if d < 0 => crate::models::ts(ts).format("%Y-%m-%d %H:%M").to_string(),
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => format!("{} min{} ago", d / 60, plural(d / 60)),
        d if d < 86_400 => format!("{} hour{} ago", d / 3600, plural(d / 3600)),
        d if d < 86_400 * 30 => format!("{} day{} ago", d / 86_400, plural(d / 86_400)),
        _ => crate::models::ts(ts).format("%Y-%m-%d %H:%M").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageType, ReferenceKind};
    use crate::pages::{self, NewPage};
    use crate::reference;
    use tempfile::TempDir;

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86_400), "1 day ago");
    }

    #[tokio::test]
    async fn test_collect_counts() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::open_migrated(&tmp.path().join("stats.sqlite"))
            .await
            .unwrap();

        let empty = collect(&pool).await.unwrap();
        assert_eq!(empty.pages, 0);
        assert!(empty.last_sync.is_none());
        assert!(empty.first_shift_date.is_none());

        let a = pages::create_page(&pool, NewPage::new("Chest Pain", PageType::Procedure), None, 3)
            .await
            .unwrap();
        pages::create_page(&pool, NewPage::new("Welcome", PageType::Wiki), None, 3)
            .await
            .unwrap();
        pages::create_page(&pool, NewPage::new("Triage", PageType::Wiki), None, 3)
            .await
            .unwrap();
        pages::soft_delete(&pool, &a.id, None).await.unwrap();
        reference::find_or_create_by_name(&pool, ReferenceKind::Scribe, "Ana Ruiz")
            .await
            .unwrap();

        let stats = collect(&pool).await.unwrap();
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.trashed_pages, 1);
        assert_eq!(stats.pages_by_type.get("wiki"), Some(&2));
        assert_eq!(stats.reference_by_kind.get("scribe"), Some(&1));
    }
}
