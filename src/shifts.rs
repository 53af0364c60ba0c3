//! Shift store: daily and range queries, the zone board, natural-key
//! upserts and duplicate maintenance.
//!
//! The natural key of a shift is `(date, label, start_time, end_time,
//! scribe_id, provider_id)`. [`upsert_shift`] looks it up before writing;
//! there is no unique constraint, so rows imported before the key existed
//! are found and removed by [`find_duplicates`] / [`clean_duplicates`].

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ShiftsConfig;
use crate::error::{Error, Result};
use crate::models::{ts, PersonRef, Shift};

/// Longest inclusive range accepted by [`shifts_in_range`].
pub const MAX_RANGE_DAYS: i64 = 93;

const SELECT_SHIFTS: &str = r#"
    SELECT s.id, s.date, s.label, s.zone, s.start_time, s.end_time, s.site,
           s.created_at, s.updated_at,
           sc.id AS scribe_ref_id, sc.name AS scribe_name, sc.slug AS scribe_slug,
           pr.id AS provider_ref_id, pr.name AS provider_name, pr.slug AS provider_slug
    FROM shifts s
    LEFT JOIN reference_entries sc ON sc.id = s.scribe_id
    LEFT JOIN reference_entries pr ON pr.id = s.provider_id
"#;

/// A shift ready to be written, as produced by the sync pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedShift {
    pub date: NaiveDate,
    pub label: String,
    pub zone: String,
    pub start_time: String,
    pub end_time: String,
    pub site: Option<String>,
    pub scribe_id: Option<String>,
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Optional narrowing for shift queries. People are matched by slug.
#[derive(Debug, Clone, Default)]
pub struct ShiftFilter {
    pub zone: Option<String>,
    pub scribe: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneColumn {
    pub zone: String,
    pub shifts: Vec<Shift>,
}

/// One day of shifts grouped by zone.
#[derive(Debug, Clone, Serialize)]
pub struct Board {
    pub date: NaiveDate,
    pub zones: Vec<ZoneColumn>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub date: String,
    pub label: String,
    pub start_time: String,
    pub end_time: String,
    pub scribe_id: Option<String>,
    pub provider_id: Option<String>,
    /// Oldest row of the group; the one cleanup keeps.
    pub keep_id: String,
    pub duplicate_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub groups: usize,
    pub deleted: u64,
}

fn person(row: &SqliteRow, prefix: &str) -> Option<PersonRef> {
    let id: Option<String> = row.get(format!("{}_ref_id", prefix).as_str());
    id.map(|id| PersonRef {
        id,
        name: row.get(format!("{}_name", prefix).as_str()),
        slug: row.get(format!("{}_slug", prefix).as_str()),
    })
}

fn shift_from_row(row: &SqliteRow) -> Result<Shift> {
    let date: String = row.get("date");
    Ok(Shift {
        id: row.get("id"),
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| anyhow::anyhow!("bad stored shift date '{}': {}", date, e))?,
        label: row.get("label"),
        zone: row.get("zone"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        site: row.get("site"),
        scribe: person(row, "scribe"),
        provider: person(row, "provider"),
        created_at: ts(row.get("created_at")),
        updated_at: ts(row.get("updated_at")),
    })
}

async fn query_range(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
    filter: &ShiftFilter,
) -> Result<Vec<Shift>> {
    let sql = format!(
        r#"{}
        WHERE s.date BETWEEN ? AND ?
          AND (? IS NULL OR s.zone = ? COLLATE NOCASE)
          AND (? IS NULL OR sc.slug = ?)
          AND (? IS NULL OR pr.slug = ?)
        ORDER BY s.date, s.start_time, s.zone, s.label, s.id
        "#,
        SELECT_SHIFTS
    );
    let rows = sqlx::query(&sql)
        .bind(start.to_string())
        .bind(end.to_string())
        .bind(&filter.zone)
        .bind(&filter.zone)
        .bind(&filter.scribe)
        .bind(&filter.scribe)
        .bind(&filter.provider)
        .bind(&filter.provider)
        .fetch_all(pool)
        .await?;
    rows.iter().map(shift_from_row).collect()
}

pub async fn shifts_for_date(
    pool: &SqlitePool,
    date: NaiveDate,
    filter: &ShiftFilter,
) -> Result<Vec<Shift>> {
    query_range(pool, date, date, filter).await
}

/// Shifts from `start` to `end` inclusive.
pub async fn shifts_in_range(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
    filter: &ShiftFilter,
) -> Result<Vec<Shift>> {
    if end < start {
        return Err(Error::bad_request("end date must not be before start date"));
    }
    let days = (end - start).num_days() + 1;
    if days > MAX_RANGE_DAYS {
        return Err(Error::bad_request(format!(
            "date range spans {} days; at most {} are allowed",
            days, MAX_RANGE_DAYS
        )));
    }
    query_range(pool, start, end, filter).await
}

/// Shifts of one day grouped by zone. Configured zones come first in
/// configuration order (including empty ones); zones not in the
/// configuration follow alphabetically.
pub async fn board(pool: &SqlitePool, date: NaiveDate, cfg: &ShiftsConfig) -> Result<Board> {
    let shifts = shifts_for_date(pool, date, &ShiftFilter::default()).await?;
    let total = shifts.len();

    let mut zones: Vec<ZoneColumn> = cfg
        .ordered_zones()
        .into_iter()
        .map(|zone| ZoneColumn {
            zone,
            shifts: Vec::new(),
        })
        .collect();
    let configured = zones.len();

    for shift in shifts {
        match zones
            .iter_mut()
            .find(|z| z.zone.eq_ignore_ascii_case(&shift.zone))
        {
            Some(column) => column.shifts.push(shift),
            None => zones.push(ZoneColumn {
                zone: shift.zone.clone(),
                shifts: vec![shift],
            }),
        }
    }
    zones[configured..].sort_by(|a, b| a.zone.cmp(&b.zone));

    Ok(Board { date, zones, total })
}

async fn find_by_natural_key(
    pool: &SqlitePool,
    shift: &NormalizedShift,
) -> Result<Option<(String, String, Option<String>)>> {
    let row = sqlx::query(
        r#"
        SELECT id, zone, site FROM shifts
        WHERE date = ? AND label = ? COLLATE NOCASE AND start_time = ? AND end_time = ?
          AND scribe_id IS ? AND provider_id IS ?
        ORDER BY created_at, id
        LIMIT 1
        "#,
    )
    .bind(shift.date.to_string())
    .bind(&shift.label)
    .bind(&shift.start_time)
    .bind(&shift.end_time)
    .bind(&shift.scribe_id)
    .bind(&shift.provider_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| (r.get("id"), r.get("zone"), r.get("site"))))
}

fn outcome_for(existing: &Option<(String, String, Option<String>)>, shift: &NormalizedShift) -> UpsertOutcome {
    match existing {
        None => UpsertOutcome::Created,
        Some((_, zone, site)) if *zone == shift.zone && *site == shift.site => UpsertOutcome::Unchanged,
        Some(_) => UpsertOutcome::Updated,
    }
}

/// What [`upsert_shift`] would do, without writing.
pub async fn plan_upsert(pool: &SqlitePool, shift: &NormalizedShift) -> Result<UpsertOutcome> {
    let existing = find_by_natural_key(pool, shift).await?;
    Ok(outcome_for(&existing, shift))
}

/// Insert or update a shift by natural key.
///
/// An existing row is updated only when its zone or site differ.
pub async fn upsert_shift(pool: &SqlitePool, shift: &NormalizedShift) -> Result<UpsertOutcome> {
    let existing = find_by_natural_key(pool, shift).await?;
    let outcome = outcome_for(&existing, shift);
    let now = Utc::now().timestamp();

    match (outcome, existing) {
        (UpsertOutcome::Unchanged, _) => {}
        (UpsertOutcome::Updated, Some((id, _, _))) => {
            sqlx::query("UPDATE shifts SET zone = ?, site = ?, updated_at = ? WHERE id = ?")
                .bind(&shift.zone)
                .bind(&shift.site)
                .bind(now)
                .bind(&id)
                .execute(pool)
                .await?;
            debug!(shift_id = %id, "shift updated");
        }
        _ => {
            sqlx::query(
                r#"
                INSERT INTO shifts (id, date, label, zone, start_time, end_time, site,
                                    scribe_id, provider_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(shift.date.to_string())
            .bind(&shift.label)
            .bind(&shift.zone)
            .bind(&shift.start_time)
            .bind(&shift.end_time)
            .bind(&shift.site)
            .bind(&shift.scribe_id)
            .bind(&shift.provider_id)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
        }
    }
    Ok(outcome)
}

/// Groups of rows sharing a natural key.
pub async fn find_duplicates(pool: &SqlitePool) -> Result<Vec<DuplicateGroup>> {
    let keys = sqlx::query(
        r#"
        SELECT date, label, start_time, end_time, scribe_id, provider_id, COUNT(*) AS n
        FROM shifts
        GROUP BY date, label COLLATE NOCASE, start_time, end_time, scribe_id, provider_id
        HAVING n > 1
        ORDER BY date, start_time, label
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut groups = Vec::with_capacity(keys.len());
    for key in &keys {
        let date: String = key.get("date");
        let label: String = key.get("label");
        let start_time: String = key.get("start_time");
        let end_time: String = key.get("end_time");
        let scribe_id: Option<String> = key.get("scribe_id");
        let provider_id: Option<String> = key.get("provider_id");

        let mut ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM shifts
            WHERE date = ? AND label = ? COLLATE NOCASE AND start_time = ? AND end_time = ?
              AND scribe_id IS ? AND provider_id IS ?
            ORDER BY created_at, id
            "#,
        )
        .bind(&date)
        .bind(&label)
        .bind(&start_time)
        .bind(&end_time)
        .bind(&scribe_id)
        .bind(&provider_id)
        .fetch_all(pool)
        .await?;

        if ids.len() < 2 {
            continue;
        }
        let keep_id = ids.remove(0);
        groups.push(DuplicateGroup {
            date,
            label,
            start_time,
            end_time,
            scribe_id,
            provider_id,
            keep_id,
            duplicate_ids: ids,
        });
    }
    Ok(groups)
}

/// Delete every duplicate, keeping the oldest row of each group.
pub async fn clean_duplicates(pool: &SqlitePool) -> Result<CleanReport> {
    let groups = find_duplicates(pool).await?;
    let mut tx = pool.begin().await?;
    let mut deleted = 0;
    for group in &groups {
        for id in &group.duplicate_ids {
            deleted += sqlx::query("DELETE FROM shifts WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
    }
    tx.commit().await?;

    info!(groups = groups.len(), deleted, "duplicate shifts removed");
    Ok(CleanReport {
        groups: groups.len(),
        deleted,
    })
}

/// Delete all shifts.
pub async fn reset(pool: &SqlitePool) -> Result<u64> {
    let deleted = sqlx::query("DELETE FROM shifts")
        .execute(pool)
        .await?
        .rows_affected();
    info!(deleted, "all shifts deleted");
    Ok(deleted)
}

// ============ CLI ============

/// `scribe shifts dedupe`.
pub async fn run_dedupe(config: &crate::config::Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let groups = find_duplicates(&pool).await?;
    for g in &groups {
        println!(
            "{} {} {}-{}: keeping {}, removing {}",
            g.date,
            g.label,
            g.start_time,
            g.end_time,
            g.keep_id,
            g.duplicate_ids.len()
        );
    }
    let report = clean_duplicates(&pool).await?;
    println!(
        "Removed {} duplicate shift(s) across {} group(s).",
        report.deleted, report.groups
    );
    pool.close().await;
    Ok(())
}

/// `scribe shifts reset`.
pub async fn run_reset(config: &crate::config::Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let deleted = reset(&pool).await?;
    println!("Deleted {} shift(s).", deleted);
    pool.close().await;
    Ok(())
}
