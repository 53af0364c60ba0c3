//! Shift scrape-and-reconcile.
//!
//! A sync run fetches raw records from a [`ScheduleSource`], normalizes each
//! one (date formats, time windows, role names, zone lookup) and upserts the
//! resulting shifts by natural key. Records are processed independently:
//! unknown labels are skipped with a warning, malformed records are reported
//! in [`SyncReport::errors`], and neither stops the run.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ShiftsConfig};
use crate::db;
use crate::error::Error;
use crate::models::ReferenceKind;
use crate::reference;
use crate::schedule_source::{source_from_config, RawShift, ScheduleSource};
use crate::shifts::{self, NormalizedShift, UpsertOutcome};

/// Outcome of one sync run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub source: String,
    pub dry_run: bool,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    /// True only when every record was processed without error.
    pub success: bool,
}

/// A raw record after validation, with people still given by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub date: NaiveDate,
    pub label: String,
    pub zone: String,
    pub start_time: String,
    pub end_time: String,
    pub site: Option<String>,
    pub scribes: Vec<String>,
    pub provider: Option<String>,
}

/// Why a record was not turned into shifts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Not an error: the label belongs to no configured zone.
    Skip(String),
    Invalid(String),
}

// ============ Normalization ============

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

struct ClockTime {
    hour: u32,
    minute: u32,
    meridiem: Option<char>,
}

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^(\d{1,2})(?::?(\d{2}))?\s*(?:([ap])\.?\s*m?\.?)?$")
            .expect("time pattern is valid")
    })
}

fn parse_clock(raw: &str) -> Option<ClockTime> {
    let caps = time_pattern().captures(raw.trim())?;
    let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let meridiem = caps
        .get(3)
        .and_then(|m| m.as_str().chars().next())
        .map(|c| c.to_ascii_lowercase());
    if minute > 59 {
        return None;
    }
    match meridiem {
        Some(_) if !(1..=12).contains(&hour) => None,
        None if hour > 23 => None,
        _ => Some(ClockTime {
            hour,
            minute,
            meridiem,
        }),
    }
}

fn to_24h(hour: u32, meridiem: Option<char>) -> u32 {
    match meridiem {
        Some('a') if hour == 12 => 0,
        Some('p') if hour < 12 => hour + 12,
        _ => hour,
    }
}

fn hhmm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Parse a window such as `07:00-15:00`, `0700-1500`, `7a-3p` or
/// `7:30am - 3pm` into `("HH:MM", "HH:MM")`.
///
/// When only the end carries am/pm, the start takes the same meridiem if
/// that keeps it before the end (`1-9p` is 13:00-21:00, `7-3p` is
/// 07:00-15:00). Overnight windows are allowed.
pub fn parse_time_window(raw: &str) -> Option<(String, String)> {
    let raw = raw.trim();
    let (start, end) = raw
        .split_once(" to ")
        .or_else(|| raw.split_once('\u{2013}'))
        .or_else(|| raw.split_once('-'))?;
    let start = parse_clock(start)?;
    let end = parse_clock(end)?;

    let end_minutes = to_24h(end.hour, end.meridiem) * 60 + end.minute;
    let start_minutes = match (start.meridiem, end.meridiem) {
        (None, Some(m)) if start.hour <= 12 => {
            let inferred = to_24h(start.hour, Some(m)) * 60 + start.minute;
            if inferred < end_minutes {
                inferred
            } else {
                start.hour * 60 + start.minute
            }
        }
        _ => to_24h(start.hour, start.meridiem) * 60 + start.minute,
    };

    Some((hhmm(start_minutes), hhmm(end_minutes)))
}

/// Lowercase and strip everything but letters and digits, so `" P.A. "`,
/// `"pa"` and `"PA"` compare equal.
pub fn normalize_role(role: &str) -> String {
    role.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn role_matches(role: &str, configured: &[String]) -> bool {
    let role = normalize_role(role);
    !role.is_empty() && configured.iter().any(|c| normalize_role(c) == role)
}

pub fn normalize(raw: &RawShift, cfg: &ShiftsConfig) -> Result<Normalized, Rejection> {
    let raw_label = raw.label.split_whitespace().collect::<Vec<_>>().join(" ");
    if raw_label.is_empty() {
        return Err(Rejection::Invalid("missing shift label".to_string()));
    }
    let date = parse_date(&raw.date)
        .ok_or_else(|| Rejection::Invalid(format!("invalid date '{}'", raw.date)))?;

    let window = match (&raw.time, &raw.start, &raw.end) {
        (Some(time), _, _) => time.clone(),
        (None, Some(start), Some(end)) => format!("{}-{}", start, end),
        _ => return Err(Rejection::Invalid("missing time window".to_string())),
    };
    let (start_time, end_time) = parse_time_window(&window)
        .ok_or_else(|| Rejection::Invalid(format!("invalid time window '{}'", window)))?;

    // The configured spelling is stored so label case drift across runs
    // still hits the same natural key.
    let (label, zone) = cfg
        .lookup_label(&raw_label)
        .ok_or_else(|| Rejection::Skip(format!("unknown shift label '{}'", raw_label)))?;
    let (label, zone) = (label.to_string(), zone.to_string());

    let mut scribes: Vec<String> = Vec::new();
    let mut providers: Vec<String> = Vec::new();
    if let Some(ref s) = raw.scribe {
        scribes.push(reference::normalize_name(s));
    }
    if let Some(ref p) = raw.provider {
        providers.push(reference::normalize_name(p));
    }
    for person in &raw.people {
        let name = reference::normalize_name(&person.name);
        if name.is_empty() {
            continue;
        }
        if role_matches(&person.role, &cfg.scribe_roles) {
            scribes.push(name);
        } else if role_matches(&person.role, &cfg.provider_roles) {
            providers.push(name);
        } else {
            debug!(name = %name, role = %person.role, "ignoring person with unrecognized role");
        }
    }
    let mut seen = HashSet::new();
    scribes.retain(|s| !s.is_empty() && seen.insert(s.to_lowercase()));
    if providers.len() > 1 {
        debug!(label = %label, count = providers.len(), "multiple providers; keeping the first");
    }

    Ok(Normalized {
        date,
        label,
        zone,
        start_time,
        end_time,
        site: raw
            .site
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        scribes,
        provider: providers.into_iter().find(|p| !p.is_empty()),
    })
}

// ============ Sync run ============

fn sync_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

async fn resolve_person(
    pool: &SqlitePool,
    kind: ReferenceKind,
    name: Option<&str>,
    dry_run: bool,
) -> crate::error::Result<Option<String>> {
    let Some(name) = name else {
        return Ok(None);
    };
    if dry_run {
        // A person who does not exist yet gets a fresh id, so any shift
        // with them is new.
        return Ok(Some(
            reference::find_by_name(pool, kind, name)
                .await?
                .map_or_else(|| format!("new:{}", name), |e| e.id),
        ));
    }
    Ok(Some(reference::find_or_create_by_name(pool, kind, name).await?.id))
}

async fn apply_record(
    pool: &SqlitePool,
    record: &Normalized,
    dry_run: bool,
    report: &mut SyncReport,
) -> crate::error::Result<()> {
    let provider_id =
        resolve_person(pool, ReferenceKind::Provider, record.provider.as_deref(), dry_run).await?;

    let scribes: Vec<Option<&str>> = if record.scribes.is_empty() {
        vec![None]
    } else {
        record.scribes.iter().map(|s| Some(s.as_str())).collect()
    };

    for scribe in scribes {
        let scribe_id = resolve_person(pool, ReferenceKind::Scribe, scribe, dry_run).await?;
        let shift = NormalizedShift {
            date: record.date,
            label: record.label.clone(),
            zone: record.zone.clone(),
            start_time: record.start_time.clone(),
            end_time: record.end_time.clone(),
            site: record.site.clone(),
            scribe_id,
            provider_id: provider_id.clone(),
        };
        let outcome = if dry_run {
            shifts::plan_upsert(pool, &shift).await?
        } else {
            shifts::upsert_shift(pool, &shift).await?
        };
        match outcome {
            UpsertOutcome::Created => report.created += 1,
            UpsertOutcome::Updated => report.updated += 1,
            UpsertOutcome::Unchanged => report.unchanged += 1,
        }
    }
    Ok(())
}

async fn record_run(
    pool: &SqlitePool,
    report: &SyncReport,
    started_at: i64,
) -> crate::error::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_runs (source, started_at, finished_at, fetched, created, updated,
                               unchanged, skipped, errors_json)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&report.source)
    .bind(started_at)
    .bind(Utc::now().timestamp())
    .bind(report.fetched as i64)
    .bind(report.created as i64)
    .bind(report.updated as i64)
    .bind(report.unchanged as i64)
    .bind(report.skipped as i64)
    .bind(serde_json::to_string(&report.errors)?)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch, normalize and upsert. With `dry_run` nothing is written and the
/// counts describe what a real run would do.
///
/// Per-record problems end up in the report. The run itself fails with
/// [`Error::Upstream`] when the source cannot be read, or with a store error
/// when the run log cannot be written.
pub async fn run_shift_sync(
    pool: &SqlitePool,
    source: &dyn ScheduleSource,
    cfg: &ShiftsConfig,
    dry_run: bool,
) -> crate::error::Result<SyncReport> {
    let _guard = sync_lock().lock().await;
    let started_at = Utc::now().timestamp();
    let mut report = SyncReport {
        source: source.name().to_string(),
        dry_run,
        ..Default::default()
    };

    let records = match source.fetch().await {
        Ok(records) => records,
        Err(e) => {
            error!(source = %report.source, error = %e, "schedule fetch failed");
            let message = format!("schedule fetch failed: {:#}", e);
            if !dry_run {
                report.errors.push(message.clone());
                record_run(pool, &report, started_at).await?;
            }
            return Err(Error::Upstream(message));
        }
    };
    report.fetched = records.len();

    for (i, record) in records.iter().enumerate() {
        let raw = match record {
            Ok(raw) => raw,
            Err(reason) => {
                warn!(record = i, "{}", reason);
                report.errors.push(format!("record {}: {}", i, reason));
                continue;
            }
        };
        let normalized = match normalize(raw, cfg) {
            Ok(n) => n,
            Err(Rejection::Skip(reason)) => {
                warn!(record = i, date = %raw.date, "{}", reason);
                report.skipped += 1;
                continue;
            }
            Err(Rejection::Invalid(reason)) => {
                report
                    .errors
                    .push(format!("record {} ({} {}): {}", i, raw.date, raw.label, reason));
                continue;
            }
        };

        if let Err(e) = apply_record(pool, &normalized, dry_run, &mut report).await {
            error!(record = i, error = %e, "failed to store shift");
            report
                .errors
                .push(format!("record {} ({} {}): {}", i, raw.date, raw.label, e));
        }
    }

    report.success = report.errors.is_empty();
    if !dry_run {
        record_run(pool, &report, started_at).await?;
    }

    info!(
        source = %report.source,
        dry_run,
        fetched = report.fetched,
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        skipped = report.skipped,
        errors = report.errors.len(),
        "shift sync finished"
    );
    Ok(report)
}

/// Sync using the source from configuration. A source that cannot be
/// built (such as an unset token variable) is an internal error, not an
/// upstream one.
pub async fn sync_from_config(
    pool: &SqlitePool,
    cfg: &ShiftsConfig,
    dry_run: bool,
) -> crate::error::Result<SyncReport> {
    let source_cfg = cfg.source.as_ref().ok_or_else(|| {
        Error::Unavailable("no schedule source is configured ([shifts.source])".to_string())
    })?;
    let source = source_from_config(source_cfg)?;
    run_shift_sync(pool, source.as_ref(), cfg, dry_run).await
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: i64,
    pub source: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub fetched: i64,
    pub created: i64,
    pub updated: i64,
    pub unchanged: i64,
    pub skipped: i64,
    pub errors: Vec<String>,
}

pub async fn recent_runs(pool: &SqlitePool, limit: i64) -> crate::error::Result<Vec<SyncRun>> {
    let rows = sqlx::query("SELECT * FROM sync_runs ORDER BY id DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| {
            let errors: String = r.get("errors_json");
            SyncRun {
                id: r.get("id"),
                source: r.get("source"),
                started_at: r.get("started_at"),
                finished_at: r.get("finished_at"),
                fetched: r.get("fetched"),
                created: r.get("created"),
                updated: r.get("updated"),
                unchanged: r.get("unchanged"),
                skipped: r.get("skipped"),
                errors: serde_json::from_str(&errors).unwrap_or_default(),
            }
        })
        .collect())
}

/// Spawn the periodic sync when `sync_interval_minutes` is configured.
pub fn spawn_scheduled_sync(pool: SqlitePool, config: Arc<Config>) -> Option<JoinHandle<()>> {
    let minutes = config.shifts.sync_interval_minutes?;
    let period = Duration::from_secs(minutes * 60);
    info!(minutes, "scheduled shift sync enabled");

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match sync_from_config(&pool, &config.shifts, false).await {
                Ok(report) if !report.success => {
                    warn!(errors = report.errors.len(), "scheduled shift sync had errors")
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "scheduled shift sync failed"),
            }
        }
    }))
}

/// `scribe sync-shifts`.
pub async fn run_sync_command(config: &Config, dry_run: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let report = sync_from_config(&pool, &config.shifts, dry_run).await?;

    let prefix = if dry_run { "dry run: " } else { "" };
    println!(
        "{}sync shifts ({}): fetched {}, created {}, updated {}, unchanged {}, skipped {}, errors {}",
        prefix,
        report.source,
        report.fetched,
        report.created,
        report.updated,
        report.unchanged,
        report.skipped,
        report.errors.len()
    );
    for err in &report.errors {
        println!("  error: {}", err);
    }

    pool.close().await;
    if !report.success {
        anyhow::bail!("shift sync finished with {} error(s)", report.errors.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleSourceConfig;
    use crate::schedule_source::{FileScheduleSource, RawAssignment};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn cfg() -> ShiftsConfig {
        let mut zone_groups = BTreeMap::new();
        zone_groups.insert("ED A1".to_string(), "Acute".to_string());
        zone_groups.insert("FT 1".to_string(), "Fast Track".to_string());
        ShiftsConfig {
            zone_groups,
            ..Default::default()
        }
    }

    fn raw(date: &str, label: &str, time: &str) -> RawShift {
        RawShift {
            date: date.into(),
            label: label.into(),
            time: Some(time.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_time_windows() {
        let w = |s: &str| parse_time_window(s).map(|(a, b)| format!("{}-{}", a, b));
        assert_eq!(w("07:00-15:00").as_deref(), Some("07:00-15:00"));
        assert_eq!(w("0700-1530").as_deref(), Some("07:00-15:30"));
        assert_eq!(w("7a-3p").as_deref(), Some("07:00-15:00"));
        assert_eq!(w("7:30am - 3pm").as_deref(), Some("07:30-15:00"));
        assert_eq!(w("1-9p").as_deref(), Some("13:00-21:00"));
        assert_eq!(w("7p-7a").as_deref(), Some("19:00-07:00"));
        assert_eq!(w("12p-8p").as_deref(), Some("12:00-20:00"));
        assert_eq!(w("7 AM to 3 PM").as_deref(), Some("07:00-15:00"));
        assert_eq!(w("25:00-26:00"), None);
        assert_eq!(w("morning"), None);
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(parse_date("2026-03-02"), NaiveDate::from_ymd_opt(2026, 3, 2));
        assert_eq!(parse_date("03/02/2026"), NaiveDate::from_ymd_opt(2026, 3, 2));
        assert_eq!(parse_date("3/2/2026"), NaiveDate::from_ymd_opt(2026, 3, 2));
        assert_eq!(parse_date("2026-02-30"), None);
    }

    #[test]
    fn test_role_matching_ignores_case_and_punctuation() {
        assert_eq!(normalize_role(" P.A. "), "pa");
        assert!(role_matches("SCRIBE", &["scribe".to_string()]));
        assert!(role_matches("Attending ", &["attending".to_string()]));
        assert!(!role_matches("", &["scribe".to_string()]));
    }

    #[test]
    fn test_normalize_people_and_zone() {
        let mut r = raw("2026-03-02", "ed  a1", "7a-3p");
        r.people = vec![
            RawAssignment { name: "Ana Ruiz".into(), role: "SCRIBE".into() },
            RawAssignment { name: "Dr. Lee".into(), role: "Attending".into() },
            RawAssignment { name: "Nurse Joy".into(), role: "RN".into() },
        ];
        let n = normalize(&r, &cfg()).unwrap();
        assert_eq!(n.label, "ED A1");
        assert_eq!(n.zone, "Acute");
        assert_eq!(n.scribes, vec!["Ana Ruiz"]);
        assert_eq!(n.provider.as_deref(), Some("Dr. Lee"));
        assert_eq!((n.start_time.as_str(), n.end_time.as_str()), ("07:00", "15:00"));
    }

    #[test]
    fn test_repeated_scribes_are_kept_once() {
        let mut r = raw("2026-03-02", "FT 1", "11a-7p");
        r.scribe = Some("Ana Ruiz".into());
        r.people = vec![
            RawAssignment { name: "Ben Ode".into(), role: "Scribe".into() },
            RawAssignment { name: "ana  ruiz".into(), role: "scribe".into() },
        ];
        let n = normalize(&r, &cfg()).unwrap();
        assert_eq!(n.scribes, vec!["Ana Ruiz", "Ben Ode"]);
    }

    #[test]
    fn test_normalize_rejections() {
        assert!(matches!(
            normalize(&raw("2026-03-02", "Lobby", "7a-3p"), &cfg()),
            Err(Rejection::Skip(_))
        ));
        assert!(matches!(
            normalize(&raw("tomorrow", "ED A1", "7a-3p"), &cfg()),
            Err(Rejection::Invalid(_))
        ));
        assert!(matches!(
            normalize(&raw("2026-03-02", "ED A1", "all day"), &cfg()),
            Err(Rejection::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_is_idempotent_and_reports_partial_failure() {
        let tmp = TempDir::new().unwrap();
        let pool = db::open_migrated(&tmp.path().join("sync.sqlite")).await.unwrap();
        let path = tmp.path().join("schedule.json");
        std::fs::write(
            &path,
            r#"[
              {"date":"2026-03-02","label":"ED A1","time":"7a-3p",
               "people":[{"name":"Ana Ruiz","role":"Scribe"},{"name":"Dr. Lee","role":"MD"}]},
              {"date":"03/02/2026","label":"FT 1","start":"1100","end":"1900","scribe":"Ben Ode"},
              {"date":"2026-03-02","label":"Lobby","time":"7a-3p"},
              {"date":"2026-03-02","label":"ED A1","time":"whenever"}
            ]"#,
        )
        .unwrap();
        let source = FileScheduleSource::new(&path);

        let first = run_shift_sync(&pool, &source, &cfg(), false).await.unwrap();
        assert_eq!(first.fetched, 4);
        assert_eq!(first.created, 2);
        assert_eq!(first.skipped, 1);
        assert_eq!(first.errors.len(), 1);
        assert!(!first.success);

        let second = run_shift_sync(&pool, &source, &cfg(), false).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.unchanged, 2);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shifts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(recent_runs(&pool, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_stop_the_run() {
        let tmp = TempDir::new().unwrap();
        let pool = db::open_migrated(&tmp.path().join("sync.sqlite")).await.unwrap();
        let path = tmp.path().join("schedule.json");
        std::fs::write(
            &path,
            r#"[
              {"date":"2026-03-02","label":"ED A1","time":"7a-3p","scribe":"Ana Ruiz"},
              {"date":null,"label":"ED A1","time":"7a-3p","scribe":"Ben Ode"},
              {"date":"2026-03-02","label":"FT 1","time":"11a-7p","people":[{"name":null}]}
            ]"#,
        )
        .unwrap();
        let source = FileScheduleSource::new(&path);

        let report = run_shift_sync(&pool, &source, &cfg(), false).await.unwrap();
        assert_eq!(report.fetched, 3);
        assert_eq!(report.created, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("invalid date"), "{:?}", report.errors);
        assert!(report.errors[1].contains("malformed record"), "{:?}", report.errors);
        assert!(!report.success);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shifts")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_label_case_drift_keeps_one_row() {
        let tmp = TempDir::new().unwrap();
        let pool = db::open_migrated(&tmp.path().join("sync.sqlite")).await.unwrap();
        let path = tmp.path().join("schedule.json");
        let source = FileScheduleSource::new(&path);

        std::fs::write(
            &path,
            r#"[{"date":"2026-03-02","label":"ED A1","time":"7a-3p","scribe":"Ana"}]"#,
        )
        .unwrap();
        let first = run_shift_sync(&pool, &source, &cfg(), false).await.unwrap();
        assert_eq!(first.created, 1);

        std::fs::write(
            &path,
            r#"[{"date":"2026-03-02","label":"ed  a1","time":"7a-3p","scribe":"ana"}]"#,
        )
        .unwrap();
        let second = run_shift_sync(&pool, &source, &cfg(), false).await.unwrap();
        assert_eq!((second.created, second.unchanged), (0, 1));

        let labels: Vec<String> = sqlx::query_scalar("SELECT label FROM shifts")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(labels, vec!["ED A1"]);
        assert!(shifts::find_duplicates(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_label_spellings_count_as_duplicates() {
        let tmp = TempDir::new().unwrap();
        let pool = db::open_migrated(&tmp.path().join("sync.sqlite")).await.unwrap();
        for (id, label) in [("s1", "ED A1"), ("s2", "ed a1")] {
            sqlx::query(
                "INSERT INTO shifts (id, date, label, zone, start_time, end_time, created_at, updated_at) \
                 VALUES (?, '2026-03-02', ?, 'Acute', '07:00', '15:00', 0, 0)",
            )
            .bind(id)
            .bind(label)
            .execute(&pool)
            .await
            .unwrap();
        }
        let groups = shifts::find_duplicates(&pool).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].duplicate_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_classified() {
        let tmp = TempDir::new().unwrap();
        let pool = db::open_migrated(&tmp.path().join("sync.sqlite")).await.unwrap();

        let missing = FileScheduleSource::new(tmp.path().join("nope.json"));
        let err = run_shift_sync(&pool, &missing, &cfg(), false).await.unwrap_err();
        assert!(matches!(err, Error::Upstream(_)), "{:?}", err);
        // The failed run is still logged.
        assert_eq!(recent_runs(&pool, 10).await.unwrap().len(), 1);

        let err = sync_from_config(&pool, &cfg(), false).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)), "{:?}", err);

        let mut misconfigured = cfg();
        misconfigured.source = Some(ScheduleSourceConfig::Http {
            url: "http://localhost:1/schedule".into(),
            token_env: Some("SCRIBE_TEST_UNSET_SYNC_TOKEN".into()),
            timeout_secs: 1,
            max_retries: 0,
        });
        let err = sync_from_config(&pool, &misconfigured, false).await.unwrap_err();
        assert!(matches!(err, Error::Other(_)), "{:?}", err);

        pool.close().await;
        let err = run_shift_sync(&pool, &missing, &cfg(), false).await.unwrap_err();
        assert!(matches!(err, Error::Database(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let pool = db::open_migrated(&tmp.path().join("sync.sqlite")).await.unwrap();
        let path = tmp.path().join("schedule.json");
        std::fs::write(
            &path,
            r#"[{"date":"2026-03-02","label":"ED A1","time":"7a-3p","scribe":"Ana Ruiz"}]"#,
        )
        .unwrap();
        let source = FileScheduleSource::new(&path);

        let report = run_shift_sync(&pool, &source, &cfg(), true).await.unwrap();
        assert_eq!(report.created, 1);
        assert!(report.success);

        let shifts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shifts")
            .fetch_one(&pool)
            .await
            .unwrap();
        let people: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reference_entries")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!((shifts, people), (0, 0));
        assert!(recent_runs(&pool, 10).await.unwrap().is_empty());
    }
}
