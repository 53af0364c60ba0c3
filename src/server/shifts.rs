use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chrono::{Local, NaiveDate};
use serde::Deserialize;

use super::{required, ApiError, ApiQuery, ApiResponse, ApiResult, AppState};
use crate::auth;
use crate::error::Error;
use crate::models::Shift;
use crate::shift_sync;
use crate::shifts::{self, Board, ShiftFilter};

fn parse_day(raw: &str, name: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError(Error::bad_request(format!(
            "'{}' must be a date as YYYY-MM-DD, got '{}'",
            name, raw
        )))
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct ShiftQuery {
    date: Option<String>,
    start: Option<String>,
    end: Option<String>,
    zone: Option<String>,
    scribe: Option<String>,
    provider: Option<String>,
}

impl ShiftQuery {
    fn filter(&self) -> ShiftFilter {
        let clean = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        ShiftFilter {
            zone: clean(&self.zone),
            scribe: clean(&self.scribe),
            provider: clean(&self.provider),
        }
    }
}

/// `?date=` for one day, or `?start=&end=` for an inclusive range.
pub async fn list(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ShiftQuery>,
) -> ApiResult<Vec<Shift>> {
    let filter = q.filter();
    let shifts = match (&q.date, &q.start, &q.end) {
        (Some(date), _, _) => {
            shifts::shifts_for_date(&state.pool, parse_day(date, "date")?, &filter).await?
        }
        (None, Some(start), Some(end)) => {
            let start = parse_day(start, "start")?;
            let end = parse_day(end, "end")?;
            shifts::shifts_in_range(&state.pool, start, end, &filter).await?
        }
        _ => {
            return Err(ApiError(Error::bad_request(
                "either 'date' or both 'start' and 'end' are required",
            )))
        }
    };
    Ok(ApiResponse::ok(shifts))
}

#[derive(Debug, Deserialize)]
pub struct BoardQuery {
    /// Defaults to today in the server's local time zone.
    date: Option<String>,
}

pub async fn board(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<BoardQuery>,
) -> ApiResult<Board> {
    let date = match q.date.as_deref().filter(|d| !d.trim().is_empty()) {
        Some(d) => parse_day(d, "date")?,
        None => Local::now().date_naive(),
    };
    let board = shifts::board(&state.pool, date, &state.config.shifts).await?;
    Ok(ApiResponse::ok(board))
}

pub async fn range(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ShiftQuery>,
) -> ApiResult<Vec<Shift>> {
    let start = parse_day(required(&q.start, "start")?, "start")?;
    let end = parse_day(required(&q.end, "end")?, "end")?;
    let shifts = shifts::shifts_in_range(&state.pool, start, end, &q.filter()).await?;
    Ok(ApiResponse::ok(shifts))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQuery {
    #[serde(default)]
    dry_run: bool,
}

/// Run a sync and answer 200, or 207 when some records failed. An
/// unreadable source is 502; store failures stay internal errors.
async fn run_sync(state: &AppState, dry_run: bool) -> Result<Response, ApiError> {
    let report = shift_sync::sync_from_config(&state.pool, &state.config.shifts, dry_run).await?;

    if report.success {
        Ok(ApiResponse::ok(report).into_response())
    } else {
        let summary = format!("{} record(s) failed", report.errors.len());
        Ok(ApiResponse::partial(report, summary).into_response())
    }
}

pub async fn sync(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<SyncQuery>,
) -> Result<Response, ApiError> {
    run_sync(&state, q.dry_run).await
}

pub async fn cron_scrape(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    auth::check_bearer(&headers, state.config.auth.cron_secret.as_deref(), "cron secret")?;
    run_sync(&state, false).await
}
