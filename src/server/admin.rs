//! User management, statistics and shift maintenance.
//!
//! User routes require an admin session (see the route guard). Shift
//! maintenance is authorized by the `admin_passcode` bearer instead so it
//! can be scripted without a browser session.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, ApiResponse, ApiResult, AppState};
use crate::auth::{self, NewUser};
use crate::error::Error;
use crate::models::{Role, User};
use crate::shifts::{self, CleanReport, DuplicateGroup};
use crate::stats::{self, Stats};

/// Body `POST /api/admin/shifts/reset` must carry.
pub const RESET_CONFIRMATION: &str = "RESET_ALL_SHIFTS";

fn check_passcode(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    auth::check_bearer(
        headers,
        state.config.auth.admin_passcode.as_deref(),
        "admin passcode",
    )?;
    Ok(())
}

// ============ Users ============

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<User>> {
    Ok(ApiResponse::ok(auth::list_users(&state.pool).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<NewUser>,
) -> ApiResult<User> {
    Ok(ApiResponse::created(
        auth::create_user(&state.pool, input).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct RoleChange {
    role: Role,
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(change): ApiJson<RoleChange>,
) -> ApiResult<User> {
    Ok(ApiResponse::ok(
        auth::set_role(&state.pool, &id, change.role).await?,
    ))
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    deleted: bool,
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    auth::delete_user(&state.pool, &id).await?;
    Ok(ApiResponse::ok(Deleted { deleted: true }))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Stats> {
    Ok(ApiResponse::ok(stats::collect(&state.pool).await?))
}

// ============ Shift maintenance ============

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    groups: Vec<DuplicateGroup>,
    duplicate_rows: usize,
}

pub async fn duplicates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<DuplicateReport> {
    check_passcode(&state, &headers)?;
    let groups = shifts::find_duplicates(&state.pool).await?;
    let duplicate_rows = groups.iter().map(|g| g.duplicate_ids.len()).sum();
    Ok(ApiResponse::ok(DuplicateReport {
        groups,
        duplicate_rows,
    }))
}

pub async fn clean_duplicates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<CleanReport> {
    check_passcode(&state, &headers)?;
    Ok(ApiResponse::ok(shifts::clean_duplicates(&state.pool).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    confirm: String,
}

#[derive(Debug, Serialize)]
pub struct ResetReport {
    deleted: u64,
}

pub async fn reset_shifts(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<ResetReport> {
    check_passcode(&state, &headers)?;
    let confirmed = serde_json::from_slice::<ResetRequest>(&body)
        .is_ok_and(|req| req.confirm == RESET_CONFIRMATION);
    if !confirmed {
        return Err(ApiError(Error::bad_request(format!(
            "reset requires {{\"confirm\": \"{}\"}}",
            RESET_CONFIRMATION
        ))));
    }
    let deleted = shifts::reset(&state.pool).await?;
    Ok(ApiResponse::ok(ResetReport { deleted }))
}
