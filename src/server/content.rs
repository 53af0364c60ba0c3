//! Animated messages and reference entities.

use axum::extract::{Path, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, ApiQuery, ApiResponse, ApiResult, AppState};
use crate::error::Error;
use crate::messages::{self, MessageUpdate, NewMessage};
use crate::models::{AnimatedMessage, ReferenceEntry, ReferenceKind};
use crate::reference::{self, NewReference, ReferenceUpdate};

#[derive(Debug, Serialize)]
pub struct Deleted {
    deleted: bool,
}

// ============ Animated messages ============

pub async fn active_messages(State(state): State<AppState>) -> ApiResult<Vec<AnimatedMessage>> {
    Ok(ApiResponse::ok(
        messages::list_active(&state.pool, Utc::now()).await?,
    ))
}

pub async fn all_messages(State(state): State<AppState>) -> ApiResult<Vec<AnimatedMessage>> {
    Ok(ApiResponse::ok(messages::list_all(&state.pool).await?))
}

pub async fn create_message(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<NewMessage>,
) -> ApiResult<AnimatedMessage> {
    Ok(ApiResponse::created(
        messages::create(&state.pool, input).await?,
    ))
}

pub async fn update_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<MessageUpdate>,
) -> ApiResult<AnimatedMessage> {
    Ok(ApiResponse::ok(
        messages::update(&state.pool, &id, update).await?,
    ))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    messages::delete(&state.pool, &id).await?;
    Ok(ApiResponse::ok(Deleted { deleted: true }))
}

// ============ Reference entities ============

fn kind(raw: &str) -> Result<ReferenceKind, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(Error::not_found(format!("reference kind '{}'", raw))))
}

#[derive(Debug, Deserialize)]
pub struct ReferenceQuery {
    q: Option<String>,
}

pub async fn list_reference(
    State(state): State<AppState>,
    Path(raw_kind): Path<String>,
    ApiQuery(q): ApiQuery<ReferenceQuery>,
) -> ApiResult<Vec<ReferenceEntry>> {
    let kind = kind(&raw_kind)?;
    let entries = reference::list(&state.pool, kind, q.q.as_deref()).await?;
    Ok(ApiResponse::ok(entries))
}

pub async fn get_reference(
    State(state): State<AppState>,
    Path((raw_kind, slug)): Path<(String, String)>,
) -> ApiResult<ReferenceEntry> {
    let kind = kind(&raw_kind)?;
    Ok(ApiResponse::ok(reference::get(&state.pool, kind, &slug).await?))
}

pub async fn create_reference(
    State(state): State<AppState>,
    Path(raw_kind): Path<String>,
    ApiJson(input): ApiJson<NewReference>,
) -> ApiResult<ReferenceEntry> {
    let kind = kind(&raw_kind)?;
    Ok(ApiResponse::created(
        reference::create(&state.pool, kind, input).await?,
    ))
}

pub async fn update_reference(
    State(state): State<AppState>,
    Path((raw_kind, slug)): Path<(String, String)>,
    ApiJson(update): ApiJson<ReferenceUpdate>,
) -> ApiResult<ReferenceEntry> {
    let kind = kind(&raw_kind)?;
    Ok(ApiResponse::ok(
        reference::update(&state.pool, kind, &slug, update).await?,
    ))
}

pub async fn delete_reference(
    State(state): State<AppState>,
    Path((raw_kind, slug)): Path<(String, String)>,
) -> ApiResult<Deleted> {
    let kind = kind(&raw_kind)?;
    reference::delete(&state.pool, kind, &slug).await?;
    Ok(ApiResponse::ok(Deleted { deleted: true }))
}
