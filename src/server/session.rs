use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::response::{AppendHeaders, IntoResponse};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiJson, ApiResponse, ApiResult, AppState, Session};
use crate::auth::{self, SessionClaims};
use crate::error::Error;
use crate::models::User;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    user: User,
    expires_at: i64,
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = auth::authenticate(&state.pool, &req.email, &req.password).await?;
    let cfg = &state.config.auth;
    let claims = SessionClaims::for_user(&user, cfg.session_ttl_hours);
    let token = auth::sign_session(&claims, &cfg.session_secret)?;

    Ok((
        AppendHeaders([(SET_COOKIE, auth::session_cookie(cfg, &token))]),
        ApiResponse::ok(LoginResponse {
            user,
            expires_at: claims.exp,
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedOut {
    logged_out: bool,
}

pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        AppendHeaders([(SET_COOKIE, auth::clear_session_cookie(&state.config.auth))]),
        ApiResponse::ok(LoggedOut { logged_out: true }),
    )
}

pub async fn current(session: Session) -> ApiResult<SessionClaims> {
    session
        .0
        .map(ApiResponse::ok)
        .ok_or_else(|| ApiError(Error::Unauthorized("authentication required".to_string())))
}
