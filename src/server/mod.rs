//! JSON HTTP API.
//!
//! Every response uses one envelope:
//!
//! ```json
//! { "success": true, "data": { ... }, "timestamp": "2026-03-02T07:00:00Z" }
//! { "success": false, "error": "page abc not found", "timestamp": "..." }
//! ```
//!
//! A shift sync in which some records failed answers `207 Multi-Status`
//! with `success: false`, the full report in `data`, and a summary in
//! `error`.
//!
//! # Endpoints
//!
//! | Method | Path | Access |
//! |--------|------|--------|
//! | `GET` | `/health` | public |
//! | `POST` | `/api/auth/login`, `/api/auth/logout` | public |
//! | `GET` | `/api/auth/session` | editor |
//! | `GET` | `/api/pages`, `/tree`, `/search`, `/slug/{slug}`, `/{id}`, `/{id}/children`, `/{id}/breadcrumbs` | public |
//! | `POST` `PATCH` `DELETE` | `/api/pages`, `/{id}`, `/{id}/move`, `/{id}/restore` | editor |
//! | `GET` | `/api/pages/trash` | editor |
//! | `DELETE` | `/api/pages/trash`, `/api/pages/{id}/permanent` | admin |
//! | `GET` | `/api/shifts`, `/api/railway-shifts`, `/api/railway-shifts/range` | public |
//! | `POST` | `/api/shifts/sync` | admin |
//! | `GET` | `/api/cron/scrape-shifts` | cron bearer |
//! | `GET` | `/api/animated-messages` | public |
//! | `GET` | `/api/animated-messages/all` | editor |
//! | `POST` `PATCH` `DELETE` | `/api/animated-messages[/{id}]` | editor |
//! | `GET` | `/api/reference/{kind}[/{slug}]` | public |
//! | `POST` `PATCH` `DELETE` | `/api/reference/{kind}[/{slug}]` | editor |
//! | `*` | `/api/admin/users[/{id}]`, `/api/admin/stats` | admin |
//! | `*` | `/api/admin/shifts/duplicates`, `/clean-duplicates`, `/reset` | admin passcode |
//!
//! Session-protected routes are enforced by a single guard middleware
//! driven by [`auth::ROUTE_RULES`]; bearer-protected routes check their
//! secret in the handler.

mod admin;
mod content;
mod pages;
mod session;
mod shifts;

use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request, State},
    http::{request::Parts, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{self, SessionClaims};
use crate::config::Config;
use crate::db;
use crate::error::Error;
use crate::shift_sync;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
}

impl AppState {
    pub fn new(config: Arc<Config>, pool: SqlitePool) -> Self {
        Self { config, pool }
    }
}

/// Start the HTTP server and, when configured, the periodic shift sync.
/// Runs until the process is stopped.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());
    let pool = db::connect(&config).await?;
    crate::migrate::apply(&pool).await?;

    let _scheduled = shift_sync::spawn_scheduled_sync(pool.clone(), config.clone());
    let app = router(AppState::new(config, pool));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, version = env!("CARGO_PKG_VERSION"), "scribe hub listening");
    println!("Scribe hub listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// The full application router with middleware attached.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/auth/login", post(session::login))
        .route("/api/auth/logout", post(session::logout))
        .route("/api/auth/session", get(session::current))
        // Pages
        .route("/api/pages", get(pages::list).post(pages::create))
        .route("/api/pages/tree", get(pages::tree))
        .route("/api/pages/search", get(pages::search))
        .route("/api/pages/trash", get(pages::trash).delete(pages::empty_trash))
        .route("/api/pages/slug/{slug}", get(pages::by_slug))
        .route(
            "/api/pages/{id}",
            get(pages::get_one).patch(pages::update).delete(pages::soft_delete),
        )
        .route("/api/pages/{id}/children", get(pages::children))
        .route("/api/pages/{id}/breadcrumbs", get(pages::breadcrumbs))
        .route("/api/pages/{id}/move", post(pages::move_page))
        .route("/api/pages/{id}/restore", post(pages::restore))
        .route("/api/pages/{id}/permanent", delete(pages::purge))
        // Shifts
        .route("/api/shifts", get(shifts::list))
        .route("/api/shifts/sync", post(shifts::sync))
        .route("/api/railway-shifts", get(shifts::board))
        .route("/api/railway-shifts/range", get(shifts::range))
        .route("/api/cron/scrape-shifts", get(shifts::cron_scrape))
        // Content
        .route(
            "/api/animated-messages",
            get(content::active_messages).post(content::create_message),
        )
        .route("/api/animated-messages/all", get(content::all_messages))
        .route(
            "/api/animated-messages/{id}",
            patch(content::update_message).delete(content::delete_message),
        )
        .route(
            "/api/reference/{kind}",
            get(content::list_reference).post(content::create_reference),
        )
        .route(
            "/api/reference/{kind}/{slug}",
            get(content::get_reference)
                .patch(content::update_reference)
                .delete(content::delete_reference),
        )
        // Admin
        .route("/api/admin/users", get(admin::list_users).post(admin::create_user))
        .route(
            "/api/admin/users/{id}",
            patch(admin::update_user).delete(admin::delete_user),
        )
        .route("/api/admin/stats", get(admin::stats))
        .route("/api/admin/shifts/duplicates", get(admin::duplicates))
        .route("/api/admin/shifts/clean-duplicates", post(admin::clean_duplicates))
        .route("/api/admin/shifts/reset", post(admin::reset_shifts))
        .fallback(not_found_route)
        .route_layer(middleware::from_fn_with_state(state.clone(), guard));

    Router::new()
        .route("/health", get(handle_health))
        .merge(api)
        .layer(cors_layer(&state.config.server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

/// Resolve the session cookie and enforce the route table.
async fn guard(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let session = auth::session_from_headers(req.headers(), &state.config.auth);
    if let Err(e) = auth::authorize(req.method(), req.uri().path(), session.as_ref()) {
        return ApiError(e).into_response();
    }
    if let Some(claims) = session {
        req.extensions_mut().insert(claims);
    }
    next.run(req).await
}

async fn not_found_route() -> ApiError {
    ApiError(Error::not_found("route"))
}

// ============ Health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    database: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if database_ok { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            database: if database_ok { "ok" } else { "unreachable" },
        }),
    )
}

// ============ Envelope ============

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    timestamp: DateTime<Utc>,
}

/// Successful (or partially successful) response body.
pub struct ApiResponse<T> {
    status: StatusCode,
    success: bool,
    data: T,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            success: true,
            data,
            error: None,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            ..Self::ok(data)
        }
    }

    /// 207: the operation ran but part of it failed.
    pub fn partial(data: T, error: impl Into<String>) -> Self {
        Self {
            status: StatusCode::MULTI_STATUS,
            success: false,
            data,
            error: Some(error.into()),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = Envelope {
            success: self.success,
            data: Some(self.data),
            error: self.error,
            timestamp: Utc::now(),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Error response. Internal failures are logged and reported generically.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError(err.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::OrderKey(_) => StatusCode::BAD_REQUEST,
            Error::Database(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            Error::Database(_) | Error::Other(_) => {
                error!(error = %self.0, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let body = Envelope::<()> {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

// ============ Extractors ============

/// `Json` whose rejections use the error envelope.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| Error::bad_request(e.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// `Query` whose rejections use the error envelope.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| Error::bad_request(e.body_text()))?;
        Ok(ApiQuery(value))
    }
}

/// Session placed in request extensions by [`guard`], if any.
pub struct Session(pub Option<SessionClaims>);

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Session(parts.extensions.get::<SessionClaims>().cloned()))
    }
}

impl Session {
    /// User id recorded as the author of writes.
    fn actor(&self) -> Option<&str> {
        self.0.as_ref().map(|c| c.sub.as_str())
    }
}

/// Parse a required query value.
fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError(Error::bad_request(format!("query parameter '{}' is required", name))))
}
