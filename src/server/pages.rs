use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use super::{required, ApiJson, ApiQuery, ApiResponse, ApiResult, AppState, Session};
use crate::error::Error;
use crate::models::{Page, PageSummary, PageType, SearchHit, TrashedPage, TreeNode};
use crate::pages::{self, MoveRequest, NewPage, PageFilter, PageUpdate, ParentFilter};
use crate::search::{self, SearchOptions};

fn parse_type(raw: Option<&str>) -> Result<Option<PageType>, Error> {
    raw.filter(|t| !t.trim().is_empty())
        .map(|t| t.parse().map_err(Error::BadRequest))
        .transpose()
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    page_type: Option<String>,
    /// A page id, or `root` for top-level pages.
    parent: Option<String>,
    tag: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<ListQuery>,
) -> ApiResult<Vec<PageSummary>> {
    let parent = match q.parent.as_deref().map(str::trim) {
        None | Some("") => ParentFilter::Any,
        Some("root") => ParentFilter::Root,
        Some(id) => ParentFilter::Page(id.to_string()),
    };
    let filter = PageFilter {
        page_type: parse_type(q.page_type.as_deref())?,
        parent,
        tag: q.tag,
        limit: q.limit,
        offset: q.offset,
    };
    Ok(ApiResponse::ok(pages::list_pages(&state.pool, &filter).await?))
}

pub async fn create(
    State(state): State<AppState>,
    session: Session,
    ApiJson(input): ApiJson<NewPage>,
) -> ApiResult<Page> {
    let page = pages::create_page(
        &state.pool,
        input,
        session.actor(),
        state.config.pages.move_retries,
    )
    .await?;
    Ok(ApiResponse::created(page))
}

#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    root: Option<String>,
}

pub async fn tree(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<TreeQuery>,
) -> ApiResult<Vec<TreeNode>> {
    let root = q.root.as_deref().filter(|r| !r.is_empty());
    Ok(ApiResponse::ok(pages::tree(&state.pool, root).await?))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
    #[serde(rename = "type")]
    page_type: Option<String>,
    limit: Option<i64>,
}

pub async fn search(
    State(state): State<AppState>,
    ApiQuery(q): ApiQuery<SearchQuery>,
) -> ApiResult<Vec<SearchHit>> {
    let query = required(&q.q, "q")?;
    let opts = SearchOptions {
        page_type: parse_type(q.page_type.as_deref())?,
        limit: Some(q.limit.unwrap_or(state.config.pages.search_limit)),
    };
    let hits = search::search_pages(
        &state.pool,
        query,
        &opts,
        state.config.pages.max_search_limit,
    )
    .await?;
    Ok(ApiResponse::ok(hits))
}

pub async fn trash(State(state): State<AppState>) -> ApiResult<Vec<TrashedPage>> {
    Ok(ApiResponse::ok(pages::list_trash(&state.pool).await?))
}

#[derive(Debug, Serialize)]
pub struct Purged {
    purged: u64,
}

pub async fn empty_trash(State(state): State<AppState>) -> ApiResult<Purged> {
    let purged = pages::empty_trash(&state.pool).await?;
    Ok(ApiResponse::ok(Purged { purged }))
}

#[derive(Debug, Deserialize)]
pub struct SlugQuery {
    /// Set to `false` to read without counting a view.
    view: Option<bool>,
}

pub async fn by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    ApiQuery(q): ApiQuery<SlugQuery>,
) -> ApiResult<Page> {
    let page = pages::get_page_by_slug(&state.pool, &slug, q.view.unwrap_or(true)).await?;
    Ok(ApiResponse::ok(page))
}

pub async fn get_one(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Page> {
    Ok(ApiResponse::ok(pages::get_page(&state.pool, &id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<PageUpdate>,
) -> ApiResult<Page> {
    let page = pages::update_page(&state.pool, &id, update, session.actor()).await?;
    Ok(ApiResponse::ok(page))
}

#[derive(Debug, Serialize)]
pub struct Trashed {
    trashed: u64,
}

pub async fn soft_delete(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> ApiResult<Trashed> {
    let trashed = pages::soft_delete(&state.pool, &id, session.actor()).await?;
    Ok(ApiResponse::ok(Trashed { trashed }))
}

pub async fn children(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<PageSummary>> {
    Ok(ApiResponse::ok(pages::children(&state.pool, &id).await?))
}

pub async fn breadcrumbs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<PageSummary>> {
    Ok(ApiResponse::ok(pages::breadcrumbs(&state.pool, &id).await?))
}

pub async fn move_page(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<MoveRequest>,
) -> ApiResult<Page> {
    let page = pages::move_page(
        &state.pool,
        &id,
        &req,
        session.actor(),
        state.config.pages.move_retries,
    )
    .await?;
    Ok(ApiResponse::ok(page))
}

pub async fn restore(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> ApiResult<Page> {
    Ok(ApiResponse::ok(
        pages::restore(&state.pool, &id, session.actor()).await?,
    ))
}

pub async fn purge(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Purged> {
    let purged = pages::purge(&state.pool, &id).await?;
    Ok(ApiResponse::ok(Purged { purged }))
}
