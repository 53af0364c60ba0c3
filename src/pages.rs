//! Hierarchical page store.
//!
//! Pages form a tree through `parent_id`; siblings are ordered by
//! fractional order keys (see [`crate::order_key`]). Deleting a page moves
//! it and its subtree to the trash by stamping `deleted_at` and a
//! `trash_batch` id shared by everything trashed in that one operation;
//! every read in this module filters trashed pages out unless it is a trash
//! operation.
//!
//! # Ordering writes
//!
//! Placement (create, move, restore) reads the sibling keys and writes a new
//! key in one transaction that takes the SQLite write lock before reading,
//! so two writers cannot compute a key from the same snapshot. The partial
//! unique index `idx_pages_sibling_order` backs this up; a violation is
//! retried with a fresh key.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ts, Page, PageSummary, PageType, TrashedPage, TreeNode};
use crate::order_key::{self, OrderKeyError};
use crate::richtext;
use crate::slug;

const PAGE_COLUMNS: &str = "id, slug, title, content_json, content_text, page_type, parent_id, \
     order_key, icon, tags_json, deleted_at, view_count, created_at, updated_at, created_by, updated_by";

const SUMMARY_COLUMNS: &str =
    "id, slug, title, page_type, parent_id, order_key, icon, tags_json, updated_at";

const SIBLING_INDEX: &str = "idx_pages_sibling_order";
const MAX_TITLE_LEN: usize = 200;

// ============ Request types ============

fn default_page_type() -> PageType {
    PageType::Wiki
}

/// Input for [`create_page`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPage {
    pub title: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(rename = "type", default = "default_page_type")]
    pub page_type: PageType,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Sibling the new page is placed after.
    #[serde(default)]
    pub after_id: Option<String>,
    /// Sibling the new page is placed before.
    #[serde(default)]
    pub before_id: Option<String>,
}

impl NewPage {
    pub fn new(title: impl Into<String>, page_type: PageType) -> Self {
        Self {
            title: title.into(),
            slug: None,
            content: Value::Null,
            page_type,
            parent_id: None,
            icon: None,
            tags: Vec::new(),
            after_id: None,
            before_id: None,
        }
    }

    pub fn under(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }
}

/// Partial update for [`update_page`]. Absent fields are left unchanged;
/// an empty `icon` clears the icon.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUpdate {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub content: Option<Value>,
    #[serde(rename = "type")]
    pub page_type: Option<PageType>,
    pub icon: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Target position for [`move_page`].
///
/// `parent_id = None` moves the page to the root. `after_id` names the
/// sibling that will precede the page, `before_id` the one that will follow
/// it. With neither, the page goes after all siblings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub after_id: Option<String>,
    #[serde(default)]
    pub before_id: Option<String>,
}

/// Which parent a listing is restricted to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParentFilter {
    #[default]
    Any,
    Root,
    Page(String),
}

#[derive(Debug, Clone, Default)]
pub struct PageFilter {
    pub page_type: Option<PageType>,
    pub parent: ParentFilter,
    pub tag: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ============ Row mapping ============

fn parse_page_type(raw: &str) -> Result<PageType> {
    raw.parse()
        .map_err(|e: String| Error::Other(anyhow::anyhow!(e)))
}

fn parse_tags(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn page_from_row(row: &SqliteRow) -> Result<Page> {
    let content_json: String = row.get("content_json");
    let page_type: String = row.get("page_type");
    let tags_json: String = row.get("tags_json");
    let deleted_at: Option<i64> = row.get("deleted_at");

    Ok(Page {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        content: serde_json::from_str(&content_json).unwrap_or_else(|_| richtext::empty_doc()),
        content_text: row.get("content_text"),
        page_type: parse_page_type(&page_type)?,
        parent_id: row.get("parent_id"),
        order_key: row.get("order_key"),
        icon: row.get("icon"),
        tags: parse_tags(&tags_json),
        deleted_at: deleted_at.map(ts),
        view_count: row.get("view_count"),
        created_at: ts(row.get("created_at")),
        updated_at: ts(row.get("updated_at")),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
    })
}

fn summary_from_row(row: &SqliteRow) -> Result<PageSummary> {
    let page_type: String = row.get("page_type");
    let tags_json: String = row.get("tags_json");
    Ok(PageSummary {
        id: row.get("id"),
        slug: row.get("slug"),
        title: row.get("title"),
        page_type: parse_page_type(&page_type)?,
        parent_id: row.get("parent_id"),
        order_key: row.get("order_key"),
        icon: row.get("icon"),
        tags: parse_tags(&tags_json),
        updated_at: ts(row.get("updated_at")),
    })
}

// ============ Validation helpers ============

fn clean_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::bad_request("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::bad_request(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
        .collect()
}

fn clean_icon(icon: Option<String>) -> Option<String> {
    icon.map(|i| i.trim().to_string()).filter(|i| !i.is_empty())
}

async fn slug_taken(conn: &mut SqliteConnection, slug: &str, except: Option<&str>) -> Result<bool> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM pages WHERE slug = ?")
        .bind(slug)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(matches!(existing, Some(id) if Some(id.as_str()) != except))
}

/// Validate an explicit slug or derive a free one from the title.
async fn resolve_slug(
    conn: &mut SqliteConnection,
    explicit: Option<&str>,
    title: &str,
    except: Option<&str>,
) -> Result<String> {
    if let Some(s) = explicit {
        let s = s.trim();
        if !slug::is_valid_slug(s) {
            return Err(Error::bad_request(format!(
                "invalid slug '{}': use lowercase letters, digits and single dashes",
                s
            )));
        }
        if slug_taken(conn, s, except).await? {
            return Err(Error::Conflict(format!("slug '{}' is already in use", s)));
        }
        return Ok(s.to_string());
    }

    let base = slug::slugify(title);
    let mut n = 1;
    loop {
        let candidate = slug::with_suffix(&base, n);
        if !slug_taken(conn, &candidate, except).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Begin a transaction holding the database write lock.
async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    let mut tx = pool.begin().await?;
    // A write as the first statement takes the lock before any read, so
    // concurrent writers queue on busy_timeout rather than racing.
    sqlx::query("UPDATE pages SET view_count = view_count WHERE 0")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Database(sqlx::Error::Database(db)) => {
            let msg = db.message();
            (db.is_unique_violation() && msg.contains(SIBLING_INDEX))
                || msg.contains("database is locked")
        }
        _ => false,
    }
}

async fn backoff(attempt: u32) {
    use rand::Rng;
    let ms = rand::rng().random_range(5..25) * u64::from(attempt + 1);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

async fn fetch_active(conn: &mut SqliteConnection, id: &str) -> Result<Page> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM pages WHERE id = ? AND deleted_at IS NULL",
        PAGE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| Error::not_found(format!("page {}", id)))?;
    page_from_row(&row)
}

async fn ensure_active_parent(conn: &mut SqliteConnection, parent_id: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM pages WHERE id = ? AND deleted_at IS NULL",
    )
    .bind(parent_id)
    .fetch_one(&mut *conn)
    .await?;
    if !exists {
        return Err(Error::bad_request(format!(
            "parent page {} not found",
            parent_id
        )));
    }
    Ok(())
}

async fn index_page(conn: &mut SqliteConnection, id: &str, title: &str, text: &str) -> Result<()> {
    sqlx::query("DELETE FROM pages_fts WHERE page_id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO pages_fts (page_id, title, content_text) VALUES (?, ?, ?)")
        .bind(id)
        .bind(title)
        .bind(text)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ============ Ordering ============

/// Active siblings under `parent` (excluding `exclude`) as `(id, order_key)`
/// in display order.
async fn sibling_keys(
    conn: &mut SqliteConnection,
    parent: Option<&str>,
    exclude: Option<&str>,
) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        r#"
        SELECT id, order_key FROM pages
        WHERE COALESCE(parent_id, '') = COALESCE(?, '')
          AND deleted_at IS NULL
          AND id != COALESCE(?, '')
        ORDER BY order_key, id
        "#,
    )
    .bind(parent)
    .bind(exclude)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>("id"), r.get::<String, _>("order_key")))
        .collect())
}

/// Reassign evenly spread keys to all active siblings, keeping their order.
async fn rebalance_siblings(
    conn: &mut SqliteConnection,
    parent: Option<&str>,
    exclude: Option<&str>,
) -> Result<()> {
    let siblings = sibling_keys(conn, parent, exclude).await?;
    let keys = order_key::keys_between(None, None, siblings.len())?;
    warn!(
        parent = parent.unwrap_or("<root>"),
        count = siblings.len(),
        "rebalancing sibling order keys"
    );

    // Park every key on a unique placeholder first so the new keys never
    // collide with old ones mid-update.
    for (id, _) in &siblings {
        sqlx::query("UPDATE pages SET order_key = '~' || id WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    for ((id, _), key) in siblings.iter().zip(keys) {
        sqlx::query("UPDATE pages SET order_key = ? WHERE id = ?")
            .bind(key)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn neighbor_bounds<'a>(
    siblings: &'a [(String, String)],
    after_id: Option<&str>,
    before_id: Option<&str>,
) -> Result<(Option<&'a str>, Option<&'a str>)> {
    let position = |id: &str| {
        siblings
            .iter()
            .position(|(sid, _)| sid == id)
            .ok_or_else(|| Error::bad_request(format!("page {} is not a sibling at the target", id)))
    };
    let key_at = |i: usize| siblings.get(i).map(|(_, k)| k.as_str());

    match (after_id, before_id) {
        (None, None) => Ok((siblings.last().map(|(_, k)| k.as_str()), None)),
        (Some(a), None) => {
            let i = position(a)?;
            Ok((key_at(i), key_at(i + 1)))
        }
        (None, Some(b)) => {
            let i = position(b)?;
            Ok((if i == 0 { None } else { key_at(i - 1) }, key_at(i)))
        }
        (Some(a), Some(b)) => {
            let ia = position(a)?;
            let ib = position(b)?;
            if ib != ia + 1 {
                return Err(Error::Conflict(
                    "afterId and beforeId are not adjacent siblings".to_string(),
                ));
            }
            Ok((key_at(ia), key_at(ib)))
        }
    }
}

/// Compute the order key for a page placed under `parent`.
async fn placement_key(
    conn: &mut SqliteConnection,
    parent: Option<&str>,
    after_id: Option<&str>,
    before_id: Option<&str>,
    moving: Option<&str>,
) -> Result<String> {
    let siblings = sibling_keys(conn, parent, moving).await?;
    let (lower, upper) = neighbor_bounds(&siblings, after_id, before_id)?;

    match order_key::jittered_key_between(lower, upper) {
        Ok(key) => Ok(key),
        Err(err @ (OrderKeyError::InvalidBounds { .. } | OrderKeyError::InvalidKey(_))) => {
            // Stored keys are out of order or malformed; respread and retry once.
            warn!(error = %err, "sibling keys unusable");
            rebalance_siblings(conn, parent, moving).await?;
            let siblings = sibling_keys(conn, parent, moving).await?;
            let (lower, upper) = neighbor_bounds(&siblings, after_id, before_id)?;
            Ok(order_key::jittered_key_between(lower, upper)?)
        }
        Err(err) => Err(err.into()),
    }
}

async fn ancestor_ids(conn: &mut SqliteConnection, id: &str) -> Result<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        WITH RECURSIVE ancestors(id, parent_id, depth) AS (
            SELECT id, parent_id, 0 FROM pages WHERE id = ?
            UNION ALL
            SELECT p.id, p.parent_id, a.depth + 1
            FROM pages p JOIN ancestors a ON p.id = a.parent_id
            WHERE a.depth < 1000
        )
        SELECT id FROM ancestors ORDER BY depth DESC
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// `id` and every descendant, optionally restricted to rows of one trash
/// batch.
async fn subtree_ids(
    conn: &mut SqliteConnection,
    id: &str,
    trash_batch: Option<&str>,
) -> Result<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        WITH RECURSIVE subtree(id) AS (
            SELECT id FROM pages WHERE id = ?
            UNION ALL
            SELECT p.id FROM pages p JOIN subtree s ON p.parent_id = s.id
            WHERE ? IS NULL OR p.trash_batch = ?
        )
        SELECT id FROM subtree
        "#,
    )
    .bind(id)
    .bind(trash_batch)
    .bind(trash_batch)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

// ============ Create / read / update ============

/// Create a page. Without `after_id`/`before_id` it is appended after its
/// last sibling.
pub async fn create_page(
    pool: &SqlitePool,
    input: NewPage,
    actor: Option<&str>,
    retries: u32,
) -> Result<Page> {
    let title = clean_title(&input.title)?;
    let content = richtext::normalize_doc(input.content).map_err(Error::BadRequest)?;
    let content_text = richtext::extract_text(&content);
    let content_json = serde_json::to_string(&content)?;
    let tags_json = serde_json::to_string(&clean_tags(input.tags))?;
    let icon = clean_icon(input.icon);
    let parent = input.parent_id.as_deref();

    let mut attempt = 0;
    let id = loop {
        let mut tx = begin_write(pool).await?;
        let result = async {
            if let Some(p) = parent {
                ensure_active_parent(&mut tx, p).await?;
            }
            let slug = resolve_slug(&mut tx, input.slug.as_deref(), &title, None).await?;
            let key = placement_key(
                &mut tx,
                parent,
                input.after_id.as_deref(),
                input.before_id.as_deref(),
                None,
            )
            .await?;

            let id = Uuid::new_v4().to_string();
            let ts_now = now();
            sqlx::query(
                r#"
                INSERT INTO pages (id, slug, title, content_json, content_text, page_type, parent_id,
                                   order_key, icon, tags_json, created_at, updated_at, created_by, updated_by)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&slug)
            .bind(&title)
            .bind(&content_json)
            .bind(&content_text)
            .bind(input.page_type.as_str())
            .bind(parent)
            .bind(&key)
            .bind(&icon)
            .bind(&tags_json)
            .bind(ts_now)
            .bind(ts_now)
            .bind(actor)
            .bind(actor)
            .execute(&mut *tx)
            .await?;

            index_page(&mut tx, &id, &title, &content_text).await?;
            Ok::<_, Error>(id)
        }
        .await;

        match result {
            Ok(id) => {
                tx.commit().await?;
                break id;
            }
            Err(e) if attempt < retries && is_retryable(&e) => {
                drop(tx);
                warn!(attempt, error = %e, "page create collided, retrying");
                backoff(attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    };

    info!(page_id = %id, title = %title, "page created");
    get_page(pool, &id).await
}

/// Fetch an active page by id.
pub async fn get_page(pool: &SqlitePool, id: &str) -> Result<Page> {
    let mut conn = pool.acquire().await?;
    fetch_active(&mut conn, id).await
}

/// Fetch an active page by slug, optionally counting a view.
pub async fn get_page_by_slug(pool: &SqlitePool, slug: &str, count_view: bool) -> Result<Page> {
    if count_view {
        sqlx::query(
            "UPDATE pages SET view_count = view_count + 1 WHERE slug = ? AND deleted_at IS NULL",
        )
        .bind(slug)
        .execute(pool)
        .await?;
    }

    let row = sqlx::query(&format!(
        "SELECT {} FROM pages WHERE slug = ? AND deleted_at IS NULL",
        PAGE_COLUMNS
    ))
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found(format!("page '{}'", slug)))?;
    page_from_row(&row)
}

pub async fn update_page(
    pool: &SqlitePool,
    id: &str,
    update: PageUpdate,
    actor: Option<&str>,
) -> Result<Page> {
    let mut tx = begin_write(pool).await?;
    let mut page = fetch_active(&mut tx, id).await?;

    if let Some(title) = update.title {
        page.title = clean_title(&title)?;
    }
    if let Some(ref s) = update.slug {
        if s != &page.slug {
            page.slug = resolve_slug(&mut tx, Some(s), &page.title, Some(id)).await?;
        }
    }
    if let Some(content) = update.content {
        page.content = richtext::normalize_doc(content).map_err(Error::BadRequest)?;
        page.content_text = richtext::extract_text(&page.content);
    }
    if let Some(t) = update.page_type {
        page.page_type = t;
    }
    if update.icon.is_some() {
        page.icon = clean_icon(update.icon);
    }
    if let Some(tags) = update.tags {
        page.tags = clean_tags(tags);
    }

    sqlx::query(
        r#"
        UPDATE pages SET slug = ?, title = ?, content_json = ?, content_text = ?, page_type = ?,
                         icon = ?, tags_json = ?, updated_at = ?, updated_by = ?
        WHERE id = ?
        "#,
    )
    .bind(&page.slug)
    .bind(&page.title)
    .bind(serde_json::to_string(&page.content)?)
    .bind(&page.content_text)
    .bind(page.page_type.as_str())
    .bind(&page.icon)
    .bind(serde_json::to_string(&page.tags)?)
    .bind(now())
    .bind(actor)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    index_page(&mut tx, id, &page.title, &page.content_text).await?;
    tx.commit().await?;

    debug!(page_id = %id, "page updated");
    get_page(pool, id).await
}

/// Active pages matching `filter`. Listings restricted to one parent come
/// back in sibling order, others alphabetically.
pub async fn list_pages(pool: &SqlitePool, filter: &PageFilter) -> Result<Vec<PageSummary>> {
    let mut sql = format!(
        "SELECT {} FROM pages WHERE deleted_at IS NULL",
        SUMMARY_COLUMNS
    );
    if filter.page_type.is_some() {
        sql.push_str(" AND page_type = ?");
    }
    match filter.parent {
        ParentFilter::Any => {}
        ParentFilter::Root => sql.push_str(" AND parent_id IS NULL"),
        ParentFilter::Page(_) => sql.push_str(" AND parent_id = ?"),
    }
    if filter.tag.is_some() {
        sql.push_str(
            " AND EXISTS (SELECT 1 FROM json_each(pages.tags_json) WHERE lower(json_each.value) = lower(?))",
        );
    }
    if filter.parent == ParentFilter::Any {
        sql.push_str(" ORDER BY title COLLATE NOCASE, id");
    } else {
        sql.push_str(" ORDER BY order_key, id");
    }
    sql.push_str(" LIMIT ? OFFSET ?");

    let mut query = sqlx::query(&sql);
    if let Some(t) = filter.page_type {
        query = query.bind(t.as_str());
    }
    if let ParentFilter::Page(ref p) = filter.parent {
        query = query.bind(p);
    }
    if let Some(ref tag) = filter.tag {
        query = query.bind(tag);
    }
    let rows = query
        .bind(filter.limit.unwrap_or(-1))
        .bind(filter.offset.unwrap_or(0))
        .fetch_all(pool)
        .await?;

    rows.iter().map(summary_from_row).collect()
}

/// Active children of an active page, in order.
pub async fn children(pool: &SqlitePool, parent_id: &str) -> Result<Vec<PageSummary>> {
    get_page(pool, parent_id).await?;
    list_pages(
        pool,
        &PageFilter {
            parent: ParentFilter::Page(parent_id.to_string()),
            ..Default::default()
        },
    )
    .await
}

/// Nested navigation tree of active pages.
///
/// With `root = Some(id)` the tree below that page is returned. Pages whose
/// parent is not active are shown at the top level.
pub async fn tree(pool: &SqlitePool, root: Option<&str>) -> Result<Vec<TreeNode>> {
    if let Some(id) = root {
        get_page(pool, id).await?;
    }

    let rows = sqlx::query(&format!(
        "SELECT {} FROM pages WHERE deleted_at IS NULL ORDER BY order_key, id",
        SUMMARY_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    let pages: Vec<PageSummary> = rows.iter().map(summary_from_row).collect::<Result<_>>()?;
    let active: HashSet<String> = pages.iter().map(|p| p.id.clone()).collect();

    let mut by_parent: HashMap<Option<String>, Vec<PageSummary>> = HashMap::new();
    for page in pages {
        let parent = page.parent_id.clone().filter(|p| active.contains(p));
        by_parent.entry(parent).or_default().push(page);
    }

    Ok(build_tree(root.map(str::to_string), &mut by_parent))
}

fn build_tree(
    parent: Option<String>,
    by_parent: &mut HashMap<Option<String>, Vec<PageSummary>>,
) -> Vec<TreeNode> {
    let pages = by_parent.remove(&parent).unwrap_or_default();
    pages
        .into_iter()
        .map(|page| {
            let children = build_tree(Some(page.id.clone()), by_parent);
            TreeNode { page, children }
        })
        .collect()
}

/// Ancestors of a page from the root down to the page itself.
pub async fn breadcrumbs(pool: &SqlitePool, id: &str) -> Result<Vec<PageSummary>> {
    let mut conn = pool.acquire().await?;
    fetch_active(&mut conn, id).await?;
    let ids = ancestor_ids(&mut conn, id).await?;

    let mut crumbs = Vec::with_capacity(ids.len());
    for ancestor in ids {
        let row = sqlx::query(&format!(
            "SELECT {} FROM pages WHERE id = ?",
            SUMMARY_COLUMNS
        ))
        .bind(&ancestor)
        .fetch_one(&mut *conn)
        .await?;
        crumbs.push(summary_from_row(&row)?);
    }
    Ok(crumbs)
}

// ============ Move ============

/// Move a page to a new parent and/or position among its siblings.
pub async fn move_page(
    pool: &SqlitePool,
    id: &str,
    req: &MoveRequest,
    actor: Option<&str>,
    retries: u32,
) -> Result<Page> {
    let mut attempt = 0;
    loop {
        match try_move(pool, id, req, actor).await {
            Ok(()) => break,
            Err(e) if attempt < retries && is_retryable(&e) => {
                warn!(page_id = %id, attempt, error = %e, "page move collided, retrying");
                backoff(attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
    get_page(pool, id).await
}

async fn try_move(pool: &SqlitePool, id: &str, req: &MoveRequest, actor: Option<&str>) -> Result<()> {
    let parent = req.parent_id.as_deref();
    if parent == Some(id) {
        return Err(Error::bad_request("a page cannot be its own parent"));
    }
    if req.after_id.as_deref() == Some(id) || req.before_id.as_deref() == Some(id) {
        return Err(Error::bad_request("a page cannot be positioned relative to itself"));
    }

    let mut tx = begin_write(pool).await?;
    let page = fetch_active(&mut tx, id).await?;

    if let Some(p) = parent {
        ensure_active_parent(&mut tx, p).await?;
        if ancestor_ids(&mut tx, p).await?.iter().any(|a| a == id) {
            return Err(Error::bad_request(
                "a page cannot be moved under one of its descendants",
            ));
        }
    }

    let key = placement_key(
        &mut tx,
        parent,
        req.after_id.as_deref(),
        req.before_id.as_deref(),
        Some(id),
    )
    .await?;

    sqlx::query(
        "UPDATE pages SET parent_id = ?, order_key = ?, updated_at = ?, updated_by = ? WHERE id = ?",
    )
    .bind(parent)
    .bind(&key)
    .bind(now())
    .bind(actor)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!(
        page_id = %id,
        from_parent = page.parent_id.as_deref().unwrap_or("<root>"),
        to_parent = parent.unwrap_or("<root>"),
        order_key = %key,
        "page moved"
    );
    Ok(())
}

// ============ Trash ============

/// Move a page and its active descendants to the trash. Returns the number
/// of pages trashed.
pub async fn soft_delete(pool: &SqlitePool, id: &str, actor: Option<&str>) -> Result<u64> {
    let mut tx = begin_write(pool).await?;
    fetch_active(&mut tx, id).await?;

    let ids = subtree_ids(&mut tx, id, None).await?;
    let batch = Uuid::new_v4().to_string();
    let ts_now = now();
    let mut trashed = 0;
    for page_id in &ids {
        trashed += sqlx::query(
            r#"
            UPDATE pages SET deleted_at = ?, trash_batch = ?, updated_at = ?, updated_by = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(ts_now)
        .bind(&batch)
        .bind(ts_now)
        .bind(actor)
        .bind(page_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;

    info!(page_id = %id, trashed, "page moved to trash");
    Ok(trashed)
}

/// Trash roots (pages not trashed together with their parent), newest first.
pub async fn list_trash(pool: &SqlitePool) -> Result<Vec<TrashedPage>> {
    let rows = sqlx::query(
        r#"
        SELECT id, slug, title, page_type, parent_id, deleted_at, trash_batch
        FROM pages WHERE deleted_at IS NOT NULL
        ORDER BY deleted_at DESC, title COLLATE NOCASE
        "#,
    )
    .fetch_all(pool)
    .await?;

    struct Trashed {
        id: String,
        parent_id: Option<String>,
        deleted_at: i64,
        batch: Option<String>,
    }
    let all: Vec<Trashed> = rows
        .iter()
        .map(|r| Trashed {
            id: r.get("id"),
            parent_id: r.get("parent_id"),
            deleted_at: r.get("deleted_at"),
            batch: r.get("trash_batch"),
        })
        .collect();
    let batch_of: HashMap<&str, &str> = all
        .iter()
        .filter_map(|t| t.batch.as_deref().map(|b| (t.id.as_str(), b)))
        .collect();

    // A page is a trash root unless its parent was trashed in the same operation.
    let trashed_with_parent = |t: &Trashed| match (t.parent_id.as_deref(), t.batch.as_deref()) {
        (Some(parent), Some(batch)) => batch_of.get(parent) == Some(&batch),
        _ => false,
    };

    let mut children_of: HashMap<&str, Vec<&Trashed>> = HashMap::new();
    for t in &all {
        if trashed_with_parent(t) {
            if let Some(p) = t.parent_id.as_deref() {
                children_of.entry(p).or_default().push(t);
            }
        }
    }

    let mut out = Vec::new();
    for (row, t) in rows.iter().zip(all.iter()) {
        if trashed_with_parent(t) {
            continue;
        }
        let mut stack = vec![t.id.as_str()];
        let mut descendants = 0;
        while let Some(current) = stack.pop() {
            if let Some(kids) = children_of.get(current) {
                descendants += kids.len() as i64;
                stack.extend(kids.iter().map(|k| k.id.as_str()));
            }
        }
        let page_type: String = row.get("page_type");
        out.push(TrashedPage {
            id: t.id.clone(),
            slug: row.get("slug"),
            title: row.get("title"),
            page_type: parse_page_type(&page_type)?,
            parent_id: t.parent_id.clone(),
            deleted_at: ts(t.deleted_at),
            descendant_count: descendants,
        });
    }
    Ok(out)
}

/// Restore a trashed page together with the descendants trashed with it.
///
/// If the old parent is no longer active the page is restored at the root.
/// It keeps its order key unless an active sibling now holds it, in which
/// case it goes to the end.
pub async fn restore(pool: &SqlitePool, id: &str, actor: Option<&str>) -> Result<Page> {
    let mut tx = begin_write(pool).await?;

    let row = sqlx::query(
        "SELECT parent_id, order_key, deleted_at, trash_batch FROM pages WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| Error::not_found(format!("page {}", id)))?;
    let deleted_at: Option<i64> = row.get("deleted_at");
    if deleted_at.is_none() {
        return Err(Error::bad_request(format!("page {} is not in the trash", id)));
    }
    let batch: Option<String> = row.get("trash_batch");
    let old_parent: Option<String> = row.get("parent_id");
    let old_key: String = row.get("order_key");

    let parent = match old_parent {
        Some(p) => {
            let active: bool = sqlx::query_scalar(
                "SELECT COUNT(*) > 0 FROM pages WHERE id = ? AND deleted_at IS NULL",
            )
            .bind(&p)
            .fetch_one(&mut *tx)
            .await?;
            active.then_some(p)
        }
        None => None,
    };

    let siblings = sibling_keys(&mut tx, parent.as_deref(), Some(id)).await?;
    let key = if siblings.iter().any(|(_, k)| k == &old_key) {
        placement_key(&mut tx, parent.as_deref(), None, None, Some(id)).await?
    } else {
        old_key
    };

    // Without a batch only the page itself comes back.
    let ids = match batch.as_deref() {
        Some(b) => subtree_ids(&mut tx, id, Some(b)).await?,
        None => vec![id.to_string()],
    };
    let ts_now = now();
    sqlx::query(
        r#"
        UPDATE pages SET deleted_at = NULL, trash_batch = NULL, parent_id = ?, order_key = ?,
                         updated_at = ?, updated_by = ?
        WHERE id = ?
        "#,
    )
    .bind(parent.as_deref())
    .bind(&key)
    .bind(ts_now)
    .bind(actor)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    for child in ids.iter().filter(|c| c.as_str() != id) {
        sqlx::query(
            "UPDATE pages SET deleted_at = NULL, trash_batch = NULL, updated_at = ? WHERE id = ?",
        )
            .bind(ts_now)
            .bind(child)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    info!(page_id = %id, restored = ids.len(), "page restored from trash");
    get_page(pool, id).await
}

/// Permanently delete a trashed page and everything below it.
pub async fn purge(pool: &SqlitePool, id: &str) -> Result<u64> {
    let mut tx = begin_write(pool).await?;
    let deleted_at: Option<Option<i64>> =
        sqlx::query_scalar("SELECT deleted_at FROM pages WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    match deleted_at {
        None => return Err(Error::not_found(format!("page {}", id))),
        Some(None) => {
            return Err(Error::bad_request(
                "page must be in the trash before it can be permanently deleted",
            ))
        }
        Some(Some(_)) => {}
    }

    let ids = subtree_ids(&mut tx, id, None).await?;
    for page_id in &ids {
        sqlx::query("DELETE FROM pages_fts WHERE page_id = ?")
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
    }
    // Descendants go with the parent through ON DELETE CASCADE.
    sqlx::query("DELETE FROM pages WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(page_id = %id, purged = ids.len(), "page permanently deleted");
    Ok(ids.len() as u64)
}

/// Permanently delete every trashed page.
pub async fn empty_trash(pool: &SqlitePool) -> Result<u64> {
    let roots = list_trash(pool).await?;
    let mut purged = 0;
    for root in roots {
        match purge(pool, &root.id).await {
            Ok(n) => purged += n,
            // already removed with an earlier root
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(purged)
}

// ============ CLI ============

/// Indented outline of a page tree, one page per line.
pub fn render_tree(nodes: &[TreeNode]) -> String {
    fn walk(nodes: &[TreeNode], depth: usize, out: &mut String) {
        for node in nodes {
            let page = &node.page;
            let icon = page.icon.as_deref().map(|i| format!("{} ", i)).unwrap_or_default();
            out.push_str(&format!(
                "{}{}{} [{}] /{}\n",
                "  ".repeat(depth),
                icon,
                page.title,
                page.page_type,
                page.slug
            ));
            walk(&node.children, depth + 1, out);
        }
    }
    let mut out = String::new();
    walk(nodes, 0, &mut out);
    out
}

/// `scribe tree`.
pub async fn run_tree(config: &crate::config::Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let nodes = tree(&pool, None).await?;
    if nodes.is_empty() {
        println!("No pages.");
    } else {
        print!("{}", render_tree(&nodes));
    }
    pool.close().await;
    Ok(())
}
