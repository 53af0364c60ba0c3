//! Flat reference entities: scribes, providers, physicians and terminology.
//!
//! All kinds share one table keyed by `(kind, slug)`.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ts, ReferenceEntry, ReferenceKind};
use crate::slug;

const COLUMNS: &str = "id, kind, name, slug, description, metadata_json, created_at, updated_at";

#[derive(Debug, Clone, Deserialize)]
pub struct NewReference {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferenceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<Value>,
}

fn from_row(row: &SqliteRow) -> Result<ReferenceEntry> {
    let kind: String = row.get("kind");
    let metadata: String = row.get("metadata_json");
    Ok(ReferenceEntry {
        id: row.get("id"),
        kind: kind.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        name: row.get("name"),
        slug: row.get("slug"),
        description: row.get("description"),
        metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| Value::Object(Default::default())),
        created_at: ts(row.get("created_at")),
        updated_at: ts(row.get("updated_at")),
    })
}

/// Collapse internal whitespace so "Dr.  Jane   Lee" and "Dr. Jane Lee"
/// name the same person.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_metadata(metadata: Option<Value>) -> Result<String> {
    match metadata {
        None | Some(Value::Null) => Ok("{}".to_string()),
        Some(v @ Value::Object(_)) => Ok(serde_json::to_string(&v)?),
        Some(_) => Err(Error::bad_request("metadata must be a JSON object")),
    }
}

async fn slug_exists(pool: &SqlitePool, kind: ReferenceKind, slug: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM reference_entries WHERE kind = ? AND slug = ?",
    )
    .bind(kind.as_str())
    .bind(slug)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Entries of one kind, optionally filtered by a case-insensitive name
/// substring, sorted by name.
pub async fn list(
    pool: &SqlitePool,
    kind: ReferenceKind,
    q: Option<&str>,
) -> Result<Vec<ReferenceEntry>> {
    let pattern = q
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", q.replace('%', "").replace('_', "")));

    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM reference_entries
        WHERE kind = ? AND (? IS NULL OR name LIKE ?)
        ORDER BY name COLLATE NOCASE, id
        "#,
        COLUMNS
    ))
    .bind(kind.as_str())
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}

pub async fn get(pool: &SqlitePool, kind: ReferenceKind, slug: &str) -> Result<ReferenceEntry> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM reference_entries WHERE kind = ? AND slug = ?",
        COLUMNS
    ))
    .bind(kind.as_str())
    .bind(slug)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::not_found(format!("{} '{}'", kind.as_str(), slug)))?;
    from_row(&row)
}

pub async fn create(
    pool: &SqlitePool,
    kind: ReferenceKind,
    input: NewReference,
) -> Result<ReferenceEntry> {
    let name = normalize_name(&input.name);
    if name.is_empty() {
        return Err(Error::bad_request("name must not be empty"));
    }
    let metadata = clean_metadata(input.metadata)?;

    let slug = match input.slug.as_deref().map(str::trim) {
        Some(s) => {
            if !slug::is_valid_slug(s) {
                return Err(Error::bad_request(format!("invalid slug '{}'", s)));
            }
            if slug_exists(pool, kind, s).await? {
                return Err(Error::Conflict(format!(
                    "{} slug '{}' is already in use",
                    kind.as_str(),
                    s
                )));
            }
            s.to_string()
        }
        None => {
            let base = slug::slugify(&name);
            let mut n = 1;
            loop {
                let candidate = slug::with_suffix(&base, n);
                if !slug_exists(pool, kind, &candidate).await? {
                    break candidate;
                }
                n += 1;
            }
        }
    };

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        INSERT INTO reference_entries (id, kind, name, slug, description, metadata_json, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(kind.as_str())
    .bind(&name)
    .bind(&slug)
    .bind(input.description.trim())
    .bind(&metadata)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await;

    if let Err(e) = result {
        let err = Error::from(e);
        return Err(if err.is_unique_violation() {
            Error::Conflict(format!("{} slug '{}' is already in use", kind.as_str(), slug))
        } else {
            err
        });
    }

    info!(kind = kind.as_str(), slug = %slug, "reference entry created");
    get(pool, kind, &slug).await
}

pub async fn update(
    pool: &SqlitePool,
    kind: ReferenceKind,
    slug: &str,
    update: ReferenceUpdate,
) -> Result<ReferenceEntry> {
    let mut entry = get(pool, kind, slug).await?;
    if let Some(name) = update.name {
        entry.name = normalize_name(&name);
        if entry.name.is_empty() {
            return Err(Error::bad_request("name must not be empty"));
        }
    }
    if let Some(description) = update.description {
        entry.description = description.trim().to_string();
    }
    let metadata = match update.metadata {
        Some(m) => clean_metadata(Some(m))?,
        None => serde_json::to_string(&entry.metadata)?,
    };

    sqlx::query(
        "UPDATE reference_entries SET name = ?, description = ?, metadata_json = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&entry.name)
    .bind(&entry.description)
    .bind(&metadata)
    .bind(Utc::now().timestamp())
    .bind(&entry.id)
    .execute(pool)
    .await?;

    debug!(kind = kind.as_str(), slug = %slug, "reference entry updated");
    get(pool, kind, slug).await
}

/// Delete an entry. Shifts pointing at it keep their row with the person
/// cleared.
pub async fn delete(pool: &SqlitePool, kind: ReferenceKind, slug: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM reference_entries WHERE kind = ? AND slug = ?")
        .bind(kind.as_str())
        .bind(slug)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found(format!("{} '{}'", kind.as_str(), slug)));
    }
    info!(kind = kind.as_str(), slug = %slug, "reference entry deleted");
    Ok(())
}

/// Look up an entry by case-insensitive name.
pub async fn find_by_name(
    pool: &SqlitePool,
    kind: ReferenceKind,
    name: &str,
) -> Result<Option<ReferenceEntry>> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {} FROM reference_entries
        WHERE kind = ? AND name = ? COLLATE NOCASE
        ORDER BY created_at, id
        LIMIT 1
        "#,
        COLUMNS
    ))
    .bind(kind.as_str())
    .bind(normalize_name(name))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(from_row).transpose()
}

/// Look up an entry by case-insensitive name, creating it when missing.
pub async fn find_or_create_by_name(
    pool: &SqlitePool,
    kind: ReferenceKind,
    name: &str,
) -> Result<ReferenceEntry> {
    let name = normalize_name(name);
    if name.is_empty() {
        return Err(Error::bad_request("name must not be empty"));
    }
    if let Some(entry) = find_by_name(pool, kind, &name).await? {
        return Ok(entry);
    }
    create(
        pool,
        kind,
        NewReference {
            name,
            slug: None,
            description: String::new(),
            metadata: None,
        },
    )
    .await
}
