//! Animated banner messages shown on the landing page.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ts, AnimatedMessage};

const COLUMNS: &str =
    "id, text, style, active, sort_order, starts_at, ends_at, created_at, updated_at";
const MAX_TEXT_LEN: usize = 500;

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub text: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdate {
    pub text: Option<String>,
    pub style: Option<String>,
    pub active: Option<bool>,
    pub sort_order: Option<i64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Remove both window bounds.
    #[serde(default)]
    pub clear_window: bool,
}

fn from_row(row: &SqliteRow) -> AnimatedMessage {
    let starts_at: Option<i64> = row.get("starts_at");
    let ends_at: Option<i64> = row.get("ends_at");
    AnimatedMessage {
        id: row.get("id"),
        text: row.get("text"),
        style: row.get("style"),
        active: row.get("active"),
        sort_order: row.get("sort_order"),
        starts_at: starts_at.map(ts),
        ends_at: ends_at.map(ts),
        created_at: ts(row.get("created_at")),
        updated_at: ts(row.get("updated_at")),
    }
}

fn check(msg: &AnimatedMessage) -> Result<()> {
    if msg.text.trim().is_empty() {
        return Err(Error::bad_request("message text must not be empty"));
    }
    if msg.text.chars().count() > MAX_TEXT_LEN {
        return Err(Error::bad_request(format!(
            "message text must be at most {} characters",
            MAX_TEXT_LEN
        )));
    }
    if let (Some(s), Some(e)) = (msg.starts_at, msg.ends_at) {
        if e <= s {
            return Err(Error::bad_request("endsAt must be after startsAt"));
        }
    }
    Ok(())
}

/// Messages to display at `now`: active and inside their window.
pub async fn list_active(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Vec<AnimatedMessage>> {
    let now = now.timestamp();
    let rows = sqlx::query(&format!(
        r#"
        SELECT {} FROM animated_messages
        WHERE active = 1
          AND (starts_at IS NULL OR starts_at <= ?)
          AND (ends_at IS NULL OR ends_at > ?)
        ORDER BY sort_order, created_at, id
        "#,
        COLUMNS
    ))
    .bind(now)
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(from_row).collect())
}

pub async fn list_all(pool: &SqlitePool) -> Result<Vec<AnimatedMessage>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM animated_messages ORDER BY sort_order, created_at, id",
        COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(from_row).collect())
}

pub async fn get(pool: &SqlitePool, id: &str) -> Result<AnimatedMessage> {
    let row = sqlx::query(&format!("SELECT {} FROM animated_messages WHERE id = ?", COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("message {}", id)))?;
    Ok(from_row(&row))
}

pub async fn create(pool: &SqlitePool, input: NewMessage) -> Result<AnimatedMessage> {
    let now = Utc::now();
    let msg = AnimatedMessage {
        id: Uuid::new_v4().to_string(),
        text: input.text.trim().to_string(),
        style: input.style.filter(|s| !s.trim().is_empty()),
        active: input.active,
        sort_order: input.sort_order,
        starts_at: input.starts_at,
        ends_at: input.ends_at,
        created_at: now,
        updated_at: now,
    };
    check(&msg)?;

    sqlx::query(
        r#"
        INSERT INTO animated_messages (id, text, style, active, sort_order, starts_at, ends_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&msg.id)
    .bind(&msg.text)
    .bind(&msg.style)
    .bind(msg.active)
    .bind(msg.sort_order)
    .bind(msg.starts_at.map(|t| t.timestamp()))
    .bind(msg.ends_at.map(|t| t.timestamp()))
    .bind(now.timestamp())
    .bind(now.timestamp())
    .execute(pool)
    .await?;

    info!(message_id = %msg.id, "animated message created");
    get(pool, &msg.id).await
}

pub async fn update(pool: &SqlitePool, id: &str, update: MessageUpdate) -> Result<AnimatedMessage> {
    let mut msg = get(pool, id).await?;
    if let Some(text) = update.text {
        msg.text = text.trim().to_string();
    }
    if let Some(style) = update.style {
        msg.style = Some(style).filter(|s| !s.trim().is_empty());
    }
    if let Some(active) = update.active {
        msg.active = active;
    }
    if let Some(order) = update.sort_order {
        msg.sort_order = order;
    }
    if update.clear_window {
        msg.starts_at = None;
        msg.ends_at = None;
    }
    if update.starts_at.is_some() {
        msg.starts_at = update.starts_at;
    }
    if update.ends_at.is_some() {
        msg.ends_at = update.ends_at;
    }
    check(&msg)?;

    sqlx::query(
        r#"
        UPDATE animated_messages
        SET text = ?, style = ?, active = ?, sort_order = ?, starts_at = ?, ends_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&msg.text)
    .bind(&msg.style)
    .bind(msg.active)
    .bind(msg.sort_order)
    .bind(msg.starts_at.map(|t| t.timestamp()))
    .bind(msg.ends_at.map(|t| t.timestamp()))
    .bind(Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await?;

    get(pool, id).await
}

pub async fn delete(pool: &SqlitePool, id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM animated_messages WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::not_found(format!("message {}", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn msg(text: &str, sort_order: i64) -> NewMessage {
        NewMessage {
            text: text.to_string(),
            style: None,
            active: true,
            sort_order,
            starts_at: None,
            ends_at: None,
        }
    }

    #[tokio::test]
    async fn test_active_window_and_order() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::open_migrated(&tmp.path().join("msg.sqlite"))
            .await
            .unwrap();
        let now = Utc::now();

        create(&pool, msg("second", 2)).await.unwrap();
        create(&pool, msg("first", 1)).await.unwrap();
        create(&pool, NewMessage { active: false, ..msg("hidden", 0) }).await.unwrap();
        create(
            &pool,
            NewMessage {
                starts_at: Some(now + Duration::hours(1)),
                ..msg("later", 0)
            },
        )
        .await
        .unwrap();
        create(
            &pool,
            NewMessage {
                starts_at: Some(now - Duration::hours(2)),
                ends_at: Some(now - Duration::hours(1)),
                ..msg("expired", 0)
            },
        )
        .await
        .unwrap();

        let texts: Vec<String> = list_active(&pool, now)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(list_all(&pool).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_validation_and_update() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::open_migrated(&tmp.path().join("msg.sqlite"))
            .await
            .unwrap();
        assert!(matches!(create(&pool, msg("  ", 0)).await, Err(Error::BadRequest(_))));

        let now = Utc::now();
        let bad_window = NewMessage {
            starts_at: Some(now),
            ends_at: Some(now - Duration::minutes(5)),
            ..msg("x", 0)
        };
        assert!(matches!(create(&pool, bad_window).await, Err(Error::BadRequest(_))));

        let m = create(&pool, msg("Welcome", 0)).await.unwrap();
        let m = update(
            &pool,
            &m.id,
            MessageUpdate {
                active: Some(false),
                style: Some("marquee".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(!m.active);
        assert_eq!(m.style.as_deref(), Some("marquee"));

        delete(&pool, &m.id).await.unwrap();
        assert!(matches!(get(&pool, &m.id).await, Err(Error::NotFound(_))));
    }
}
