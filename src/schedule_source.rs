//! External schedule sources for shift sync.
//!
//! A [`ScheduleSource`] returns the raw shift records of the scheduling
//! system. Two are built in: an HTTP endpoint returning JSON and a local
//! JSON file (used for imports and tests). Custom sources implement the
//! trait and are passed to [`crate::shift_sync::run_shift_sync`] directly.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ScheduleSourceConfig;

/// One person on a raw shift record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawAssignment {
    pub name: String,
    #[serde(default)]
    pub role: String,
}

/// A shift as delivered by the scheduling system, before normalization.
///
/// The time window is either one `time` string (`"07:00-15:00"`, `"7a-3p"`)
/// or separate `start`/`end` values. People come from `people` and from the
/// `scribe`/`provider` shorthands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawShift {
    #[serde(default, deserialize_with = "lenient_string")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub label: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub people: Vec<RawAssignment>,
    #[serde(default)]
    pub scribe: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// `null` becomes empty and numbers keep their JSON text, so the record
/// reaches validation instead of failing to parse.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// One entry of a payload: the shift, or why it could not be read.
pub type RawRecord = std::result::Result<RawShift, String>;

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    List(Vec<Value>),
    Wrapped { shifts: Vec<Value> },
}

/// Parse a source payload: either a JSON array of shifts or an object with
/// a `shifts` array. Entries are decoded one by one; a malformed entry is
/// returned as `Err` and does not affect the others.
pub fn parse_payload(body: &str) -> Result<Vec<RawRecord>> {
    let payload: Payload =
        serde_json::from_str(body).context("schedule payload is not a shift list")?;
    let entries = match payload {
        Payload::List(entries) | Payload::Wrapped { shifts: entries } => entries,
    };
    Ok(entries
        .into_iter()
        .map(|entry| {
            serde_json::from_value::<RawShift>(entry).map_err(|e| format!("malformed record: {}", e))
        })
        .collect())
}

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Name recorded with each sync run.
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<RawRecord>>;
}

/// Fetches the schedule with an HTTP GET.
pub struct HttpScheduleSource {
    url: String,
    token: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl HttpScheduleSource {
    pub fn new(url: &str, token: Option<String>, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            token,
            max_retries,
            client,
        })
    }
}

#[async_trait]
impl ScheduleSource for HttpScheduleSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.get(&self.url).header("Accept", "application/json");
            if let Some(ref token) = self.token {
                req = req.bearer_auth(token);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response.text().await?;
                        let shifts = parse_payload(&body)?;
                        debug!(url = %self.url, count = shifts.len(), "schedule fetched");
                        return Ok(shifts);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(url = %self.url, %status, attempt, "schedule source unavailable");
                        last_err = Some(anyhow::anyhow!(
                            "schedule source error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }
                    bail!("schedule source error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, attempt, "schedule request failed");
                    last_err = Some(e.into());
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("schedule fetch failed after retries")))
    }
}

/// Reads the schedule from a JSON file.
pub struct FileScheduleSource {
    path: PathBuf,
}

impl FileScheduleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ScheduleSource for FileScheduleSource {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read schedule file {}", self.path.display()))?;
        parse_payload(&body)
    }
}

/// Build the configured source. The bearer token is read from the
/// environment variable named by `token_env` at call time.
pub fn source_from_config(cfg: &ScheduleSourceConfig) -> Result<Box<dyn ScheduleSource>> {
    match cfg {
        ScheduleSourceConfig::Http {
            url,
            token_env,
            timeout_secs,
            max_retries,
        } => {
            let token = match token_env {
                Some(var) => Some(
                    std::env::var(var)
                        .with_context(|| format!("schedule source token variable {} is not set", var))?,
                ),
                None => None,
            };
            Ok(Box::new(HttpScheduleSource::new(
                url,
                token,
                Duration::from_secs(*timeout_secs),
                *max_retries,
            )?))
        }
        ScheduleSourceConfig::File { path } => Ok(Box::new(FileScheduleSource::new(path.clone()))),
    }
}
