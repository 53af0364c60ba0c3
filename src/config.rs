//! TOML configuration parsing.
//!
//! All settings live in one file passed with `--config`. Secrets may be
//! written literally or as `env:NAME`, in which case they are read from the
//! environment when the file is loaded.
//!
//! ```toml
//! [db]
//! path = "./data/scribe.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [auth]
//! session_secret = "env:SCRIBE_SESSION_SECRET"
//! admin_passcode = "env:SCRIBE_ADMIN_PASSCODE"
//! cron_secret = "env:CRON_SECRET"
//!
//! [shifts.zone_groups]
//! "A1" = "Acute"
//! "FT" = "Fast Track"
//!
//! [shifts.source]
//! kind = "http"
//! url = "https://schedule.example.org/api/export"
//! token_env = "SCHEDULE_TOKEN"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub pages: PagesConfig,
    #[serde(default)]
    pub shifts: ShiftsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub session_secret: String,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Bearer passcode for destructive maintenance endpoints.
    #[serde(default)]
    pub admin_passcode: Option<String>,
    /// Shared secret for the cron-triggered scrape endpoint.
    #[serde(default)]
    pub cron_secret: Option<String>,
}

fn default_session_ttl_hours() -> i64 {
    24 * 7
}
fn default_cookie_name() -> String {
    "scribe_session".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PagesConfig {
    #[serde(default = "default_move_retries")]
    pub move_retries: u32,
    #[serde(default = "default_search_limit")]
    pub search_limit: i64,
    #[serde(default = "default_max_search_limit")]
    pub max_search_limit: i64,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            move_retries: default_move_retries(),
            search_limit: default_search_limit(),
            max_search_limit: default_max_search_limit(),
        }
    }
}

fn default_move_retries() -> u32 {
    3
}
fn default_search_limit() -> i64 {
    20
}
fn default_max_search_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShiftsConfig {
    /// Shift label → zone group. Labels not listed here are skipped by sync.
    #[serde(default)]
    pub zone_groups: BTreeMap<String, String>,
    /// Explicit board order of zone groups; defaults to sorted group names.
    #[serde(default)]
    pub zone_order: Vec<String>,
    #[serde(default = "default_provider_roles")]
    pub provider_roles: Vec<String>,
    #[serde(default = "default_scribe_roles")]
    pub scribe_roles: Vec<String>,
    #[serde(default)]
    pub sync_interval_minutes: Option<u64>,
    #[serde(default)]
    pub source: Option<ScheduleSourceConfig>,
}

impl Default for ShiftsConfig {
    fn default() -> Self {
        Self {
            zone_groups: BTreeMap::new(),
            zone_order: Vec::new(),
            provider_roles: default_provider_roles(),
            scribe_roles: default_scribe_roles(),
            sync_interval_minutes: None,
            source: None,
        }
    }
}

fn default_provider_roles() -> Vec<String> {
    ["provider", "physician", "md", "do", "pa", "np", "attending"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_scribe_roles() -> Vec<String> {
    vec!["scribe".to_string()]
}

impl ShiftsConfig {
    /// Configured spelling of a shift label and its zone group. Labels are
    /// matched ignoring case and runs of whitespace.
    pub fn lookup_label(&self, label: &str) -> Option<(&str, &str)> {
        let wanted = collapse_whitespace(label);
        self.zone_groups
            .iter()
            .find(|(k, _)| collapse_whitespace(k).eq_ignore_ascii_case(&wanted))
            .map(|(k, v)| (k.trim(), v.as_str()))
    }

    /// Zone groups in board display order.
    pub fn ordered_zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = self.zone_order.clone();
        let mut rest: Vec<&String> = self
            .zone_groups
            .values()
            .filter(|z| !zones.contains(z))
            .collect();
        rest.sort();
        rest.dedup();
        zones.extend(rest.into_iter().cloned());
        zones
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScheduleSourceConfig {
    Http {
        url: String,
        /// Name of the environment variable holding a bearer token.
        #[serde(default)]
        token_env: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        /// Retries after a network error, 429 or 5xx.
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
    File {
        path: PathBuf,
    },
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolve an `env:NAME` reference; other values are returned as-is.
fn resolve_secret(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var)
            .with_context(|| format!("Environment variable {} is not set", var)),
        None => Ok(value.to_string()),
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse, resolve secrets and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    config.auth.session_secret = resolve_secret(&config.auth.session_secret)?;
    if let Some(ref p) = config.auth.admin_passcode {
        config.auth.admin_passcode = Some(resolve_secret(p)?);
    }
    if let Some(ref s) = config.auth.cron_secret {
        config.auth.cron_secret = Some(resolve_secret(s)?);
    }

    // Validate auth
    if config.auth.session_secret.len() < 32 {
        anyhow::bail!("auth.session_secret must be at least 32 bytes");
    }
    if config.auth.session_ttl_hours < 1 {
        anyhow::bail!("auth.session_ttl_hours must be >= 1");
    }
    if config.auth.admin_passcode.as_deref() == Some("") {
        anyhow::bail!("auth.admin_passcode must not be empty when set");
    }
    if config.auth.cron_secret.as_deref() == Some("") {
        anyhow::bail!("auth.cron_secret must not be empty when set");
    }

    // Validate pages
    if config.pages.search_limit < 1 || config.pages.max_search_limit < config.pages.search_limit
    {
        anyhow::bail!("pages.search_limit must be >= 1 and <= pages.max_search_limit");
    }

    // Validate shifts
    if config.shifts.sync_interval_minutes == Some(0) {
        anyhow::bail!("shifts.sync_interval_minutes must be > 0");
    }
    if config.shifts.sync_interval_minutes.is_some() && config.shifts.source.is_none() {
        anyhow::bail!("shifts.sync_interval_minutes requires a [shifts.source] section");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[db]
path = "/tmp/scribe.sqlite"

[server]
bind = "127.0.0.1:0"

[auth]
session_secret = "0123456789abcdef0123456789abcdef"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(BASE).unwrap();
        assert_eq!(cfg.auth.cookie_name, "scribe_session");
        assert_eq!(cfg.pages.move_retries, 3);
        assert!(cfg.shifts.source.is_none());
        assert!(cfg.shifts.provider_roles.contains(&"physician".to_string()));
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_short_secret_rejected() {
        let content = BASE.replace("0123456789abcdef0123456789abcdef", "short");
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("session_secret"));
    }

    #[test]
    fn test_env_secret_resolved() {
        std::env::set_var("SCRIBE_TEST_PASSCODE_XYZ", "letmein");
        let content = format!("{}admin_passcode = \"env:SCRIBE_TEST_PASSCODE_XYZ\"\n", BASE);
        let cfg = parse_config(&content).unwrap();
        assert_eq!(cfg.auth.admin_passcode.as_deref(), Some("letmein"));
    }

    #[test]
    fn test_source_variants() {
        let content = format!(
            "{}\n[shifts.source]\nkind = \"file\"\npath = \"/tmp/schedule.json\"\n",
            BASE
        );
        let cfg = parse_config(&content).unwrap();
        assert!(matches!(
            cfg.shifts.source,
            Some(ScheduleSourceConfig::File { .. })
        ));

        let content = format!(
            "{}\n[shifts.source]\nkind = \"http\"\nurl = \"http://localhost:9/x\"\n",
            BASE
        );
        let cfg = parse_config(&content).unwrap();
        match cfg.shifts.source {
            Some(ScheduleSourceConfig::Http { timeout_secs, .. }) => assert_eq!(timeout_secs, 30),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_interval_requires_source() {
        let content = format!("{}\n[shifts]\nsync_interval_minutes = 15\n", BASE);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_zone_lookup_case_insensitive() {
        let content = format!(
            "{}\n[shifts]\nzone_order = [\"Acute\"]\n[shifts.zone_groups]\n\"A1\" = \"Acute\"\n\"FT\" = \"Fast Track\"\n\"b2\" = \"Acute\"\n",
            BASE
        );
        let cfg = parse_config(&content).unwrap();
        assert_eq!(cfg.shifts.lookup_label(" a1 "), Some(("A1", "Acute")));
        assert_eq!(cfg.shifts.lookup_label("B2"), Some(("b2", "Acute")));
        assert_eq!(cfg.shifts.lookup_label("ZZ"), None);
        assert_eq!(cfg.shifts.ordered_zones(), vec!["Acute", "Fast Track"]);
    }
}
