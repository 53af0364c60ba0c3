//! Core data models used throughout Scribe Hub.
//!
//! These types are what the store modules return and what the HTTP API
//! serializes. JSON field names are camelCase to match the web client.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Convert a stored unix timestamp into a `DateTime<Utc>`.
pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Kind of knowledge-base page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Provider,
    Procedure,
    Smartphrase,
    Scenario,
    Wiki,
    Folder,
}

impl PageType {
    pub const ALL: [PageType; 6] = [
        PageType::Provider,
        PageType::Procedure,
        PageType::Smartphrase,
        PageType::Scenario,
        PageType::Wiki,
        PageType::Folder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Provider => "provider",
            PageType::Procedure => "procedure",
            PageType::Smartphrase => "smartphrase",
            PageType::Scenario => "scenario",
            PageType::Wiki => "wiki",
            PageType::Folder => "folder",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown page type: {}", s))
    }
}

/// A full page including its rich-text content.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub slug: String,
    pub title: String,
    /// TipTap document JSON.
    pub content: serde_json::Value,
    pub content_text: String,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub parent_id: Option<String>,
    pub order_key: String,
    pub icon: Option<String>,
    pub tags: Vec<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

/// Page metadata without content, used by listings and the tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub parent_id: Option<String>,
    pub order_key: String,
    pub icon: Option<String>,
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// A node of the navigation tree.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub page: PageSummary,
    pub children: Vec<TreeNode>,
}

/// A page in the trash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashedPage {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub parent_id: Option<String>,
    pub deleted_at: DateTime<Utc>,
    /// Number of descendants trashed together with this page.
    pub descendant_count: i64,
}

/// A full-text search hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(rename = "type")]
    pub page_type: PageType,
    pub score: f64,
    pub snippet: String,
}

/// Kind of flat reference entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Scribe,
    Provider,
    Physician,
    Term,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Scribe => "scribe",
            ReferenceKind::Provider => "provider",
            ReferenceKind::Physician => "physician",
            ReferenceKind::Term => "term",
        }
    }
}

impl FromStr for ReferenceKind {
    type Err = String;

    /// Accepts singular names and the plural path segments used by the API
    /// (`scribes`, `providers`, `physicians`, `terminology`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scribe" | "scribes" => Ok(ReferenceKind::Scribe),
            "provider" | "providers" => Ok(ReferenceKind::Provider),
            "physician" | "physicians" => Ok(ReferenceKind::Physician),
            "term" | "terms" | "terminology" => Ok(ReferenceKind::Term),
            other => Err(format!("unknown reference kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntry {
    pub id: String,
    pub kind: ReferenceKind,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Person attached to a shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonRef {
    pub id: String,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: String,
    pub date: NaiveDate,
    pub label: String,
    pub zone: String,
    pub start_time: String,
    pub end_time: String,
    pub site: Option<String>,
    pub scribe: Option<PersonRef>,
    pub provider: Option<PersonRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimatedMessage {
    pub id: String,
    pub text: String,
    pub style: Option<String>,
    pub active: bool,
    pub sort_order: i64,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Authorization role carried in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Editor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Editor => "EDITOR",
        }
    }

    /// Whether this role grants at least `required`.
    pub fn satisfies(&self, required: Role) -> bool {
        matches!((self, required), (Role::Admin, _) | (Role::Editor, Role::Editor))
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "EDITOR" => Ok(Role::Editor),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_type_round_trip_names() {
        for t in PageType::ALL {
            assert_eq!(t.as_str().parse::<PageType>().unwrap(), t);
        }
        assert_eq!("SmartPhrase".parse::<PageType>().unwrap(), PageType::Smartphrase);
        assert!("blog".parse::<PageType>().is_err());
    }

    #[test]
    fn test_reference_kind_plural_segments() {
        assert_eq!("terminology".parse::<ReferenceKind>().unwrap(), ReferenceKind::Term);
        assert_eq!("Scribes".parse::<ReferenceKind>().unwrap(), ReferenceKind::Scribe);
        assert!("nurses".parse::<ReferenceKind>().is_err());
    }

    #[test]
    fn test_role_hierarchy() {
        assert!(Role::Admin.satisfies(Role::Editor));
        assert!(Role::Admin.satisfies(Role::Admin));
        assert!(Role::Editor.satisfies(Role::Editor));
        assert!(!Role::Editor.satisfies(Role::Admin));
    }

    #[test]
    fn test_role_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Role::Editor).unwrap(), "\"EDITOR\"");
    }
}
