//! Catalog record shapes.
//!
//! # Responsibility
//! - Define the `Record` contract shared by every dataset entity.
//! - Define the catalog item, collection and user request documents.
//!
//! # Invariants
//! - `key()` returns the natural key; it never changes for a record's life.
//! - Unknown JSON fields survive a read-modify-write cycle via `extra`.
//! - `recency()` is derived from record timestamps only, never wall clock.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

const MAX_KEY_CHARS: usize = 160;

static NATURAL_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("valid natural key regex"));

/// Contract for documents stored as one canonical dataset.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Logical entity name; also the default content path prefix.
    const ENTITY: &'static str;

    /// Natural key distinguishing records within one dataset.
    fn key(&self) -> &str;

    /// Timestamp used for newest-first ordering in published snapshots.
    fn recency(&self) -> Option<DateTime<Utc>>;
}

/// Natural key validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValidationError {
    Empty,
    TooLong(usize),
    InvalidCharacters(String),
}

impl Display for KeyValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "natural key cannot be empty"),
            Self::TooLong(len) => {
                write!(f, "natural key has {len} chars; max is {MAX_KEY_CHARS}")
            }
            Self::InvalidCharacters(key) => write!(
                f,
                "natural key `{key}` must match [a-z0-9][a-z0-9._-]*"
            ),
        }
    }
}

impl Error for KeyValidationError {}

/// Validates a natural key for use in content paths and mirror rows.
pub fn validate_key(key: &str) -> Result<(), KeyValidationError> {
    if key.is_empty() {
        return Err(KeyValidationError::Empty);
    }
    let len = key.chars().count();
    if len > MAX_KEY_CHARS {
        return Err(KeyValidationError::TooLong(len));
    }
    if !NATURAL_KEY_RE.is_match(key) {
        return Err(KeyValidationError::InvalidCharacters(key.to_string()));
    }
    Ok(())
}

/// Parses RFC 3339 timestamps, naive `YYYY-MM-DDTHH:MM:SS` and plain dates.
///
/// Naive values are interpreted as UTC. Returns `None` for anything else.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn first_timestamp(candidates: &[Option<&str>]) -> Option<DateTime<Utc>> {
    candidates
        .iter()
        .flatten()
        .find_map(|value| parse_timestamp(value))
}

fn default_item_type() -> String {
    "software".to_string()
}

/// One catalog entry (the primary entity mirrored into the relational store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    /// Natural key.
    pub slug: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<i64>,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Serialized as `type` to match the public data files.
    #[serde(rename = "type", default = "default_item_type")]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Author/publisher info; free-form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub developer: Option<Value>,
    /// Download/rating counters; free-form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
    /// Screenshots, icons, videos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CatalogItem {
    /// Creates an item with required fields only.
    pub fn new(slug: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            summary: None,
            description: None,
            version: None,
            size_in_bytes: None,
            platforms: Vec::new(),
            categories: Vec::new(),
            item_type: default_item_type(),
            website_url: None,
            download_url: None,
            is_featured: false,
            release_date: None,
            created_at: None,
            updated_at: None,
            developer: None,
            stats: None,
            media: None,
            requirements: None,
            changelog: None,
            extra: Map::new(),
        }
    }
}

impl Record for CatalogItem {
    const ENTITY: &'static str = "software";

    fn key(&self) -> &str {
        &self.slug
    }

    fn recency(&self) -> Option<DateTime<Utc>> {
        first_timestamp(&[
            self.updated_at.as_deref(),
            self.created_at.as_deref(),
            self.release_date.as_deref(),
        ])
    }
}

/// Curated grouping of catalog items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Member item slugs in display order.
    #[serde(default)]
    pub item_slugs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record for Collection {
    const ENTITY: &'static str = "collections";

    fn key(&self) -> &str {
        &self.slug
    }

    fn recency(&self) -> Option<DateTime<Utc>> {
        first_timestamp(&[self.updated_at.as_deref()])
    }
}

/// Lifecycle of a user-submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Done,
}

/// A user request for a new or updated catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    /// Natural key.
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record for UserRequest {
    const ENTITY: &'static str = "requests";

    fn key(&self) -> &str {
        &self.id
    }

    fn recency(&self) -> Option<DateTime<Utc>> {
        first_timestamp(&[self.updated_at.as_deref(), self.created_at.as_deref()])
    }
}
