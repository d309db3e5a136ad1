//! Store configuration resolution.
//!
//! # Responsibility
//! - Resolve content-store coordinates and credentials.
//! - Merge environment, persisted settings and defaults in that order.
//!
//! # Invariants
//! - Missing required fields fail fast with `ConfigError::Missing`, listing
//!   every missing field, before any network or DB work starts.
//! - The credential never appears in `Debug` output.

use crate::repo::dataset_repo::DatasetLayout;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_COMMITTER_NAME: &str = "catalog-bot";
const DEFAULT_COMMITTER_EMAIL: &str = "catalog-bot@users.noreply.github.com";

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration failure, distinct from runtime store errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Required fields absent from every source.
    Missing { fields: Vec<&'static str> },
    /// A present value could not be interpreted.
    InvalidValue { field: &'static str, value: String },
    /// Persisted settings file is unreadable or malformed.
    InvalidSettings { path: PathBuf, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing { fields } => {
                write!(f, "store is not configured; missing {}", fields.join(", "))
            }
            Self::InvalidValue { field, value } => {
                write!(f, "invalid value `{value}` for {field}")
            }
            Self::InvalidSettings { path, message } => {
                write!(f, "invalid settings file `{}`: {message}", path.display())
            }
        }
    }
}

impl Error for ConfigError {}

/// Persisted settings object, typically an admin-managed JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    pub github: ContentSettings,
    pub mirror: MirrorSettings,
    pub cache: CacheSettings,
    pub dataset: DatasetSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentSettings {
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub token: Option<String>,
    pub branch: Option<String>,
    pub api_base: Option<String>,
    pub data_root: Option<String>,
    pub committer_name: Option<String>,
    pub committer_email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MirrorSettings {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSettings {
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatasetSettings {
    /// `monolithic` | `per_record`.
    pub layout: Option<String>,
    pub maintain_index: Option<bool>,
}

/// Fully resolved store configuration.
#[derive(Clone)]
pub struct StoreConfig {
    pub owner: String,
    pub repo: String,
    pub token: String,
    pub branch: String,
    pub api_base: String,
    /// Optional path prefix for every dataset, e.g. `public/data`.
    pub data_root: Option<String>,
    pub committer_name: String,
    pub committer_email: String,
    pub mirror_path: Option<PathBuf>,
    pub cache_ttl: Duration,
    pub layout: DatasetLayout,
}

impl Debug for StoreConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &"<redacted>")
            .field("branch", &self.branch)
            .field("api_base", &self.api_base)
            .field("data_root", &self.data_root)
            .field("mirror_path", &self.mirror_path)
            .field("cache_ttl", &self.cache_ttl)
            .field("layout", &self.layout)
            .finish()
    }
}

/// Loads persisted settings; returns `None` when the file does not exist.
pub fn load_settings(path: impl AsRef<Path>) -> ConfigResult<Option<PersistedSettings>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::InvalidSettings {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    let settings =
        serde_json::from_str(&raw).map_err(|err| ConfigError::InvalidSettings {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    Ok(Some(settings))
}

/// Resolves configuration from process environment, then `settings`.
pub fn resolve(settings: Option<&PersistedSettings>) -> ConfigResult<StoreConfig> {
    resolve_with(|key| std::env::var(key).ok(), settings)
}

/// Resolves configuration using an injected environment lookup.
pub fn resolve_with<F>(env: F, settings: Option<&PersistedSettings>) -> ConfigResult<StoreConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = PersistedSettings::default();
    let settings = settings.unwrap_or(&defaults);
    let lookup = |keys: &[&str], fallback: &Option<String>| -> Option<String> {
        keys.iter()
            .find_map(|key| non_empty(env(key)))
            .or_else(|| non_empty(fallback.clone()))
    };

    let owner = lookup(
        &["CATALOG_CONTENT_OWNER", "GITHUB_OWNER"],
        &settings.github.owner,
    );
    let repo = lookup(&["CATALOG_CONTENT_REPO", "GITHUB_REPO"], &settings.github.repo);
    let token = lookup(
        &["CATALOG_CONTENT_TOKEN", "GITHUB_TOKEN"],
        &settings.github.token,
    );

    let mut missing = Vec::new();
    if owner.is_none() {
        missing.push("owner");
    }
    if repo.is_none() {
        missing.push("repo");
    }
    if token.is_none() {
        missing.push("token");
    }
    let (Some(owner), Some(repo), Some(token)) = (owner, repo, token) else {
        return Err(ConfigError::Missing { fields: missing });
    };

    let cache_ttl = match lookup(&["CATALOG_CACHE_TTL_SECS"], &None) {
        Some(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue {
                field: "cache_ttl_secs",
                value: raw.clone(),
            }
        })?),
        None => settings
            .cache
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CACHE_TTL),
    };

    let layout_name = lookup(&["CATALOG_DATASET_LAYOUT"], &settings.dataset.layout);
    let maintain_index = match non_empty(env("CATALOG_DATASET_MAINTAIN_INDEX")) {
        Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidValue {
            field: "dataset_maintain_index",
            value: raw,
        })?,
        None => settings.dataset.maintain_index.unwrap_or(true),
    };
    let layout = parse_layout(layout_name.as_deref(), maintain_index)?;

    let mirror_path = non_empty(env("CATALOG_MIRROR_PATH"))
        .map(PathBuf::from)
        .or_else(|| settings.mirror.path.clone());

    Ok(StoreConfig {
        owner,
        repo,
        token,
        branch: lookup(
            &["CATALOG_CONTENT_BRANCH", "GITHUB_BRANCH"],
            &settings.github.branch,
        )
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        api_base: lookup(&["CATALOG_API_BASE"], &settings.github.api_base)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        data_root: lookup(&["CATALOG_DATA_ROOT"], &settings.github.data_root)
            .map(|root| root.trim_matches('/').to_string()),
        committer_name: lookup(&["CATALOG_COMMITTER_NAME"], &settings.github.committer_name)
            .unwrap_or_else(|| DEFAULT_COMMITTER_NAME.to_string()),
        committer_email: lookup(
            &["CATALOG_COMMITTER_EMAIL"],
            &settings.github.committer_email,
        )
        .unwrap_or_else(|| DEFAULT_COMMITTER_EMAIL.to_string()),
        mirror_path,
        cache_ttl,
        layout,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_layout(name: Option<&str>, maintain_index: bool) -> ConfigResult<DatasetLayout> {
    match name.map(str::to_ascii_lowercase).as_deref() {
        None | Some("monolithic") => Ok(DatasetLayout::Monolithic),
        Some("per_record") | Some("per-record") => Ok(DatasetLayout::PerRecord { maintain_index }),
        Some(other) => Err(ConfigError::InvalidValue {
            field: "dataset_layout",
            value: other.to_string(),
        }),
    }
}
