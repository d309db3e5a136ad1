//! Content-hosting API access.
//!
//! # Responsibility
//! - Define the get/put/delete/list contract over a versioned blob store.
//! - Classify remote failures into not-found, conflict and generic errors.
//!
//! # Invariants
//! - Payloads cross the wire base64-encoded; callers see raw bytes only.
//! - A `put` over an existing path must carry the version read last,
//!   otherwise the store rejects it as a conflict.
//! - 404 is always reported as `ContentError::NotFound`, never `Remote`.

use crate::model::versioned::VersionToken;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod codec;
pub mod http;
pub mod memory;

pub use http::HttpContentClient;
pub use memory::InMemoryContentStore;

pub type ContentResult<T> = Result<T, ContentError>;

/// Content API failure.
#[derive(Debug)]
pub enum ContentError {
    /// Remote path does not exist.
    NotFound { path: String },
    /// Supplied version token no longer matches the stored revision.
    Conflict { path: String },
    /// Any other non-2xx response. `body` is a capped excerpt.
    Remote { status: u16, body: String },
    /// Request never produced an HTTP response.
    Transport(reqwest::Error),
    /// Payload could not be encoded/decoded.
    Encoding(String),
    /// Directory listing was cut short by the remote.
    TruncatedListing { path: String },
}

impl Display for ContentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "content not found: {path}"),
            Self::Conflict { path } => {
                write!(f, "version conflict writing {path}; refetch and reapply")
            }
            Self::Remote { status, body } => write!(f, "content API returned {status}: {body}"),
            Self::Transport(err) => write!(f, "content API transport error: {err}"),
            Self::Encoding(message) => write!(f, "content encoding error: {message}"),
            Self::TruncatedListing { path } => {
                write!(f, "listing of {path} was truncated by the content API")
            }
        }
    }
}

impl Error for ContentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err),
            Self::NotFound { .. }
            | Self::Conflict { .. }
            | Self::Remote { .. }
            | Self::Encoding(_)
            | Self::TruncatedListing { .. } => None,
        }
    }
}

impl From<reqwest::Error> for ContentError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value)
    }
}

impl ContentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// One blob read from the content store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFile {
    pub path: String,
    /// Decoded payload bytes.
    pub bytes: Vec<u8>,
    pub version: VersionToken,
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub path: String,
    pub version: VersionToken,
}

/// Versioned blob store contract.
pub trait ContentApi: Send + Sync {
    /// Reads one blob with its current version.
    fn get(&self, path: &str) -> ContentResult<ContentFile>;

    /// Creates (`version = None`) or replaces a blob; returns the new version.
    fn put(
        &self,
        path: &str,
        content: &[u8],
        version: Option<&VersionToken>,
        message: &str,
    ) -> ContentResult<VersionToken>;

    /// Deletes one blob at the given revision.
    fn delete(&self, path: &str, version: &VersionToken, message: &str) -> ContentResult<()>;

    /// Lists direct children of `dir`. Missing directories are `NotFound`.
    fn list(&self, dir: &str) -> ContentResult<Vec<ContentEntry>>;
}

/// Returns the current version of `path`, or `None` when absent.
///
/// Used before overwriting derived artifacts whose previous revision the
/// caller never read.
pub fn current_version(api: &dyn ContentApi, path: &str) -> ContentResult<Option<VersionToken>> {
    match api.get(path) {
        Ok(file) => Ok(Some(file.version)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}
