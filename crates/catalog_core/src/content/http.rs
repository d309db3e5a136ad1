//! HTTP implementation of [`ContentApi`] over a GitHub-style contents API.
//!
//! # Responsibility
//! - Map get/put/delete onto `/repos/{owner}/{repo}/contents/{path}`.
//! - List directories through the git trees API, which is not capped at
//!   1,000 entries like the contents listing is.
//! - Attach auth and committer metadata to every request.
//! - Classify responses: 404 -> NotFound, sha mismatch -> Conflict.
//!
//! # Invariants
//! - The version token is the blob `sha` returned by the remote.
//! - Error bodies are reduced to a single-line excerpt before surfacing.
//! - A truncated tree is an error, never a partial listing.

use super::codec;
use super::{ContentApi, ContentEntry, ContentError, ContentFile, ContentResult};
use crate::config::StoreConfig;
use crate::logging::sanitize_message;
use crate::model::versioned::VersionToken;
use log::{debug, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const MAX_ERROR_BODY_CHARS: usize = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPT_JSON: &str = "application/vnd.github+json";

#[derive(Debug, Clone, Serialize)]
struct Committer {
    name: String,
    email: String,
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    #[serde(rename = "sha", skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    branch: &'a str,
    committer: &'a Committer,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    message: &'a str,
    #[serde(rename = "sha")]
    version: &'a str,
    branch: &'a str,
    committer: &'a Committer,
}

#[derive(Debug, Deserialize)]
struct FileBody {
    #[serde(alias = "version")]
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeBody {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BlobBody {
    content: String,
}

/// Blocking client for the hosted contents API.
pub struct HttpContentClient {
    http: Client,
    repo_base: String,
    branch: String,
    token: String,
    committer: Committer,
}

impl HttpContentClient {
    /// Builds a client for the repository named in `config`.
    pub fn new(config: &StoreConfig) -> ContentResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("catalog-core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            repo_base: repo_base_url(&config.api_base, &config.owner, &config.repo),
            branch: config.branch.clone(),
            token: config.token.clone(),
            committer: Committer {
                name: config.committer_name.clone(),
                email: config.committer_email.clone(),
            },
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!("{}/contents/{}", self.repo_base, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, ACCEPT_JSON)
            .header(USER_AGENT, concat!("catalog-core/", env!("CARGO_PKG_VERSION")))
    }

    fn send(&self, op: &str, path: &str, builder: RequestBuilder) -> ContentResult<Response> {
        let started_at = Instant::now();
        let response = match self.authorized(builder).send() {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    "event=content_{op} module=content status=error path={path} duration_ms={} error_code=transport",
                    started_at.elapsed().as_millis()
                );
                return Err(err.into());
            }
        };

        let status = response.status().as_u16();
        if response.status().is_success() {
            debug!(
                "event=content_{op} module=content status=ok path={path} http_status={status} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        let err = classify_failure(status, path, &body);
        if !err.is_not_found() {
            warn!(
                "event=content_{op} module=content status=error path={path} http_status={status} duration_ms={}",
                started_at.elapsed().as_millis()
            );
        }
        Err(err)
    }

    /// Fetches blobs larger than the inline contents limit through the git blobs API.
    fn fetch_blob(&self, path: &str, sha: &str) -> ContentResult<Vec<u8>> {
        let url = format!("{}/git/blobs/{sha}", self.repo_base);
        let response = self.send("blob_get", path, self.http.get(url))?;
        let blob: BlobBody = response.json()?;
        codec::decode(&blob.content)
    }
}

impl ContentApi for HttpContentClient {
    fn get(&self, path: &str) -> ContentResult<ContentFile> {
        let request = self
            .http
            .get(self.contents_url(path))
            .query(&[("ref", self.branch.as_str())]);
        let response = self.send("get", path, request)?;
        let text = response.text()?;
        let body: FileBody = serde_json::from_str(&text).map_err(|err| {
            ContentError::Encoding(format!("unexpected contents response for {path}: {err}"))
        })?;

        let bytes = match (body.encoding.as_deref(), body.content.as_deref()) {
            (Some("base64"), Some(content)) => codec::decode(content)?,
            // Inline content is omitted for large blobs.
            _ => self.fetch_blob(path, &body.sha)?,
        };

        Ok(ContentFile {
            path: path.to_string(),
            bytes,
            version: VersionToken::new(body.sha),
        })
    }

    fn put(
        &self,
        path: &str,
        content: &[u8],
        version: Option<&VersionToken>,
        message: &str,
    ) -> ContentResult<VersionToken> {
        let body = PutBody {
            message,
            content: codec::encode(content),
            version: version.map(VersionToken::as_str),
            branch: &self.branch,
            committer: &self.committer,
        };
        let response = self.send("put", path, self.http.put(self.contents_url(path)).json(&body))?;
        let parsed: PutResponse = response.json()?;
        Ok(VersionToken::new(parsed.content.sha))
    }

    fn delete(&self, path: &str, version: &VersionToken, message: &str) -> ContentResult<()> {
        let body = DeleteBody {
            message,
            version: version.as_str(),
            branch: &self.branch,
            committer: &self.committer,
        };
        self.send(
            "delete",
            path,
            self.http.delete(self.contents_url(path)).json(&body),
        )?;
        Ok(())
    }

    fn list(&self, dir: &str) -> ContentResult<Vec<ContentEntry>> {
        let dir = dir.trim_matches('/');
        let url = format!("{}/git/trees/{}:{dir}", self.repo_base, self.branch);
        let response = self.send("list", dir, self.http.get(url))?;
        let text = response.text()?;
        let body: TreeBody = serde_json::from_str(&text).map_err(|err| {
            ContentError::Encoding(format!("unexpected tree response for {dir}: {err}"))
        })?;
        tree_entries(dir, body)
    }
}

/// Turns a directory tree into entries keyed by full repository path.
fn tree_entries(dir: &str, body: TreeBody) -> ContentResult<Vec<ContentEntry>> {
    if body.truncated {
        warn!("event=content_list module=content status=error path={dir} error_code=truncated");
        return Err(ContentError::TruncatedListing {
            path: dir.to_string(),
        });
    }
    Ok(body
        .tree
        .into_iter()
        .filter(|entry| entry.kind == "blob")
        .map(|entry| ContentEntry {
            path: format!("{dir}/{}", entry.path),
            version: VersionToken::new(entry.sha),
        })
        .collect())
}

fn repo_base_url(api_base: &str, owner: &str, repo: &str) -> String {
    format!("{}/repos/{owner}/{repo}", api_base.trim_end_matches('/'))
}

/// Maps a non-2xx response onto the error taxonomy.
///
/// The hosted API answers a stale `sha` with 409, and a missing `sha` on an
/// existing path with 422 mentioning `sha`; both are optimistic-concurrency
/// conflicts.
fn classify_failure(status: u16, path: &str, body: &str) -> ContentError {
    match status {
        404 => ContentError::NotFound {
            path: path.to_string(),
        },
        409 => ContentError::Conflict {
            path: path.to_string(),
        },
        422 if body.contains("sha") => ContentError::Conflict {
            path: path.to_string(),
        },
        _ => ContentError::Remote {
            status,
            body: sanitize_message(body, MAX_ERROR_BODY_CHARS),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{
        classify_failure, repo_base_url, tree_entries, Committer, FileBody, PutBody, TreeBody,
    };
    use crate::content::ContentError;

    #[test]
    fn repo_base_url_trims_trailing_slash() {
        assert_eq!(
            repo_base_url("https://api.github.com/", "octo", "catalog"),
            "https://api.github.com/repos/octo/catalog"
        );
    }

    #[test]
    fn classify_failure_separates_not_found_and_conflicts() {
        assert!(matches!(
            classify_failure(404, "software/index.json", ""),
            ContentError::NotFound { ref path } if path == "software/index.json"
        ));
        assert!(classify_failure(409, "a", "is at 123 but expected 456").is_conflict());
        assert!(classify_failure(422, "a", r#"{"message":"\"sha\" wasn't supplied."}"#)
            .is_conflict());
        assert!(matches!(
            classify_failure(422, "a", "Invalid request"),
            ContentError::Remote { status: 422, .. }
        ));
    }

    #[test]
    fn classify_failure_caps_remote_body() {
        let body = format!("line one\n{}", "x".repeat(1000));
        match classify_failure(500, "a", &body) {
            ContentError::Remote { status, body } => {
                assert_eq!(status, 500);
                assert!(!body.contains('\n'));
                assert!(body.len() <= 303);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn put_body_omits_missing_version() {
        let committer = Committer {
            name: "bot".to_string(),
            email: "bot@example.com".to_string(),
        };
        let body = PutBody {
            message: "create",
            content: "W10=".to_string(),
            version: None,
            branch: "main",
            committer: &committer,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("sha").is_none());
        assert_eq!(json["committer"]["name"], "bot");

        let with_version = PutBody {
            version: Some("abc"),
            ..body
        };
        let json = serde_json::to_value(&with_version).unwrap();
        assert_eq!(json["sha"], "abc");
    }

    #[test]
    fn file_body_accepts_version_alias() {
        let body: FileBody =
            serde_json::from_str(r#"{"version":"v9","content":"W10=","encoding":"base64"}"#)
                .unwrap();
        assert_eq!(body.sha, "v9");
    }

    #[test]
    fn tree_entries_keep_blobs_under_full_paths() {
        let body: TreeBody = serde_json::from_str(
            r#"{
                "sha": "t1",
                "tree": [
                    {"path": "gimp.json", "mode": "100644", "type": "blob", "sha": "b1", "size": 10},
                    {"path": "nested", "mode": "040000", "type": "tree", "sha": "t2"},
                    {"path": "vlc.json", "mode": "100644", "type": "blob", "sha": "b2", "size": 12}
                ],
                "truncated": false
            }"#,
        )
        .unwrap();

        let entries = tree_entries("software/items", body).unwrap();
        let pairs = entries
            .iter()
            .map(|entry| (entry.path.as_str(), entry.version.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![("software/items/gimp.json", "b1"), ("software/items/vlc.json", "b2")]
        );
    }

    #[test]
    fn truncated_tree_is_an_error() {
        let body: TreeBody = serde_json::from_str(
            r#"{"sha": "t1", "tree": [{"path": "a.json", "type": "blob", "sha": "b1"}], "truncated": true}"#,
        )
        .unwrap();

        let err = tree_entries("software/items", body).unwrap_err();
        assert!(matches!(
            err,
            ContentError::TruncatedListing { ref path } if path == "software/items"
        ));
    }
}
