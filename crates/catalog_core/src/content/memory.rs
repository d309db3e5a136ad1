//! Process-local [`ContentApi`] implementation.
//!
//! Honors the same optimistic-concurrency contract as the hosted API, so it
//! backs local development runs and the test suite. Read or write failures
//! can be injected per path prefix.

use super::{ContentApi, ContentEntry, ContentError, ContentFile, ContentResult};
use crate::model::versioned::VersionToken;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    version: VersionToken,
}

#[derive(Debug, Default)]
struct StoreState {
    blobs: BTreeMap<String, StoredBlob>,
    failing_reads: Vec<String>,
    failing_writes: Vec<String>,
    write_count: usize,
    commit_messages: Vec<String>,
}

/// In-memory versioned blob store.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    state: Mutex<StoreState>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes a blob directly, bypassing version checks. Returns its version.
    pub fn seed(&self, path: &str, bytes: impl Into<Vec<u8>>) -> VersionToken {
        let version = next_version();
        self.lock().blobs.insert(
            path.to_string(),
            StoredBlob {
                bytes: bytes.into(),
                version: version.clone(),
            },
        );
        version
    }

    /// Returns stored bytes without going through the API contract.
    pub fn raw(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().blobs.get(path).map(|blob| blob.bytes.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().blobs.contains_key(path)
    }

    /// Sorted paths of every stored blob.
    pub fn paths(&self) -> Vec<String> {
        self.lock().blobs.keys().cloned().collect()
    }

    /// Number of successful puts and deletes.
    pub fn write_count(&self) -> usize {
        self.lock().write_count
    }

    pub fn commit_messages(&self) -> Vec<String> {
        self.lock().commit_messages.clone()
    }

    /// Makes every get/list under `prefix` fail with a 503.
    pub fn fail_reads_under(&self, prefix: &str) {
        self.lock().failing_reads.push(prefix.to_string());
    }

    /// Makes every put/delete under `prefix` fail with a 503.
    pub fn fail_writes_under(&self, prefix: &str) {
        self.lock().failing_writes.push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failing_reads.clear();
        state.failing_writes.clear();
    }
}

impl ContentApi for InMemoryContentStore {
    fn get(&self, path: &str) -> ContentResult<ContentFile> {
        let state = self.lock();
        check_injected(&state.failing_reads, path)?;
        let blob = state.blobs.get(path).ok_or_else(|| ContentError::NotFound {
            path: path.to_string(),
        })?;
        Ok(ContentFile {
            path: path.to_string(),
            bytes: blob.bytes.clone(),
            version: blob.version.clone(),
        })
    }

    fn put(
        &self,
        path: &str,
        content: &[u8],
        version: Option<&VersionToken>,
        message: &str,
    ) -> ContentResult<VersionToken> {
        let mut state = self.lock();
        check_injected(&state.failing_writes, path)?;

        let current = state.blobs.get(path).map(|blob| &blob.version);
        if current != version {
            return Err(ContentError::Conflict {
                path: path.to_string(),
            });
        }

        let new_version = next_version();
        state.blobs.insert(
            path.to_string(),
            StoredBlob {
                bytes: content.to_vec(),
                version: new_version.clone(),
            },
        );
        state.write_count += 1;
        state.commit_messages.push(message.to_string());
        Ok(new_version)
    }

    fn delete(&self, path: &str, version: &VersionToken, message: &str) -> ContentResult<()> {
        let mut state = self.lock();
        check_injected(&state.failing_writes, path)?;

        match state.blobs.get(path) {
            None => {
                return Err(ContentError::NotFound {
                    path: path.to_string(),
                })
            }
            Some(blob) if &blob.version != version => {
                return Err(ContentError::Conflict {
                    path: path.to_string(),
                })
            }
            Some(_) => {}
        }

        state.blobs.remove(path);
        state.write_count += 1;
        state.commit_messages.push(message.to_string());
        Ok(())
    }

    fn list(&self, dir: &str) -> ContentResult<Vec<ContentEntry>> {
        let state = self.lock();
        check_injected(&state.failing_reads, dir)?;

        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let entries = state
            .blobs
            .iter()
            .filter(|(path, _)| {
                path.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|(path, blob)| ContentEntry {
                path: path.clone(),
                version: blob.version.clone(),
            })
            .collect::<Vec<_>>();

        if entries.is_empty() {
            return Err(ContentError::NotFound {
                path: dir.to_string(),
            });
        }
        Ok(entries)
    }
}

fn check_injected(prefixes: &[String], path: &str) -> ContentResult<()> {
    if prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
        return Err(ContentError::Remote {
            status: 503,
            body: format!("injected failure for {path}"),
        });
    }
    Ok(())
}

fn next_version() -> VersionToken {
    VersionToken::new(Uuid::new_v4().simple().to_string())
}
