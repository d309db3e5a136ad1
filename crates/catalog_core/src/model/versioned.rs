//! Optimistic-concurrency version tokens.
//!
//! # Responsibility
//! - Carry the exact stored revision a value was read at.
//! - Make "which revision am I writing over" a type-checked parameter.
//!
//! # Invariants
//! - Tokens are opaque; only equality is meaningful.
//! - A `Versioned<T>` returned by a write carries the revision that write
//!   produced, so it can feed the next write directly.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Opaque identifier of one stored blob revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for VersionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value paired with the revision it was read at (or written as).
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: VersionToken,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: VersionToken) -> Self {
        Self { value, version }
    }

    /// Transforms the value while keeping the revision it belongs to.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }
}
