//! Catalog domain model.
//!
//! # Responsibility
//! - Define the record shapes persisted as canonical datasets.
//! - Define the version-carrying wrapper used by every write path.
//! - Define typed outcomes for degraded-but-successful operations.
//!
//! # Invariants
//! - Every record exposes one stable natural key.
//! - Natural keys are unique within one dataset.

pub mod outcome;
pub mod record;
pub mod versioned;
