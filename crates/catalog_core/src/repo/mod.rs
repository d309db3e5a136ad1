//! Canonical dataset persistence.
//!
//! # Responsibility
//! - Treat one JSON array blob (or one blob per record) as "the dataset".
//! - Thread version tokens through every read-modify-write cycle.
//!
//! # Invariants
//! - Every write carries the version token of the dataset it modifies.
//! - Successful writes invalidate the process-local dataset cache.
//! - Conflicts surface to the caller; nothing here retries.

pub mod dataset_repo;
pub mod paths;
