//! Relational mirror of the canonical catalog dataset.
//!
//! # Responsibility
//! - Project catalog items into queryable rows keyed by natural key.
//! - Reconcile the mirror against the canonical dataset in bounded batches.
//!
//! # Invariants
//! - Mirror rows change only through reconciliation or explicit
//!   best-effort single-record calls; they may lag canonical writes.
//! - The canonical dataset is never written from here.

pub mod mirror_repo;
pub mod reconciler;
