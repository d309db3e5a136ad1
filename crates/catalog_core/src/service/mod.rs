//! Catalog use-case services.
//!
//! # Responsibility
//! - Orchestrate dataset, mirror and snapshot calls into workflows.
//! - Keep the CLI and other callers decoupled from storage details.

pub mod catalog_service;
pub mod readiness;
pub mod reader;
