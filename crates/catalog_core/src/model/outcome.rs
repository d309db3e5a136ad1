//! Typed outcomes for best-effort and multi-step operations.
//!
//! # Responsibility
//! - Carry non-fatal degradations next to a successful value.
//! - Report multi-step workflows step by step so partial success is legible.

use serde::Serialize;

/// A successful value plus warnings about degraded sub-steps.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

impl<T> Outcome<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(value: T, warnings: Vec<String>) -> Self {
        Self { value, warnings }
    }

    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Result of one named sub-step in a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepResult {
    pub fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            detail: None,
        }
    }

    pub fn ok_with(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

/// Ordered step results of a higher-level workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowReport {
    pub steps: Vec<StepResult>,
}

impl WorkflowReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: StepResult) {
        self.steps.push(step);
    }

    /// True when every recorded step succeeded.
    pub fn all_ok(&self) -> bool {
        self.steps.iter().all(|step| step.ok)
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|step| step.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::{Outcome, StepResult, WorkflowReport};

    #[test]
    fn outcome_tracks_degradation() {
        assert!(!Outcome::clean(5).is_degraded());
        let outcome = Outcome::with_warnings(5, vec!["mirror unavailable".to_string()]);
        assert!(outcome.is_degraded());
        assert_eq!(outcome.warnings, vec!["mirror unavailable".to_string()]);
    }

    #[test]
    fn report_is_ok_only_when_every_step_is_ok() {
        let mut report = WorkflowReport::new();
        report.push(StepResult::ok("canonical_write"));
        assert!(report.all_ok());
        report.push(StepResult::failed("mirror_upsert", "db locked"));
        assert!(!report.all_ok());
        assert_eq!(
            report.step("mirror_upsert").and_then(|s| s.detail.as_deref()),
            Some("db locked")
        );
    }
}
