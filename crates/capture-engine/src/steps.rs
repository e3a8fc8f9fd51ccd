//! Ordered setup/teardown steps with best-effort aggregation.
//!
//! Remote-controlled recorders are prepared through a series of small,
//! idempotent requests. Some are essential (without the right scene nothing
//! useful gets recorded); others only polish the result. A [`StepReport`]
//! records every outcome in order and decides whether the whole sequence
//! counts as prepared.

use goexport_common::error::{ExportError, ExportResult};

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub required: bool,
    pub error: Option<String>,
}

impl StepRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a setup or teardown sequence did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepReport {
    steps: Vec<StepRecord>,
}

impl StepReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step that must succeed.
    pub fn required<T>(&mut self, name: &str, result: ExportResult<T>) -> Option<T> {
        self.record(name, true, result)
    }

    /// Record a step whose failure is logged and tolerated.
    pub fn best_effort<T>(&mut self, name: &str, result: ExportResult<T>) -> Option<T> {
        self.record(name, false, result)
    }

    fn record<T>(&mut self, name: &str, required: bool, result: ExportResult<T>) -> Option<T> {
        match result {
            Ok(value) => {
                tracing::debug!(step = name, "Step done");
                self.steps.push(StepRecord {
                    name: name.to_string(),
                    required,
                    error: None,
                });
                Some(value)
            }
            Err(e) => {
                if required {
                    tracing::error!(step = name, error = %e, "Required step failed");
                } else {
                    tracing::warn!(step = name, error = %e, "Step failed, continuing");
                }
                self.steps.push(StepRecord {
                    name: name.to_string(),
                    required,
                    error: Some(e.to_string()),
                });
                None
            }
        }
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    /// No required step failed.
    pub fn prepared(&self) -> bool {
        self.steps.iter().all(|s| !s.required || s.succeeded())
    }

    /// Best-effort steps that failed.
    pub fn warnings(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| !s.required && !s.succeeded())
    }

    /// `Ok` when prepared, otherwise an error built from the failed
    /// required steps.
    pub fn into_result(self, make_error: fn(String) -> ExportError) -> ExportResult<Self> {
        if self.prepared() {
            return Ok(self);
        }
        let failed: Vec<String> = self
            .steps
            .iter()
            .filter(|s| s.required && !s.succeeded())
            .map(|s| format!("{}: {}", s.name, s.error.as_deref().unwrap_or_default()))
            .collect();
        Err(make_error(failed.join("; ")))
    }
}
