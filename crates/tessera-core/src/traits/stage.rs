//! Pipeline stage trait and the values passed across a stage boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::TesseraConfig;
use crate::contract::StageContract;
use crate::types::{DocumentInput, Payload};

/// Failure raised inside a stage function.
///
/// The stage decides which kind applies; the orchestrator never guesses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// May succeed if retried with the same input.
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying cannot help.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Fatal(m) => m,
        }
    }
}

/// What a stage receives.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    /// The document being processed.
    pub document: &'a DocumentInput,
    /// Contract-validated output of the previous stage (`None` for the first).
    pub previous: Option<&'a Payload>,
}

impl<'a> StageInput<'a> {
    /// The previous stage's output, or a fatal error for a stage that
    /// cannot run first.
    pub fn require_previous(&self, stage: &str) -> Result<&'a Payload, StageError> {
        self.previous.ok_or_else(|| {
            StageError::fatal(format!("stage '{}' requires the output of a previous stage", stage))
        })
    }
}

/// Per-invocation context.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: u64,
    /// 1-based attempt number for this stage.
    pub attempt: u32,
    pub config: Arc<TesseraConfig>,
}

/// Status details returned alongside a stage's payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    /// Non-fatal issues that need operator attention.
    pub warnings: Vec<String>,
    /// Named counts (e.g. `loaded`, `failed`, `pages_needing_review`).
    pub counters: BTreeMap<String, u64>,
}

impl StageReport {
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn add(&mut self, counter: &str, by: u64) {
        *self.counters.entry(counter.to_string()).or_insert(0) += by;
    }

    pub fn counter(&self, counter: &str) -> u64 {
        self.counters.get(counter).copied().unwrap_or(0)
    }
}

/// A stage's successful result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    pub payload: Payload,
    pub report: StageReport,
}

impl StageOutput {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            report: StageReport::default(),
        }
    }

    pub fn with_report(mut self, report: StageReport) -> Self {
        self.report = report;
        self
    }
}

/// Core Stage trait - every pipeline stage implements this.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name used in run reports and logs.
    fn name(&self) -> &str;

    /// Contract the stage's output must satisfy before the next stage runs.
    fn output_contract(&self) -> &StageContract;

    /// Per-call timeout; `None` uses the orchestrator default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the stage on validated input.
    async fn run(&self, input: StageInput<'_>, ctx: &StageContext) -> Result<StageOutput, StageError>;
}
