//! The record of one document's trip through the pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::contract::Violation;
use crate::error::TesseraError;
use crate::types::Payload;

/// Lifecycle status of a pipeline run.
///
/// `Pending -> Running -> Complete | Failed`. A run never stays `Running`
/// once [`Orchestrator::run`](super::Orchestrator::run) has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl RunStatus {
    /// Whether the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    /// A stage's output did not satisfy its contract.
    ContractViolation { stage: String, violation: Violation },
    /// A stage raised a fatal error.
    StageFatal { stage: String, detail: String },
    /// A stage kept failing transiently until the retry budget ran out.
    RetriesExhausted {
        stage: String,
        attempts: u32,
        detail: String,
    },
}

impl RunFailure {
    /// Name of the stage that failed.
    pub fn stage(&self) -> &str {
        match self {
            Self::ContractViolation { stage, .. }
            | Self::StageFatal { stage, .. }
            | Self::RetriesExhausted { stage, .. } => stage,
        }
    }

    /// The contract violation, when that is why the run failed.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Self::ContractViolation { violation, .. } => Some(violation),
            _ => None,
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContractViolation { stage, violation } => {
                write!(f, "stage '{}' violated its contract: {}", stage, violation)
            }
            Self::StageFatal { stage, detail } => {
                write!(f, "stage '{}' failed: {}", stage, detail)
            }
            Self::RetriesExhausted {
                stage,
                attempts,
                detail,
            } => write!(
                f,
                "stage '{}' failed after {} attempts: {}",
                stage, attempts, detail
            ),
        }
    }
}

impl From<RunFailure> for TesseraError {
    fn from(failure: RunFailure) -> Self {
        match failure {
            RunFailure::ContractViolation { stage, violation } => {
                TesseraError::ContractViolation { stage, violation }
            }
            RunFailure::StageFatal { stage, detail } => TesseraError::StageFatal {
                stage,
                message: detail,
            },
            RunFailure::RetriesExhausted { stage, detail, .. } => TesseraError::StageFatal {
                stage,
                message: detail,
            },
        }
    }
}

/// Summary of one completed stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub stage: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    pub records: usize,
    pub elapsed_ms: u64,
    pub warnings: Vec<String>,
    pub counters: BTreeMap<String, u64>,
}

/// One document's pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: u64,
    pub document_id: String,
    pub status: RunStatus,
    /// Stage being executed, or the stage that failed.
    pub current_stage: Option<String>,
    /// Stages that completed and passed their contract, in order.
    pub stages: Vec<StageSummary>,
    /// Validated output of the last completed stage.
    #[serde(skip)]
    pub output: Option<Payload>,
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub(crate) fn new(run_id: u64, document_id: impl Into<String>) -> Self {
        Self {
            run_id,
            document_id: document_id.into(),
            status: RunStatus::Pending,
            current_stage: None,
            stages: Vec::new(),
            output: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn enter(&mut self, stage: &str) {
        self.status = RunStatus::Running;
        self.current_stage = Some(stage.to_string());
    }

    pub(crate) fn complete_stage(&mut self, summary: StageSummary, payload: Payload) {
        self.stages.push(summary);
        self.output = Some(payload);
    }

    pub(crate) fn fail(&mut self, failure: RunFailure) {
        self.current_stage = Some(failure.stage().to_string());
        self.status = RunStatus::Failed;
        self.failure = Some(failure);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn finish(&mut self) {
        self.status = RunStatus::Complete;
        self.current_stage = None;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    /// Names of the stages that completed.
    pub fn completed_stages(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.stage.as_str())
    }

    /// Summary of a completed stage.
    pub fn stage(&self, name: &str) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Every warning raised by completed stages, prefixed with the stage name.
    pub fn warnings(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|s| s.warnings.iter().map(move |w| format!("{}: {}", s.stage, w)))
            .collect()
    }

    /// Convert a failed run into its error.
    pub fn into_result(self) -> Result<Self, TesseraError> {
        match self.failure.clone() {
            Some(failure) => Err(failure.into()),
            None => Ok(self),
        }
    }
}
