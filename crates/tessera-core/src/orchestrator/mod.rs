//! Pipeline orchestration.
//!
//! Runs an ordered list of stages for one document. Each stage's output is
//! validated against its contract before the next stage sees it; the first
//! violation ends the run. Transient stage errors (including timeouts) are
//! retried with exponential backoff, fatal ones abort immediately.
//!
//! Documents share nothing but the configuration and the run-id counter, so
//! [`Orchestrator::run_batch`] can drive several at once.

mod run;

pub use run::{PipelineRun, RunFailure, RunStatus, StageSummary};

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use backon::{ExponentialBuilder, Retryable};
use futures::{stream, StreamExt};
use tracing::{error, info, warn};

use crate::config::TesseraConfig;
use crate::contract::{validate_payload, ValidationResult};
use crate::traits::{Stage, StageContext, StageError, StageInput, StageOutput};
use crate::types::DocumentInput;

/// Sequences stages for documents.
pub struct Orchestrator {
    config: Arc<TesseraConfig>,
    next_run_id: AtomicU64,
}

impl Orchestrator {
    pub fn new(config: Arc<TesseraConfig>) -> Self {
        Self {
            config,
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    fn allocate_run_id(&self) -> u64 {
        self.next_run_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Run every stage in order for one document.
    ///
    /// The returned run is always terminal: `Complete` when every stage
    /// succeeded and passed its contract, `Failed` otherwise.
    pub async fn run(&self, document: &DocumentInput, stages: &[Arc<dyn Stage>]) -> PipelineRun {
        let mut run = PipelineRun::new(self.allocate_run_id(), document.id.clone());
        info!(
            run_id = run.run_id,
            document = %document.id,
            stages = stages.len(),
            "pipeline run started"
        );

        for stage in stages {
            let name = stage.name().to_string();
            run.enter(&name);

            let input = StageInput {
                document,
                previous: run.output.as_ref(),
            };
            let started = Instant::now();
            let (output, attempts) = match self.invoke(stage.as_ref(), input, run.run_id).await {
                Ok(done) => done,
                Err(failure) => {
                    error!(run_id = run.run_id, document = %document.id, %failure, "pipeline run failed");
                    run.fail(failure);
                    return run;
                }
            };

            if let ValidationResult::Failed(violation) =
                validate_payload(&output.payload, stage.output_contract())
            {
                error!(
                    run_id = run.run_id,
                    document = %document.id,
                    stage = %name,
                    record_index = ?violation.record_index,
                    field = %violation.field,
                    reason = %violation.reason,
                    "stage output violated its contract"
                );
                run.fail(RunFailure::ContractViolation {
                    stage: name,
                    violation,
                });
                return run;
            }

            for warning in &output.report.warnings {
                warn!(run_id = run.run_id, stage = %name, "{}", warning);
            }
            info!(
                run_id = run.run_id,
                stage = %name,
                records = output.payload.len(),
                attempts,
                "stage complete"
            );

            let StageOutput { payload, report } = output;
            run.complete_stage(
                StageSummary {
                    stage: name,
                    attempts,
                    records: payload.len(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    warnings: report.warnings,
                    counters: report.counters,
                },
                payload,
            );
        }

        run.finish();
        info!(run_id = run.run_id, document = %document.id, "pipeline run complete");
        run
    }

    /// Run several documents through the same stages, at most
    /// `max_concurrent_documents` at a time. Results follow input order.
    pub async fn run_batch(
        &self,
        documents: &[Arc<DocumentInput>],
        stages: &[Arc<dyn Stage>],
    ) -> Vec<PipelineRun> {
        let limit = self.config.orchestrator.max_concurrent_documents.max(1);
        stream::iter(documents)
            .map(|document| self.run(document, stages))
            .buffered(limit)
            .collect()
            .await
    }

    /// Call a stage with its timeout, retrying transient failures.
    async fn invoke(
        &self,
        stage: &dyn Stage,
        input: StageInput<'_>,
        run_id: u64,
    ) -> Result<(StageOutput, u32), RunFailure> {
        let timeout = stage
            .timeout()
            .unwrap_or_else(|| self.config.orchestrator.stage_timeout());
        let attempts = AtomicU32::new(0);

        let call_once = || async {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let ctx = StageContext {
                run_id,
                attempt,
                config: Arc::clone(&self.config),
            };
            match tokio::time::timeout(timeout, stage.run(input, &ctx)).await {
                Ok(result) => result,
                Err(_) => Err(StageError::transient(format!(
                    "stage call timed out after {:?}",
                    timeout
                ))),
            }
        };

        let policy = &self.config.orchestrator.retry;
        let result = call_once
            .retry(
                ExponentialBuilder::default()
                    .with_max_times(policy.max_retries as usize)
                    .with_min_delay(std::time::Duration::from_millis(policy.initial_delay_ms))
                    .with_max_delay(std::time::Duration::from_millis(policy.max_delay_ms))
                    .with_factor(policy.multiplier),
            )
            .when(StageError::is_transient)
            .notify(|err, dur| {
                warn!(
                    run_id,
                    stage = stage.name(),
                    "stage attempt failed, retrying in {:?}: {}",
                    dur,
                    err
                );
            })
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(output) => Ok((output, attempts)),
            Err(StageError::Fatal(detail)) => Err(RunFailure::StageFatal {
                stage: stage.name().to_string(),
                detail,
            }),
            Err(StageError::Transient(detail)) => Err(RunFailure::RetriesExhausted {
                stage: stage.name().to_string(),
                attempts,
                detail,
            }),
        }
    }
}
