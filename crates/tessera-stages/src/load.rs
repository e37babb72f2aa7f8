//! Stage 3: hand bundled records to a sink and report the counts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use tessera_core::contract::catalog;
use tessera_core::{
    Payload, Record, Stage, StageContext, StageContract, StageError, StageInput, StageOutput,
    StageReport, TesseraError,
};

use crate::sink::RecordSink;

/// Writes the previous stage's records to a [`RecordSink`].
pub struct LoadStage {
    sink: Arc<dyn RecordSink>,
    contract: StageContract,
}

impl LoadStage {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self {
            sink,
            contract: catalog::load(),
        }
    }
}

#[async_trait]
impl Stage for LoadStage {
    fn name(&self) -> &str {
        catalog::LOAD
    }

    fn output_contract(&self) -> &StageContract {
        &self.contract
    }

    async fn run(&self, input: StageInput<'_>, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let previous = input.require_previous(catalog::LOAD)?;
        let document_id = input.document.id.as_str();

        // Storage and IO errors may clear up on retry; anything else will not.
        let written = self.sink.write(document_id, previous).await.map_err(|e| match e {
            TesseraError::Storage { .. } | TesseraError::Io(_) => StageError::transient(e.to_string()),
            other => StageError::fatal(other.to_string()),
        })?;

        let mut report = StageReport::default();
        report.add("loaded", written.loaded);
        report.add("failed", written.failed);
        for error in &written.errors {
            warn!(run_id = ctx.run_id, document = %document_id, sink = self.sink.name(), "{}", error);
            report.warn(error.clone());
        }
        info!(
            run_id = ctx.run_id,
            document = %document_id,
            sink = self.sink.name(),
            loaded = written.loaded,
            failed = written.failed,
            "load finished"
        );

        let mut summary = Record::new();
        summary.insert("document_id".into(), json!(document_id));
        summary.insert("sink".into(), json!(self.sink.name()));
        summary.insert("loaded".into(), json!(written.loaded));
        summary.insert("failed".into(), json!(written.failed));
        Ok(StageOutput::new(Payload::new(vec![summary])).with_report(report))
    }
}
