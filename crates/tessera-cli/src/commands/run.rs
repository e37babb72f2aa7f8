use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use tessera_core::{DocumentInput, Orchestrator, PipelineRun};
use tessera_stages::build_pipeline;

use super::load_config;

/// Run every document through the pipeline. Returns `true` when all runs
/// complete.
pub async fn run(
    config: Option<PathBuf>,
    documents: Vec<PathBuf>,
    until: Option<&str>,
    output: Option<PathBuf>,
) -> Result<bool> {
    let config = Arc::new(load_config(config)?);
    let stages = build_pipeline(&config, until)?;

    let mut inputs = Vec::with_capacity(documents.len());
    for path in &documents {
        let document = DocumentInput::from_file(path)
            .with_context(|| format!("failed to read document {}", path.display()))?;
        inputs.push(Arc::new(document));
    }

    let orchestrator = Orchestrator::new(config);
    let runs = orchestrator.run_batch(&inputs, &stages).await;

    for run in &runs {
        println!("{}", serde_json::to_string(&summary(run))?);
    }
    if let Some(path) = output {
        let written = write_outputs(&path, &runs)?;
        info!(path = %path.display(), records = written, "wrote stage output");
    }

    let failed = runs.iter().filter(|r| !r.is_complete()).count();
    info!(documents = runs.len(), failed, "batch finished");
    Ok(failed == 0)
}

fn summary(run: &PipelineRun) -> serde_json::Value {
    json!({
        "run_id": run.run_id,
        "document_id": run.document_id,
        "status": run.status,
        "stages": run.stages,
        "failure": run.failure,
    })
}

/// Append the final output records of every completed run as JSON lines.
fn write_outputs(path: &Path, runs: &[PipelineRun]) -> Result<usize> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0;
    for run in runs {
        let Some(output) = run.output.as_ref().filter(|_| run.is_complete()) else {
            continue;
        };
        for record in &output.records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
            written += 1;
        }
    }
    writer.flush()?;
    Ok(written)
}
