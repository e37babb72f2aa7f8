//! tessera-stages - Built-in pipeline stages for tessera.
//!
//! Three stages bound by the contracts in `tessera_core::contract::catalog`:
//!
//! 1. [`ExtractionStage`] - detect and reconcile zones; one record per object
//! 2. [`BundlingStage`] - chunk text, resolve references, build the
//!    relationship graph
//! 3. [`LoadStage`] - write chunks to a [`RecordSink`] and report counts
//!
//! # Example
//!
//! ```ignore
//! use tessera_stages::build_pipeline;
//!
//! let stages = build_pipeline(&config, None)?;
//! let run = orchestrator.run(&document, &stages).await;
//! ```

mod bundling;
mod extraction;
mod graph;
mod load;
mod references;
mod sink;

use std::sync::Arc;

pub use bundling::{chunk_spans, BundlingStage, CharSpan};
pub use extraction::{equation_number, object_record, ExtractionStage};
pub use graph::{GraphEdge, GraphNode, RelationshipGraph};
pub use load::LoadStage;
pub use references::{find_mentions, Mention, ReferenceIndex, ReferenceKind};
pub use sink::{sink_from_config, JsonlSink, MemorySink, RecordSink, SinkReport, SqliteSink};

use tessera_core::contract::catalog;
use tessera_core::{CoreResult, Stage, TesseraConfig, TesseraError};
use tessera_detectors::DetectionCoordinator;

/// Stage names in pipeline order.
pub const STAGE_ORDER: [&str; 3] = [catalog::EXTRACTION, catalog::BUNDLING, catalog::LOAD];

/// Build the standard pipeline from configuration, optionally stopping after
/// the named stage.
pub fn build_pipeline(config: &TesseraConfig, until: Option<&str>) -> CoreResult<Vec<Arc<dyn Stage>>> {
    let last = match until {
        None => STAGE_ORDER.len() - 1,
        Some(name) => STAGE_ORDER.iter().position(|s| *s == name).ok_or_else(|| {
            TesseraError::configuration(format!(
                "unknown stage '{}'; expected one of {}",
                name,
                STAGE_ORDER.join(", ")
            ))
        })?,
    };

    let mut stages: Vec<Arc<dyn Stage>> = Vec::with_capacity(last + 1);
    for name in &STAGE_ORDER[..=last] {
        let stage: Arc<dyn Stage> = match *name {
            catalog::EXTRACTION => {
                let coordinator = DetectionCoordinator::from_config(&config.detection)
                    .map_err(|e| TesseraError::configuration(format!("detector setup failed: {}", e)))?;
                Arc::new(ExtractionStage::new(coordinator))
            }
            catalog::BUNDLING => Arc::new(BundlingStage::new()),
            _ => Arc::new(LoadStage::new(sink_from_config(&config.storage)?)),
        };
        stages.push(stage);
    }
    Ok(stages)
}
