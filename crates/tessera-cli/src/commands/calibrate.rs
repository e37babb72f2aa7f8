use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use tessera_core::{DocumentInput, ReconciliationEngine};
use tessera_detectors::DetectionCoordinator;

use super::load_config;

/// Detect zones on every page of a document and print the observed
/// label-to-content distances.
pub async fn run(config: Option<PathBuf>, document: &Path) -> Result<bool> {
    let config = load_config(config)?;
    let document = DocumentInput::from_file(document)
        .with_context(|| format!("failed to read document {}", document.display()))?;
    let coordinator =
        DetectionCoordinator::from_config(&config.detection).context("detector setup failed")?;

    let mut zones = Vec::new();
    for page in coordinator.detect_document(&document).await {
        for failure in &page.failures {
            warn!("{}", failure);
        }
        zones.extend(page.zones);
    }

    let engine = ReconciliationEngine::new(config.reconcile.clone());
    let calibration = engine.calibrate(&zones);
    println!("{}", serde_json::to_string_pretty(&calibration)?);

    if calibration.beyond_current_threshold > 0 {
        warn!(
            pairs = calibration.beyond_current_threshold,
            threshold = config.reconcile.pair_distance,
            "observed pairs exceed the current pairing threshold"
        );
    }
    Ok(true)
}
