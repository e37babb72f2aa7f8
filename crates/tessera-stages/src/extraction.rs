//! Stage 1: detect, reconcile and emit one record per object.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use tessera_core::contract::catalog;
use tessera_core::{
    keys, DocumentInput, LabelTextSource, Payload, Record, ReconciliationEngine, Stage,
    StageContext, StageContract, StageError, StageInput, StageOutput, StageReport, Zone, ZoneKind,
};
use tessera_detectors::DetectionCoordinator;

/// Runs the detector adapters on every page and reconciles their output.
pub struct ExtractionStage {
    coordinator: DetectionCoordinator,
    contract: StageContract,
}

impl ExtractionStage {
    pub fn new(coordinator: DetectionCoordinator) -> Self {
        Self {
            coordinator,
            contract: catalog::extraction(),
        }
    }

    pub fn coordinator(&self) -> &DetectionCoordinator {
        &self.coordinator
    }
}

/// Equation number from a label's text: `(4)` -> `4`, `[2.1a]` -> `2.1a`.
pub fn equation_number(label_text: &str) -> Option<String> {
    let number = label_text
        .trim()
        .trim_start_matches(['(', '['])
        .trim_end_matches([')', ']', '.'])
        .trim();
    (!number.is_empty()).then(|| number.to_string())
}

fn record_type(kind: &ZoneKind) -> &'static str {
    match kind {
        ZoneKind::Equation => "equation",
        ZoneKind::Table => "table",
        ZoneKind::Figure => "figure",
        ZoneKind::Text => "text",
        ZoneKind::Label => "label",
        ZoneKind::Other(_) => "other",
    }
}

/// Build the extraction record for a reconciled zone.
pub fn object_record(document: &DocumentInput, zone: &Zone) -> Record {
    let kind = zone.kind();
    let meta = zone.metadata();
    let content = meta
        .get_str(keys::TEXT)
        .map(String::from)
        .or_else(|| document.text_in(zone.page(), zone.bbox()))
        .unwrap_or_default();
    let number = match kind {
        ZoneKind::Equation => meta.get_str(keys::LABEL_TEXT).and_then(equation_number),
        _ => None,
    };
    // A merged label counts as a number even when its text did not parse.
    let has_number = number.is_some()
        || (kind == ZoneKind::Equation && meta.get_bool(keys::HAS_LABEL) == Some(true));

    let mut record = Record::new();
    record.insert("id".into(), json!(zone.id()));
    record.insert("document_id".into(), json!(document.id));
    record.insert("type".into(), json!(record_type(&kind)));
    record.insert("page".into(), json!(zone.page()));
    record.insert("bbox".into(), json!(zone.bbox()));
    record.insert("content".into(), json!(content));
    record.insert("confidence".into(), json!(zone.confidence()));
    record.insert("source_adapters".into(), json!(zone.source_adapters()));
    record.insert("has_number".into(), json!(has_number));
    record.insert("equation_number".into(), number.map(Value::from).unwrap_or(Value::Null));
    record.insert(
        "standalone_label".into(),
        json!(meta.get_bool(keys::STANDALONE_LABEL).unwrap_or(false)),
    );
    record.insert("class_label".into(), json!(zone.class_label()));
    for key in [keys::LABEL_TEXT, keys::LABEL_ZONE_ID, keys::DUPLICATE_IDS, keys::ABSORBED_IDS] {
        if let Some(value) = meta.get(key) {
            record.insert(key.into(), value.clone());
        }
    }
    record
}

/// Reading order: page, then top edge, then left edge, then id.
fn reading_order(a: &Zone, b: &Zone) -> std::cmp::Ordering {
    a.page()
        .cmp(&b.page())
        .then(a.bbox().y0.total_cmp(&b.bbox().y0))
        .then(a.bbox().x0.total_cmp(&b.bbox().x0))
        .then_with(|| a.id().cmp(b.id()))
}

#[async_trait]
impl Stage for ExtractionStage {
    fn name(&self) -> &str {
        catalog::EXTRACTION
    }

    fn output_contract(&self) -> &StageContract {
        &self.contract
    }

    async fn run(&self, input: StageInput<'_>, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let document = input.document;
        let engine = ReconciliationEngine::new(ctx.config.reconcile.clone());
        let mut report = StageReport::default();
        let mut zones: Vec<Zone> = Vec::new();

        for detections in self.coordinator.detect_document(document).await {
            report.add("pages", 1);
            report.add("raw_zones", detections.zones.len() as u64);
            for failure in &detections.failures {
                report.add("adapter_failures", 1);
                report.warn(failure.to_string());
            }
            if detections.needs_review {
                report.add("pages_needing_review", 1);
                report.warn(format!("page {}: every adapter failed; needs review", detections.page));
            }

            let reconciled = engine
                .reconcile(detections.zones, document)
                .map_err(|e| StageError::fatal(e.to_string()))?;
            for rejected in &reconciled.rejected {
                report.warn(format!("dropped zone: {}", rejected));
            }
            report.add("zones_rejected", reconciled.rejected.len() as u64);
            report.add("merged_pairs", reconciled.merged.len() as u64);
            report.add("duplicates_suppressed", reconciled.suppressed as u64);
            report.add("text_absorbed", reconciled.absorbed as u64);
            report.add("standalone_labels", reconciled.standalone_labels as u64);
            debug!(
                run_id = ctx.run_id,
                document = %document.id,
                page = detections.page,
                zones = reconciled.zones.len(),
                merged = reconciled.merged.len(),
                suppressed = reconciled.suppressed,
                "page reconciled"
            );
            zones.extend(reconciled.zones);
        }

        zones.sort_by(reading_order);
        let records: Vec<Record> = zones.iter().map(|z| object_record(document, z)).collect();
        report.add("objects", records.len() as u64);
        info!(
            run_id = ctx.run_id,
            document = %document.id,
            objects = records.len(),
            "extraction finished"
        );

        Ok(StageOutput::new(Payload::new(records)).with_report(report))
    }
}
