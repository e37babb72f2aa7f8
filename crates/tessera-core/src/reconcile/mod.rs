//! Zone reconciliation engine.
//!
//! Turns the raw, overlapping output of several detector adapters into a
//! canonical zone list:
//!
//! 1. Validate geometry (per [`GeometryPolicy`])
//! 2. Suppress cross-adapter duplicates
//! 3. Merge content/label split pairs
//! 4. Flag labels left without a partner
//!
//! Reconciliation is single-threaded per page; pairing uses global
//! tie-breaking across all of a page's candidates. Output order is not
//! meaningful.

mod calibrate;
mod config;
mod dedup;
mod pairing;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

pub use calibrate::{DistanceCalibration, ObservedPair};
pub use config::{GeometryPolicy, ReconcileConfig};
pub use pairing::{MergeCandidatePair, MergedPair};

use crate::error::{CoreResult, GeometryError, TesseraError};
use crate::traits::LabelTextSource;
use crate::types::Zone;

/// Result of reconciling a set of zones.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconciled {
    /// Canonical zones.
    pub zones: Vec<Zone>,
    /// Zones dropped for unusable geometry.
    #[serde(skip)]
    pub rejected: Vec<GeometryError>,
    /// Split pairs merged into a single zone.
    pub merged: Vec<MergedPair>,
    /// Number of duplicate detections suppressed.
    pub suppressed: usize,
    /// Text blocks absorbed by an enclosing region from another adapter.
    pub absorbed: usize,
    /// Labels passed through with `standalone_label = true`.
    pub standalone_labels: usize,
}

impl Reconciled {
    /// Center distances of every merged pair, for calibration review.
    pub fn pair_distances(&self) -> Vec<f64> {
        self.merged.iter().map(|m| m.distance).collect()
    }
}

/// Reconciles raw detections into canonical zones.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    config: ReconcileConfig,
}

impl ReconciliationEngine {
    /// Create a new engine with the given configuration.
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Reconcile all raw zones for one page (or several; zones are grouped
    /// by page and pages never interact).
    ///
    /// `text` is consulted only for the identifying text of label zones that
    /// are merged into a content partner.
    pub fn reconcile(&self, raw: Vec<Zone>, text: &dyn LabelTextSource) -> CoreResult<Reconciled> {
        let mut result = Reconciled::default();
        let mut pages: BTreeMap<u32, Vec<Zone>> = BTreeMap::new();

        for zone in raw {
            match zone.validate() {
                Ok(()) => pages.entry(zone.page()).or_default().push(zone),
                Err(err) => {
                    if self.config.geometry_policy == GeometryPolicy::Reject {
                        return Err(TesseraError::Geometry(err));
                    }
                    warn!(
                        page = err.page,
                        adapter = %err.adapter,
                        zone = %err.zone_id,
                        defect = %err.defect,
                        "dropping zone with invalid geometry"
                    );
                    result.rejected.push(err);
                }
            }
        }

        for (page, zones) in pages {
            let input_count = zones.len();
            let (deduped, suppressed) = dedup::suppress_duplicates(zones, &self.config);
            let (deduped, absorbed) = dedup::absorb_contained_text(deduped, &self.config);
            let outcome = pairing::merge_split_pairs(deduped, &self.config, text);

            debug!(
                page,
                input = input_count,
                output = outcome.zones.len(),
                suppressed,
                absorbed,
                merged = outcome.merged.len(),
                standalone_labels = outcome.standalone_labels,
                "reconciled page"
            );

            result.suppressed += suppressed;
            result.absorbed += absorbed;
            result.standalone_labels += outcome.standalone_labels;
            result.merged.extend(outcome.merged);
            result.zones.extend(outcome.zones);
        }

        Ok(result)
    }

    /// Measure nearest content/label distances without applying any threshold.
    ///
    /// Zones with invalid geometry are skipped.
    pub fn calibrate(&self, zones: &[Zone]) -> DistanceCalibration {
        let valid: Vec<Zone> = zones
            .iter()
            .filter(|z| z.validate().is_ok())
            .cloned()
            .collect();
        calibrate::calibrate(&valid, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NoText;
    use crate::types::{keys, BBox, TextLayer, Word, ZoneMetadata};

    fn zone(id: &str, class: &str, bbox: BBox) -> Zone {
        Zone::new(id, 0, bbox, class, 0.9, "vision")
    }

    fn engine(distance: f64) -> ReconciliationEngine {
        ReconciliationEngine::new(ReconcileConfig::default().with_pair_distance(distance))
    }

    fn by_id<'a>(zones: &'a [Zone], id: &str) -> &'a Zone {
        zones
            .iter()
            .find(|z| z.id().as_str() == id)
            .unwrap_or_else(|| panic!("zone {} missing", id))
    }

    fn formula() -> Zone {
        zone("eq", "content-formula", BBox::new(100.0, 200.0, 300.0, 250.0))
    }

    #[test]
    fn test_merges_adjacent_equation_number() {
        // centers (200, 225) and (319, 230): ~119pt apart
        let label = zone("num", "label-caption", BBox::new(300.0, 220.0, 338.0, 240.0));
        let text = TextLayer::new(vec![Word::new("(4)", BBox::new(302.0, 222.0, 330.0, 238.0))]);

        let result = engine(130.0).reconcile(vec![formula(), label], &text).unwrap();

        assert_eq!(result.zones.len(), 1);
        let merged = &result.zones[0];
        assert_eq!(merged.id().as_str(), "eq");
        assert_eq!(merged.class_label(), "content-formula");
        assert_eq!(*merged.bbox(), BBox::new(100.0, 200.0, 300.0, 250.0));
        assert_eq!(merged.metadata().get_bool(keys::HAS_LABEL), Some(true));
        assert_eq!(merged.metadata().get_str(keys::LABEL_ZONE_ID), Some("num"));
        assert_eq!(merged.metadata().get_str(keys::LABEL_TEXT), Some("(4)"));

        let distances = result.pair_distances();
        assert_eq!(distances.len(), 1);
        assert!((distances[0] - 119.1).abs() < 0.1);
    }

    #[test]
    fn test_distant_label_is_flagged_standalone() {
        // centers (200, 225) and (450, 230): ~250pt apart
        let label = zone("num", "label-caption", BBox::new(430.0, 220.0, 470.0, 240.0));

        let result = engine(130.0).reconcile(vec![formula(), label], &NoText).unwrap();

        assert_eq!(result.zones.len(), 2);
        assert_eq!(result.standalone_labels, 1);
        let content = by_id(&result.zones, "eq");
        assert_eq!(content.metadata().get_bool(keys::HAS_LABEL), None);
        let label = by_id(&result.zones, "num");
        assert_eq!(label.metadata().get_bool(keys::STANDALONE_LABEL), Some(true));
    }

    #[test]
    fn test_same_role_never_merges() {
        let zones = vec![
            zone("c1", "content-formula", BBox::new(0.0, 0.0, 10.0, 10.0)),
            zone("c2", "content-formula", BBox::new(12.0, 0.0, 22.0, 10.0)),
            zone("l1", "label-number", BBox::new(500.0, 0.0, 510.0, 10.0)),
            zone("l2", "label-number", BBox::new(512.0, 0.0, 522.0, 10.0)),
        ];
        let result = engine(10_000.0).reconcile(zones, &NoText).unwrap();
        // only c/l pairs can merge, and each side at most once
        assert_eq!(result.merged.len(), 2);
        for m in &result.merged {
            assert!(m.content_id.starts_with('c'));
            assert!(m.label_id.starts_with('l'));
        }
    }

    #[test]
    fn test_same_role_pair_alone_is_untouched() {
        let zones = vec![
            zone("l1", "label-number", BBox::new(0.0, 0.0, 10.0, 10.0)),
            zone("l2", "label-number", BBox::new(12.0, 0.0, 22.0, 10.0)),
        ];
        let result = engine(1_000.0).reconcile(zones, &NoText).unwrap();
        assert!(result.merged.is_empty());
        assert_eq!(result.standalone_labels, 2);
    }

    #[test]
    fn test_other_role_never_pairs() {
        let zones = vec![
            zone("t", "table", BBox::new(0.0, 0.0, 100.0, 100.0)),
            zone("l", "label-caption", BBox::new(0.0, 105.0, 100.0, 115.0)),
        ];
        let result = engine(500.0).reconcile(zones, &NoText).unwrap();
        assert!(result.merged.is_empty());
        assert_eq!(result.zones.len(), 2);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // centers exactly 100pt apart
        let content = zone("c", "content-formula", BBox::new(0.0, 0.0, 20.0, 20.0));
        let label = zone("l", "label-number", BBox::new(100.0, 0.0, 120.0, 20.0));

        let merged = engine(100.0)
            .reconcile(vec![content.clone(), label.clone()], &NoText)
            .unwrap();
        assert_eq!(merged.merged.len(), 1);

        let apart = engine(99.9).reconcile(vec![content, label], &NoText).unwrap();
        assert!(apart.merged.is_empty());
    }

    #[test]
    fn test_nearest_label_wins() {
        let content = zone("c", "content-formula", BBox::new(0.0, 0.0, 20.0, 20.0));
        let near = zone("near", "label-number", BBox::new(50.0, 0.0, 70.0, 20.0));
        let far = zone("far", "label-number", BBox::new(90.0, 0.0, 110.0, 20.0));

        let result = engine(130.0).reconcile(vec![far, content, near], &NoText).unwrap();
        assert_eq!(result.merged.len(), 1);
        assert_eq!(result.merged[0].label_id, "near");
        assert_eq!(
            by_id(&result.zones, "far").metadata().get_bool(keys::STANDALONE_LABEL),
            Some(true)
        );
    }

    #[test]
    fn test_distance_tie_broken_by_confidence_then_adapter() {
        let content = zone("c", "content-formula", BBox::new(100.0, 0.0, 120.0, 20.0));
        let left = Zone::new("left", 0, BBox::new(40.0, 0.0, 60.0, 20.0), "label-number", 0.7, "b");
        let right = Zone::new("right", 0, BBox::new(160.0, 0.0, 180.0, 20.0), "label-number", 0.9, "c");
        let result = engine(130.0)
            .reconcile(vec![content.clone(), left.clone(), right], &NoText)
            .unwrap();
        assert_eq!(result.merged[0].label_id, "right");

        let right_same_conf =
            Zone::new("right", 0, BBox::new(160.0, 0.0, 180.0, 20.0), "label-number", 0.7, "c");
        let result = engine(130.0)
            .reconcile(vec![content, left, right_same_conf], &NoText)
            .unwrap();
        assert_eq!(result.merged[0].label_id, "left");
    }

    #[test]
    fn test_label_text_falls_back_to_adapter_text() {
        let label = zone("num", "label-number", BBox::new(300.0, 220.0, 338.0, 240.0))
            .with_metadata(keys::TEXT, "(12)");
        let result = engine(130.0).reconcile(vec![formula(), label], &NoText).unwrap();
        assert_eq!(result.zones[0].metadata().get_str(keys::LABEL_TEXT), Some("(12)"));
    }

    #[test]
    fn test_label_without_text_still_merges() {
        let label = zone("num", "label-number", BBox::new(300.0, 220.0, 338.0, 240.0));
        let result = engine(130.0).reconcile(vec![formula(), label], &NoText).unwrap();
        let merged = &result.zones[0];
        assert_eq!(merged.metadata().get_bool(keys::HAS_LABEL), Some(true));
        assert!(!merged.metadata().contains_key(keys::LABEL_TEXT));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let zones = vec![
            formula(),
            zone("num", "label-caption", BBox::new(300.0, 220.0, 338.0, 240.0)),
            zone("stray", "label-caption", BBox::new(300.0, 600.0, 338.0, 620.0)),
            zone("c2", "content-formula", BBox::new(100.0, 400.0, 300.0, 450.0)),
            Zone::new("t1", 0, BBox::new(0.0, 700.0, 200.0, 800.0), "table", 0.8, "vision"),
            Zone::new("t2", 0, BBox::new(1.0, 701.0, 201.0, 800.0), "table", 0.9, "structure"),
        ];
        let engine = engine(130.0);
        let first = engine.reconcile(zones, &NoText).unwrap();
        let second = engine.reconcile(first.zones.clone(), &NoText).unwrap();

        let mut a = first.zones.clone();
        let mut b = second.zones.clone();
        a.sort_by(|x, y| x.id().cmp(y.id()));
        b.sort_by(|x, y| x.id().cmp(y.id()));
        assert_eq!(a, b);
        assert!(second.merged.is_empty());
        assert_eq!(second.suppressed, 0);
    }

    #[test]
    fn test_duplicate_tables_across_adapters() {
        let a = Zone::new("vision:0", 0, BBox::new(100.0, 100.0, 400.0, 300.0), "table", 0.81, "vision");
        let b = Zone::new("layout:0", 0, BBox::new(104.0, 104.0, 404.0, 304.0), "table", 0.95, "layout");
        assert!(a.bbox().iou(b.bbox()) > 0.9);

        let result = engine(130.0).reconcile(vec![a, b], &NoText).unwrap();
        assert_eq!(result.zones.len(), 1);
        assert_eq!(result.suppressed, 1);
        assert_eq!(result.zones[0].confidence(), 0.95);
        assert_eq!(result.zones[0].source_adapters(), vec!["layout", "vision"]);
    }

    #[test]
    fn test_overlapping_table_and_figure_kept() {
        let bbox = BBox::new(100.0, 100.0, 400.0, 300.0);
        let table = Zone::new("t", 0, bbox, "table", 0.9, "vision");
        let figure = Zone::new("f", 0, bbox, "figure", 0.9, "layout");
        let result = engine(130.0).reconcile(vec![table, figure], &NoText).unwrap();
        assert_eq!(result.zones.len(), 2);
        assert_eq!(result.suppressed, 0);
    }

    #[test]
    fn test_pages_do_not_interact() {
        let content = Zone::new("c", 0, BBox::new(0.0, 0.0, 20.0, 20.0), "content-formula", 0.9, "v");
        let label = Zone::new("l", 1, BBox::new(30.0, 0.0, 50.0, 20.0), "label-number", 0.9, "v");
        let result = engine(130.0).reconcile(vec![content, label], &NoText).unwrap();
        assert!(result.merged.is_empty());
    }

    #[test]
    fn test_invalid_geometry_dropped_by_default() {
        let bad = zone("bad", "table", BBox::new(10.0, 10.0, 5.0, 20.0));
        let nan = zone("nan", "table", BBox::new(f64::NAN, 10.0, 5.0, 20.0));
        let good = zone("good", "table", BBox::new(0.0, 0.0, 5.0, 5.0));

        let result = engine(130.0).reconcile(vec![bad, nan, good], &NoText).unwrap();
        assert_eq!(result.zones.len(), 1);
        assert_eq!(result.rejected.len(), 2);
    }

    #[test]
    fn test_invalid_geometry_rejected_in_strict_mode() {
        let engine = ReconciliationEngine::new(
            ReconcileConfig::default().with_geometry_policy(GeometryPolicy::Reject),
        );
        let bad = zone("bad", "table", BBox::new(10.0, 10.0, 5.0, 20.0));
        let err = engine.reconcile(vec![bad], &NoText).unwrap_err();
        assert!(matches!(err, TesseraError::Geometry(g) if g.zone_id == "bad"));
    }

    #[test]
    fn test_inputs_not_mutated() {
        let content = formula();
        let label = zone("num", "label-caption", BBox::new(300.0, 220.0, 338.0, 240.0));
        let before = content.clone();
        let _ = engine(130.0)
            .reconcile(vec![content.clone(), label], &NoText)
            .unwrap();
        assert_eq!(content, before);
        assert_eq!(content.metadata(), &ZoneMetadata::new());
    }

    #[test]
    fn test_calibrate_reports_observed_distances() {
        let zones = vec![
            formula(),
            zone("num", "label-caption", BBox::new(300.0, 220.0, 338.0, 240.0)),
            zone("c2", "content-formula", BBox::new(100.0, 400.0, 300.0, 450.0)),
            zone("num2", "label-caption", BBox::new(420.0, 420.0, 458.0, 440.0)),
        ];
        let engine = engine(130.0);
        let cal = engine.calibrate(&zones);
        assert_eq!(cal.observed.len(), 2);
        let max = cal.max.unwrap();
        assert!(max > 130.0);
        assert_eq!(cal.beyond_current_threshold, 1);
        let suggested = cal.suggested_pair_distance.unwrap();
        assert!(suggested > max);
    }
}
