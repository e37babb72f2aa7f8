//! Configuration for zone reconciliation.

use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, TesseraError};
use crate::types::RoleVocabulary;

/// What to do with a zone whose geometry cannot be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeometryPolicy {
    /// Drop the zone, log it, and report it in `Reconciled::rejected`.
    #[default]
    Drop,
    /// Fail the whole reconciliation call.
    Reject,
}

/// Configuration for the reconciliation engine.
///
/// Both thresholds are corpus-specific. The defaults were measured on
/// single-column printed papers where equation numbers sat 110-130pt from the
/// formula center; recalibrate with `ReconciliationEngine::calibrate` for
/// other layouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Maximum center-to-center distance (points) for a content/label pair.
    pub pair_distance: f64,
    /// Minimum IoU for two detections from different adapters to be duplicates.
    pub iou_threshold: f64,
    /// Share of a text block's area that must lie inside an equation, table
    /// or figure from another adapter for the block to be absorbed by it.
    pub containment_threshold: f64,
    /// Class label -> pairing role mapping.
    pub roles: RoleVocabulary,
    /// Groups of distinct class labels that may describe the same object.
    pub compatible_classes: Vec<Vec<String>>,
    pub geometry_policy: GeometryPolicy,
    /// Headroom added above the largest observed distance when suggesting a threshold.
    pub calibration_margin: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            pair_distance: 130.0,
            iou_threshold: 0.85,
            containment_threshold: 0.8,
            roles: RoleVocabulary::default(),
            compatible_classes: vec![vec![
                "label-caption".to_string(),
                "label-number".to_string(),
            ]],
            geometry_policy: GeometryPolicy::Drop,
            calibration_margin: 0.05,
        }
    }
}

impl ReconcileConfig {
    /// Create config with a custom pairing distance.
    pub fn with_pair_distance(mut self, distance: f64) -> Self {
        self.pair_distance = distance;
        self
    }

    /// Create config with a custom duplicate IoU threshold.
    pub fn with_iou_threshold(mut self, threshold: f64) -> Self {
        self.iou_threshold = threshold;
        self
    }

    pub fn with_containment_threshold(mut self, threshold: f64) -> Self {
        self.containment_threshold = threshold;
        self
    }

    pub fn with_geometry_policy(mut self, policy: GeometryPolicy) -> Self {
        self.geometry_policy = policy;
        self
    }

    /// Whether two class labels may describe the same object.
    pub fn classes_compatible(&self, a: &str, b: &str) -> bool {
        a == b
            || self.compatible_classes.iter().any(|group| {
                group.iter().any(|c| c == a) && group.iter().any(|c| c == b)
            })
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !self.pair_distance.is_finite() || self.pair_distance <= 0.0 {
            return Err(TesseraError::configuration(format!(
                "reconcile.pair_distance must be a positive number, got {}",
                self.pair_distance
            )));
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(TesseraError::configuration(format!(
                "reconcile.iou_threshold must be in (0, 1], got {}",
                self.iou_threshold
            )));
        }
        if !(self.containment_threshold > 0.0 && self.containment_threshold <= 1.0) {
            return Err(TesseraError::configuration(format!(
                "reconcile.containment_threshold must be in (0, 1], got {}",
                self.containment_threshold
            )));
        }
        if !self.calibration_margin.is_finite() || self.calibration_margin < 0.0 {
            return Err(TesseraError::configuration(
                "reconcile.calibration_margin must be non-negative",
            ));
        }
        Ok(())
    }
}
