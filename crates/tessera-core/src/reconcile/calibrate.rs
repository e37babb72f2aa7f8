//! Pairing-distance calibration.
//!
//! Measures how far label zones actually sit from their nearest complementary
//! content zone so the pairing threshold can be set just above the observed
//! maximum instead of guessed.

use ordered_float::OrderedFloat;
use serde::Serialize;

use super::config::ReconcileConfig;
use crate::types::{Zone, ZoneRole};

/// One observed nearest-partner distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservedPair {
    pub page: u32,
    pub content_id: String,
    pub label_id: String,
    pub distance: f64,
}

/// Distance statistics for a set of zones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceCalibration {
    /// Nearest label for every content zone that has one, ascending by distance.
    pub observed: Vec<ObservedPair>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Largest observed distance plus the configured margin.
    pub suggested_pair_distance: Option<f64>,
    /// Observed pairs the current threshold would reject.
    pub beyond_current_threshold: usize,
}

pub(crate) fn calibrate(zones: &[Zone], config: &ReconcileConfig) -> DistanceCalibration {
    let roles: Vec<ZoneRole> = zones
        .iter()
        .map(|z| config.roles.role_of(z.class_label()))
        .collect();

    let mut observed: Vec<ObservedPair> = zones
        .iter()
        .enumerate()
        .filter(|(i, _)| roles[*i] == ZoneRole::Content)
        .filter_map(|(_, content)| {
            zones
                .iter()
                .enumerate()
                .filter(|(j, label)| roles[*j] == ZoneRole::Label && label.page() == content.page())
                .map(|(_, label)| (label, content.bbox().center_distance(label.bbox())))
                .min_by_key(|(_, d)| OrderedFloat(*d))
                .map(|(label, distance)| ObservedPair {
                    page: content.page(),
                    content_id: content.id().to_string(),
                    label_id: label.id().to_string(),
                    distance,
                })
        })
        .collect();
    observed.sort_by_key(|p| OrderedFloat(p.distance));

    let distances: Vec<f64> = observed.iter().map(|p| p.distance).collect();
    let min = distances.first().copied();
    let max = distances.last().copied();
    let mean = (!distances.is_empty()).then(|| distances.iter().sum::<f64>() / distances.len() as f64);
    let beyond_current_threshold = distances
        .iter()
        .filter(|d| **d > config.pair_distance)
        .count();

    DistanceCalibration {
        suggested_pair_distance: max.map(|m| m * (1.0 + config.calibration_margin)),
        observed,
        min,
        max,
        mean,
        beyond_current_threshold,
    }
}
