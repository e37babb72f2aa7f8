//! Split-detection pairing.
//!
//! One logical object is sometimes detected as a content region plus a small
//! label region (a formula and its number). Pairs are chosen from the
//! adapters' class labels alone, never from text read out of the label.

use ordered_float::OrderedFloat;
use serde::Serialize;
use tracing::{debug, trace};

use super::config::ReconcileConfig;
use crate::traits::LabelTextSource;
use crate::types::{keys, Zone, ZoneRole};

/// A content/label pair that passed the complementarity and distance tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeCandidatePair {
    /// Index of the content zone in the page's zone list.
    pub content: usize,
    /// Index of the label zone in the page's zone list.
    pub label: usize,
    /// Center-to-center distance in points.
    pub distance: f64,
}

/// A pair that was merged into one output zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedPair {
    pub page: u32,
    pub content_id: String,
    pub label_id: String,
    pub distance: f64,
    pub label_text: Option<String>,
}

pub(crate) struct PairingOutcome {
    pub zones: Vec<Zone>,
    pub merged: Vec<MergedPair>,
    pub standalone_labels: usize,
}

/// Role of a zone for pairing purposes. Content that already absorbed a
/// label is not offered a second one.
fn pairing_role(zone: &Zone, config: &ReconcileConfig) -> ZoneRole {
    match config.roles.role_of(zone.class_label()) {
        ZoneRole::Content if zone.metadata().get_bool(keys::HAS_LABEL) == Some(true) => {
            ZoneRole::Other
        }
        role => role,
    }
}

/// Every complementary pair within the pairing distance, best first.
pub(crate) fn candidate_pairs(zones: &[Zone], roles: &[ZoneRole], config: &ReconcileConfig) -> Vec<MergeCandidatePair> {
    let mut candidates = Vec::new();

    for i in 0..zones.len() {
        for j in (i + 1)..zones.len() {
            if zones[i].page() != zones[j].page() {
                continue;
            }
            let (content, label) = match (roles[i], roles[j]) {
                (ZoneRole::Content, ZoneRole::Label) => (i, j),
                (ZoneRole::Label, ZoneRole::Content) => (j, i),
                _ => continue,
            };

            let distance = zones[content].bbox().center_distance(zones[label].bbox());
            if distance <= config.pair_distance {
                debug!(
                    page = zones[content].page(),
                    content = %zones[content].id(),
                    label = %zones[label].id(),
                    distance,
                    threshold = config.pair_distance,
                    "pair candidate within threshold"
                );
                candidates.push(MergeCandidatePair {
                    content,
                    label,
                    distance,
                });
            } else {
                trace!(
                    content = %zones[content].id(),
                    label = %zones[label].id(),
                    distance,
                    "pair candidate beyond threshold"
                );
            }
        }
    }

    candidates.sort_by(|a, b| {
        let (la, lb) = (&zones[a.label], &zones[b.label]);
        OrderedFloat(a.distance)
            .cmp(&OrderedFloat(b.distance))
            .then_with(|| OrderedFloat(lb.confidence()).cmp(&OrderedFloat(la.confidence())))
            .then_with(|| la.source_adapter().cmp(lb.source_adapter()))
            .then_with(|| zones[a.content].id().cmp(zones[b.content].id()))
            .then_with(|| la.id().cmp(lb.id()))
    });
    candidates
}

/// Greedy nearest-neighbor selection: each content and each label is used once.
pub(crate) fn select_matches(candidates: &[MergeCandidatePair], len: usize) -> Vec<MergeCandidatePair> {
    let mut content_used = vec![false; len];
    let mut label_used = vec![false; len];
    let mut matches = Vec::new();

    for candidate in candidates {
        if content_used[candidate.content] || label_used[candidate.label] {
            continue;
        }
        content_used[candidate.content] = true;
        label_used[candidate.label] = true;
        matches.push(*candidate);
    }
    matches
}

fn label_text(label: &Zone, text: &dyn LabelTextSource) -> Option<String> {
    text.text_in(label.page(), label.bbox())
        .or_else(|| label.metadata().get_str(keys::TEXT).map(String::from))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub(crate) fn merge_split_pairs(
    zones: Vec<Zone>,
    config: &ReconcileConfig,
    text: &dyn LabelTextSource,
) -> PairingOutcome {
    let roles: Vec<ZoneRole> = zones.iter().map(|z| pairing_role(z, config)).collect();
    let candidates = candidate_pairs(&zones, &roles, config);
    let matches = select_matches(&candidates, zones.len());

    // content index -> (label index, distance)
    let mut partner: Vec<Option<(usize, f64)>> = vec![None; zones.len()];
    let mut absorbed = vec![false; zones.len()];
    for m in &matches {
        partner[m.content] = Some((m.label, m.distance));
        absorbed[m.label] = true;
    }

    let mut merged = Vec::with_capacity(matches.len());
    let mut standalone_labels = 0;
    let mut out = Vec::with_capacity(zones.len() - matches.len());

    for (idx, zone) in zones.iter().enumerate() {
        if absorbed[idx] {
            continue;
        }
        if let Some((label_idx, distance)) = partner[idx] {
            let label = &zones[label_idx];
            let text = label_text(label, text);
            merged.push(MergedPair {
                page: zone.page(),
                content_id: zone.id().to_string(),
                label_id: label.id().to_string(),
                distance,
                label_text: text.clone(),
            });
            debug!(
                page = zone.page(),
                content = %zone.id(),
                label = %label.id(),
                distance,
                label_text = text.as_deref().unwrap_or(""),
                "merged split pair"
            );
            let label_id = label.id().to_string();
            out.push(zone.clone().extended(|meta| {
                meta.extend(keys::HAS_LABEL, true);
                meta.extend(keys::LABEL_ZONE_ID, label_id);
                if let Some(text) = text {
                    meta.extend(keys::LABEL_TEXT, text);
                }
            }));
        } else if roles[idx] == ZoneRole::Label {
            standalone_labels += 1;
            debug!(
                page = zone.page(),
                label = %zone.id(),
                "label has no content partner within pairing distance"
            );
            out.push(zone.clone().extended(|meta| {
                meta.extend(keys::STANDALONE_LABEL, true);
            }));
        } else {
            out.push(zone.clone());
        }
    }

    PairingOutcome {
        zones: out,
        merged,
        standalone_labels,
    }
}
