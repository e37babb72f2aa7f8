//! Cross-adapter duplicate suppression.
//!
//! Two zones are duplicates when they come from different adapters, have
//! compatible class labels, and overlap with IoU at or above the threshold.
//! The higher-confidence zone is kept and records every adapter that saw it.
//!
//! A text block is also absorbed when most of it lies inside an equation,
//! table or figure reported by another adapter: the text-structure adapter
//! sees the words of a formula as a paragraph.

use std::collections::BTreeSet;

use ordered_float::OrderedFloat;
use serde_json::Value;
use tracing::debug;

use super::config::ReconcileConfig;
use crate::types::{keys, Zone, ZoneKind};

struct Cluster {
    keeper: Zone,
    adapters: BTreeSet<String>,
    duplicate_ids: Vec<String>,
}

/// Order zones so that the one to keep comes first: confidence descending,
/// then adapter id, then zone id.
pub(crate) fn keep_order(a: &Zone, b: &Zone) -> std::cmp::Ordering {
    OrderedFloat(b.confidence())
        .cmp(&OrderedFloat(a.confidence()))
        .then_with(|| a.source_adapter().cmp(b.source_adapter()))
        .then_with(|| a.id().cmp(b.id()))
}

/// Collapse duplicate detections. Returns the surviving zones and how many
/// were suppressed.
pub(crate) fn suppress_duplicates(mut zones: Vec<Zone>, config: &ReconcileConfig) -> (Vec<Zone>, usize) {
    if zones.len() <= 1 {
        return (zones, 0);
    }

    zones.sort_by(keep_order);

    let mut clusters: Vec<Cluster> = Vec::with_capacity(zones.len());
    let mut suppressed = 0;

    for zone in zones {
        let best = clusters
            .iter_mut()
            .filter(|c| {
                c.keeper.page() == zone.page()
                    && !c.adapters.contains(zone.source_adapter())
                    && config.classes_compatible(c.keeper.class_label(), zone.class_label())
            })
            .map(|c| {
                let iou = c.keeper.bbox().iou(zone.bbox());
                (c, iou)
            })
            .filter(|(_, iou)| *iou >= config.iou_threshold)
            .max_by(|(_, a), (_, b)| OrderedFloat(*a).cmp(&OrderedFloat(*b)));

        match best {
            Some((cluster, iou)) => {
                debug!(
                    page = zone.page(),
                    kept = %cluster.keeper.id(),
                    duplicate = %zone.id(),
                    adapter = zone.source_adapter(),
                    iou,
                    "suppressed duplicate detection"
                );
                cluster.adapters.extend(zone.source_adapters());
                cluster.duplicate_ids.push(zone.id().to_string());
                suppressed += 1;
            }
            None => {
                let adapters = zone.source_adapters().into_iter().collect();
                clusters.push(Cluster {
                    keeper: zone,
                    adapters,
                    duplicate_ids: Vec::new(),
                });
            }
        }
    }

    let kept = clusters
        .into_iter()
        .map(|c| {
            if c.duplicate_ids.is_empty() {
                return c.keeper;
            }
            let adapters: Vec<Value> = c.adapters.into_iter().map(Value::from).collect();
            let ids: Vec<Value> = c.duplicate_ids.into_iter().map(Value::from).collect();
            c.keeper.extended(|meta| {
                meta.append_unique(keys::SOURCE_ADAPTERS, adapters);
                meta.append_unique(keys::DUPLICATE_IDS, ids);
            })
        })
        .collect();

    (kept, suppressed)
}

fn is_region(kind: &ZoneKind) -> bool {
    matches!(kind, ZoneKind::Equation | ZoneKind::Table | ZoneKind::Figure)
}

/// Drop text blocks lying inside a region zone from a different adapter.
/// Returns the surviving zones and how many blocks were absorbed.
pub(crate) fn absorb_contained_text(zones: Vec<Zone>, config: &ReconcileConfig) -> (Vec<Zone>, usize) {
    let regions: Vec<usize> = (0..zones.len()).filter(|&i| is_region(&zones[i].kind())).collect();
    if regions.is_empty() {
        return (zones, 0);
    }

    // Region index chosen for each absorbed text block.
    let mut owner: Vec<Option<usize>> = vec![None; zones.len()];
    for (i, zone) in zones.iter().enumerate() {
        if zone.kind() != ZoneKind::Text || zone.bbox().area() <= 0.0 {
            continue;
        }
        owner[i] = regions
            .iter()
            .copied()
            .filter(|&r| zones[r].page() == zone.page() && zones[r].source_adapter() != zone.source_adapter())
            .map(|r| (r, zones[r].bbox().intersection_area(zone.bbox()) / zone.bbox().area()))
            .filter(|(_, share)| *share >= config.containment_threshold)
            .max_by(|(ra, a), (rb, b)| {
                OrderedFloat(*a)
                    .cmp(&OrderedFloat(*b))
                    .then_with(|| keep_order(&zones[*rb], &zones[*ra]))
            })
            .map(|(r, _)| r);
    }

    let mut absorbed_into: Vec<Vec<Value>> = vec![Vec::new(); zones.len()];
    for (i, region) in owner.iter().enumerate() {
        if let Some(r) = region {
            debug!(
                page = zones[i].page(),
                region = %zones[*r].id(),
                text = %zones[i].id(),
                adapter = zones[i].source_adapter(),
                "text block absorbed by enclosing region"
            );
            absorbed_into[*r].push(Value::from(zones[i].id().as_str()));
        }
    }

    let absorbed = owner.iter().filter(|o| o.is_some()).count();
    let kept = zones
        .into_iter()
        .zip(owner)
        .zip(absorbed_into)
        .filter(|((_, region), _)| region.is_none())
        .map(|((zone, _), ids)| {
            if ids.is_empty() {
                zone
            } else {
                zone.extended(|meta| {
                    meta.append_unique(keys::ABSORBED_IDS, ids);
                })
            }
        })
        .collect();
    (kept, absorbed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;

    fn zone(id: &str, adapter: &str, class: &str, conf: f64, bbox: BBox) -> Zone {
        Zone::new(id, 0, bbox, class, conf, adapter)
    }

    #[test]
    fn test_keeps_higher_confidence() {
        let config = ReconcileConfig::default();
        let zones = vec![
            zone("a", "vision", "table", 0.81, BBox::new(100.0, 100.0, 300.0, 200.0)),
            zone("b", "structure", "table", 0.95, BBox::new(102.0, 101.0, 301.0, 203.0)),
        ];

        let (kept, suppressed) = suppress_duplicates(zones, &config);
        assert_eq!(suppressed, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id().as_str(), "b");
        assert_eq!(kept[0].source_adapters(), vec!["structure", "vision"]);
        assert_eq!(kept[0].metadata().string_list(keys::DUPLICATE_IDS), vec!["a"]);
    }

    #[test]
    fn test_same_adapter_not_suppressed() {
        let config = ReconcileConfig::default();
        let bbox = BBox::new(0.0, 0.0, 100.0, 100.0);
        let zones = vec![
            zone("a", "vision", "table", 0.9, bbox),
            zone("b", "vision", "table", 0.8, bbox),
        ];
        let (kept, suppressed) = suppress_duplicates(zones, &config);
        assert_eq!(suppressed, 0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_incompatible_classes_not_suppressed() {
        let config = ReconcileConfig::default();
        let bbox = BBox::new(0.0, 0.0, 100.0, 100.0);
        let zones = vec![
            zone("a", "vision", "table", 0.9, bbox),
            zone("b", "structure", "figure", 0.8, bbox),
        ];
        let (kept, suppressed) = suppress_duplicates(zones, &config);
        assert_eq!(suppressed, 0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_three_adapters_collapse_to_one() {
        let config = ReconcileConfig::default();
        let bbox = BBox::new(0.0, 0.0, 100.0, 100.0);
        let zones = vec![
            zone("a", "a", "figure", 0.5, bbox),
            zone("b", "b", "figure", 0.7, bbox),
            zone("c", "c", "figure", 0.6, bbox),
        ];
        let (kept, suppressed) = suppress_duplicates(zones, &config);
        assert_eq!(suppressed, 2);
        assert_eq!(kept[0].id().as_str(), "b");
        assert_eq!(kept[0].source_adapters(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_low_overlap_kept() {
        let config = ReconcileConfig::default();
        let zones = vec![
            zone("a", "vision", "table", 0.9, BBox::new(0.0, 0.0, 100.0, 100.0)),
            zone("b", "structure", "table", 0.8, BBox::new(50.0, 0.0, 150.0, 100.0)),
        ];
        let (kept, _) = suppress_duplicates(zones, &config);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_text_inside_formula_is_absorbed() {
        let config = ReconcileConfig::default();
        let zones = vec![
            zone("vision:0", "vision", "content-formula", 0.93, BBox::new(100.0, 200.0, 300.0, 250.0)),
            zone("text:1", "text-structure", "text", 0.5, BBox::new(150.0, 218.0, 220.0, 232.0)),
            zone("text:2", "text-structure", "text", 0.5, BBox::new(100.0, 400.0, 400.0, 412.0)),
        ];
        let (kept, absorbed) = absorb_contained_text(zones, &config);

        assert_eq!(absorbed, 1);
        let ids: Vec<&str> = kept.iter().map(|z| z.id().as_str()).collect();
        assert_eq!(ids, vec!["vision:0", "text:2"]);
        assert_eq!(kept[0].metadata().string_list(keys::ABSORBED_IDS), vec!["text:1"]);
    }

    #[test]
    fn test_partially_overlapping_text_survives() {
        let config = ReconcileConfig::default();
        let zones = vec![
            zone("t", "vision", "table", 0.9, BBox::new(0.0, 0.0, 100.0, 100.0)),
            // Half of the block lies outside the table.
            zone("p", "text-structure", "text", 0.5, BBox::new(50.0, 40.0, 150.0, 60.0)),
        ];
        let (kept, absorbed) = absorb_contained_text(zones, &config);
        assert_eq!(absorbed, 0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_same_adapter_text_inside_figure_survives() {
        let config = ReconcileConfig::default();
        let zones = vec![
            zone("f", "vision", "figure", 0.9, BBox::new(0.0, 0.0, 200.0, 200.0)),
            zone("legend", "vision", "text", 0.8, BBox::new(10.0, 10.0, 60.0, 30.0)),
        ];
        let (kept, absorbed) = absorb_contained_text(zones, &config);
        assert_eq!(absorbed, 0);
        assert_eq!(kept.len(), 2);
    }
}
