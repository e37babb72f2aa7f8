//! Replays detections produced out of process.
//!
//! Vision models usually run in their own environment and write their output
//! to disk. This adapter loads such a file once and serves each page's zones,
//! normalizing the model's class vocabulary through a class map.
//!
//! File format:
//!
//! ```json
//! {"detections": [
//!   {"page": 0, "class": "isolate_formula", "bbox": [100, 200, 300, 250], "confidence": 0.93},
//!   {"page": 0, "class": "formula_caption", "bbox": [300, 220, 338, 240], "confidence": 0.88, "text": "(4)"}
//! ]}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use tessera_core::{keys, BBox, DetectError, DetectResult, DetectorAdapter, PageInput, Zone, ZoneId};

/// Vendor classes understood without configuration.
const DEFAULT_CLASS_MAP: &[(&str, &str)] = &[
    ("isolate_formula", "content-formula"),
    ("formula", "content-formula"),
    ("equation", "content-formula"),
    ("formula_caption", "label-number"),
    ("equation_number", "label-number"),
    // Table and figure bodies carry no pairing role, so their captions are
    // kept as text rather than left as labels with nothing to pair with.
    ("table_caption", "text-caption"),
    ("figure_caption", "text-caption"),
    ("picture", "figure"),
    ("image", "figure"),
    ("plain_text", "text"),
];

#[derive(Debug, Clone, Deserialize)]
struct DetectionFile {
    #[serde(default)]
    detections: Vec<Detection>,
}

#[derive(Debug, Clone, Deserialize)]
struct Detection {
    page: u32,
    class: String,
    bbox: BBox,
    confidence: f64,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

/// Adapter serving detections loaded from a file.
#[derive(Debug, Clone)]
pub struct PrecomputedAdapter {
    name: String,
    pages: BTreeMap<u32, Vec<Zone>>,
}

impl PrecomputedAdapter {
    /// Load detections from a JSON file.
    pub fn from_file(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        class_map: &BTreeMap<String, String>,
    ) -> DetectResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(name, &content, class_map)
    }

    /// Parse detections from a JSON string.
    pub fn from_json(
        name: impl Into<String>,
        json: &str,
        class_map: &BTreeMap<String, String>,
    ) -> DetectResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DetectError::InvalidInput("adapter name must not be empty".to_string()));
        }
        let file: DetectionFile = serde_json::from_str(json)?;

        let mut pages: BTreeMap<u32, Vec<Zone>> = BTreeMap::new();
        for detection in file.detections {
            let zones = pages.entry(detection.page).or_default();
            let id = ZoneId::for_adapter(&name, detection.page, zones.len());
            let class = normalize_class(&detection.class, class_map);

            let mut zone = Zone::new(id, detection.page, detection.bbox, class, detection.confidence, &name)
                .with_metadata("vendor_class", detection.class);
            if let Some(text) = detection.text {
                zone = zone.with_metadata(keys::TEXT, text);
            }
            for (key, value) in detection.metadata {
                zone = zone.with_metadata(key, value);
            }
            zones.push(zone);
        }

        debug!(
            adapter = %name,
            pages = pages.len(),
            zones = pages.values().map(Vec::len).sum::<usize>(),
            "loaded precomputed detections"
        );
        Ok(Self { name, pages })
    }

    /// Number of pages with at least one detection.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Map a vendor class to the engine vocabulary. Configured entries win over
/// the defaults; unknown classes pass through lowercased.
pub fn normalize_class(vendor: &str, class_map: &BTreeMap<String, String>) -> String {
    if let Some(mapped) = class_map.get(vendor) {
        return mapped.clone();
    }
    let lower = vendor.to_lowercase();
    DEFAULT_CLASS_MAP
        .iter()
        .find(|(from, _)| *from == lower)
        .map(|(_, to)| to.to_string())
        .unwrap_or(lower)
}

#[async_trait]
impl DetectorAdapter for PrecomputedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect(&self, page: &PageInput) -> DetectResult<Vec<Zone>> {
        Ok(self.pages.get(&page.index).cloned().unwrap_or_default())
    }
}
