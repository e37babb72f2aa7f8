//! Zone and bounding-box types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::{GeometryError, ZoneDefect};

/// Well-known metadata keys written during reconciliation.
pub mod keys {
    /// Text carried by the adapter itself (e.g. a text-layer token).
    pub const TEXT: &str = "text";
    /// Merged zone absorbed a label partner.
    pub const HAS_LABEL: &str = "has_label";
    /// Text extracted from the absorbed label's bbox.
    pub const LABEL_TEXT: &str = "label_text";
    /// Id of the absorbed label zone.
    pub const LABEL_ZONE_ID: &str = "label_zone_id";
    /// Label zone with no content partner within the pairing distance.
    pub const STANDALONE_LABEL: &str = "standalone_label";
    /// Adapters that reported the same object.
    pub const SOURCE_ADAPTERS: &str = "source_adapters";
    /// Ids of suppressed duplicate detections.
    pub const DUPLICATE_IDS: &str = "duplicate_ids";
    /// Ids of text blocks from other adapters lying inside this region.
    pub const ABSORBED_IDS: &str = "absorbed_ids";
}

/// Axis-aligned bounding box in page points.
///
/// Serialized as `[x0, y0, x1, y1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        [b.x0, b.y0, b.x1, b.y1]
    }
}

impl BBox {
    /// Create a bounding box. No validation is performed; see [`BBox::defect`].
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Center point `(x, y)`.
    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Euclidean distance between the centers of two boxes.
    pub fn center_distance(&self, other: &BBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Area of the overlap between two boxes (0 when disjoint).
    pub fn intersection_area(&self, other: &BBox) -> f64 {
        let w = self.x1.min(other.x1) - self.x0.max(other.x0);
        let h = self.y1.min(other.y1) - self.y0.max(other.y0);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Intersection over union.
    pub fn iou(&self, other: &BBox) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= f64::EPSILON {
            0.0
        } else {
            inter / union
        }
    }

    /// Whether the point lies inside the box (edges inclusive).
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }

    /// Returns the defect that makes this box unusable, if any.
    pub fn defect(&self) -> Option<ZoneDefect> {
        if ![self.x0, self.y0, self.x1, self.y1]
            .iter()
            .all(|v| v.is_finite())
        {
            return Some(ZoneDefect::NonFinite);
        }
        if self.x0 >= self.x1 || self.y0 >= self.y1 {
            return Some(ZoneDefect::Inverted {
                x0: self.x0,
                y0: self.y0,
                x1: self.x1,
                y1: self.y1,
            });
        }
        None
    }
}

/// Stable zone identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(String);

impl ZoneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Conventional id for the `index`-th zone an adapter emits on a page.
    pub fn for_adapter(adapter: &str, page: u32, index: usize) -> Self {
        Self(format!("{}:p{}:{}", adapter, page, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ZoneId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Open string-keyed metadata attached to a zone.
///
/// Entries may be added but never replaced or removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneMetadata(BTreeMap<String, Value>);

impl ZoneMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add an entry if the key is absent. Returns whether it was added.
    pub fn extend(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if self.0.contains_key(&key) {
            return false;
        }
        self.0.insert(key, value.into());
        true
    }

    /// Append values to an array entry, skipping ones already present.
    ///
    /// Creates the array when the key is absent. A non-array entry under the
    /// same key is left untouched and `false` is returned.
    pub fn append_unique(&mut self, key: &str, values: impl IntoIterator<Item = Value>) -> bool {
        let entry = self
            .0
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => {
                for value in values {
                    if !items.contains(&value) {
                        items.push(value);
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// String elements of an array entry.
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Role of a zone in split-pair merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ZoneRole {
    /// A content region (formula body, table body...).
    Content,
    /// A short label or number region.
    Label,
    /// Neither; never paired.
    Other,
}

/// Maps adapter class labels to pairing roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleVocabulary {
    /// Class-label prefixes denoting label/number regions.
    pub label_prefixes: Vec<String>,
    /// Class-label prefixes denoting content regions.
    pub content_prefixes: Vec<String>,
    /// Exact class labels treated as labels.
    pub label_classes: Vec<String>,
    /// Exact class labels treated as content.
    pub content_classes: Vec<String>,
}

impl Default for RoleVocabulary {
    fn default() -> Self {
        Self {
            label_prefixes: vec!["label-".to_string()],
            content_prefixes: vec!["content-".to_string()],
            label_classes: Vec::new(),
            content_classes: Vec::new(),
        }
    }
}

impl RoleVocabulary {
    /// Role for a class label. Exact matches win over prefixes; label wins
    /// over content when both match.
    pub fn role_of(&self, class_label: &str) -> ZoneRole {
        if self.label_classes.iter().any(|c| c == class_label) {
            return ZoneRole::Label;
        }
        if self.content_classes.iter().any(|c| c == class_label) {
            return ZoneRole::Content;
        }
        if self
            .label_prefixes
            .iter()
            .any(|p| class_label.starts_with(p.as_str()))
        {
            return ZoneRole::Label;
        }
        if self
            .content_prefixes
            .iter()
            .any(|p| class_label.starts_with(p.as_str()))
        {
            return ZoneRole::Content;
        }
        ZoneRole::Other
    }
}

/// Object type reported downstream of reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    Equation,
    Table,
    Figure,
    Text,
    Label,
    Other(String),
}

impl ZoneKind {
    /// Derive the object type from a normalized class label.
    pub fn from_class_label(class_label: &str) -> Self {
        let lower = class_label.to_lowercase();
        if lower.starts_with("label") {
            ZoneKind::Label
        } else if lower.contains("formula") || lower.contains("equation") {
            ZoneKind::Equation
        } else if lower.contains("table") {
            ZoneKind::Table
        } else if lower.contains("figure") || lower.contains("picture") || lower.contains("image") {
            ZoneKind::Figure
        } else if ["text", "paragraph", "title", "heading", "list"]
            .iter()
            .any(|k| lower.contains(k))
        {
            ZoneKind::Text
        } else {
            ZoneKind::Other(lower)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ZoneKind::Equation => "equation",
            ZoneKind::Table => "table",
            ZoneKind::Figure => "figure",
            ZoneKind::Text => "text",
            ZoneKind::Label => "label",
            ZoneKind::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, bounding-boxed detection candidate on one page.
///
/// Fields are fixed at creation; only metadata can grow, and only inside this
/// crate (adapters attach metadata with [`Zone::with_metadata`] while building).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    id: ZoneId,
    page: u32,
    bbox: BBox,
    class_label: String,
    confidence: f64,
    source_adapter: String,
    #[serde(default, skip_serializing_if = "ZoneMetadata::is_empty")]
    metadata: ZoneMetadata,
}

impl Zone {
    /// Create a new zone.
    pub fn new(
        id: impl Into<ZoneId>,
        page: u32,
        bbox: BBox,
        class_label: impl Into<String>,
        confidence: f64,
        source_adapter: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            page,
            bbox,
            class_label: class_label.into(),
            confidence,
            source_adapter: source_adapter.into(),
            metadata: ZoneMetadata::new(),
        }
    }

    /// Add metadata entry while building the zone.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.extend(key, value);
        self
    }

    pub fn id(&self) -> &ZoneId {
        &self.id
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn bbox(&self) -> &BBox {
        &self.bbox
    }

    pub fn class_label(&self) -> &str {
        &self.class_label
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn source_adapter(&self) -> &str {
        &self.source_adapter
    }

    pub fn metadata(&self) -> &ZoneMetadata {
        &self.metadata
    }

    pub fn kind(&self) -> ZoneKind {
        ZoneKind::from_class_label(&self.class_label)
    }

    /// Every adapter that reported this object, including `source_adapter`.
    pub fn source_adapters(&self) -> Vec<String> {
        let mut adapters = self.metadata.string_list(keys::SOURCE_ADAPTERS);
        if !adapters.iter().any(|a| a == &self.source_adapter) {
            adapters.push(self.source_adapter.clone());
        }
        adapters.sort();
        adapters
    }

    /// Check that the zone can be compared numerically.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let defect = self.bbox.defect().or_else(|| {
            let c = self.confidence;
            (!c.is_finite() || !(0.0..=1.0).contains(&c))
                .then_some(ZoneDefect::ConfidenceOutOfRange(c))
        });
        match defect {
            None => Ok(()),
            Some(defect) => Err(GeometryError {
                zone_id: self.id.to_string(),
                page: self.page,
                adapter: self.source_adapter.clone(),
                defect,
            }),
        }
    }

    /// Produce a new zone with extended metadata; `self` is consumed, never mutated in place
    /// by callers outside reconciliation.
    pub(crate) fn extended(mut self, f: impl FnOnce(&mut ZoneMetadata)) -> Zone {
        f(&mut self.metadata);
        self
    }
}
