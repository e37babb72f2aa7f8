//! Text extraction scoped to a region.

use crate::types::BBox;

/// Source of text for a page region.
///
/// Used to read the identifying token of a label zone once its type is known
/// from the adapter's class. Small regions are unreliable for classifying what
/// a zone is, but adequate for reading a short number.
pub trait LabelTextSource: Send + Sync {
    /// Text inside `bbox` on `page`, or `None` when nothing is extractable.
    fn text_in(&self, page: u32, bbox: &BBox) -> Option<String>;
}

/// A text source that never returns text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoText;

impl LabelTextSource for NoText {
    fn text_in(&self, _page: u32, _bbox: &BBox) -> Option<String> {
        None
    }
}
