//! Document input: rendered pages plus their text layer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::traits::LabelTextSource;
use crate::types::BBox;

/// Opaque handle to a rendered page image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum PageImage {
    /// No raster available (text-layer-only adapters still work).
    #[default]
    None,
    /// Image on disk.
    Path(PathBuf),
    /// In-memory encoded image.
    Bytes(Vec<u8>),
}

/// A positioned word from the page's text layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub bbox: BBox,
}

impl Word {
    pub fn new(text: impl Into<String>, bbox: BBox) -> Self {
        Self {
            text: text.into(),
            bbox,
        }
    }
}

/// Words of one page in the same coordinate space as zone bboxes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextLayer {
    #[serde(default)]
    pub words: Vec<Word>,
}

impl TextLayer {
    pub fn new(words: Vec<Word>) -> Self {
        Self { words }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Words whose center lies inside `bbox`.
    pub fn words_in(&self, bbox: &BBox) -> Vec<&Word> {
        self.words
            .iter()
            .filter(|w| {
                let (x, y) = w.bbox.center();
                bbox.contains_point(x, y)
            })
            .collect()
    }

    /// Group words into lines, top to bottom, each line left to right.
    ///
    /// A word joins the current line when its vertical center falls within
    /// the line's first word's vertical extent.
    pub fn lines<'a>(words: &[&'a Word]) -> Vec<Vec<&'a Word>> {
        let mut sorted: Vec<&Word> = words.to_vec();
        sorted.sort_by(|a, b| {
            a.bbox
                .center()
                .1
                .total_cmp(&b.bbox.center().1)
                .then(a.bbox.x0.total_cmp(&b.bbox.x0))
        });

        let mut lines: Vec<Vec<&Word>> = Vec::new();
        for word in sorted {
            let (_, cy) = word.bbox.center();
            match lines.last_mut() {
                Some(line) if cy >= line[0].bbox.y0 && cy <= line[0].bbox.y1 => line.push(word),
                _ => lines.push(vec![word]),
            }
        }
        for line in &mut lines {
            line.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
        }
        lines
    }

    /// Text inside `bbox` in reading order, or `None` when empty.
    pub fn text_in(&self, bbox: &BBox) -> Option<String> {
        let words = self.words_in(bbox);
        let text = Self::lines(&words)
            .iter()
            .map(|line| {
                line.iter()
                    .map(|w| w.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join(" ");
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl LabelTextSource for TextLayer {
    fn text_in(&self, _page: u32, bbox: &BBox) -> Option<String> {
        TextLayer::text_in(self, bbox)
    }
}

/// One rendered page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInput {
    /// 0-based page index.
    pub index: u32,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub image: PageImage,
    #[serde(default)]
    pub text: TextLayer,
}

impl PageInput {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_text(mut self, text: TextLayer) -> Self {
        self.text = text;
        self
    }

    pub fn with_image(mut self, image: PageImage) -> Self {
        self.image = image;
        self
    }
}

/// A document entering the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentInput {
    pub id: String,
    /// Where the document was rendered from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub pages: Vec<PageInput>,
}

impl DocumentInput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: None,
            pages: Vec::new(),
        }
    }

    pub fn with_page(mut self, page: PageInput) -> Self {
        self.pages.push(page);
        self
    }

    pub fn page(&self, index: u32) -> Option<&PageInput> {
        self.pages.iter().find(|p| p.index == index)
    }

    /// Load a document description from a JSON file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::CoreResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl LabelTextSource for DocumentInput {
    fn text_in(&self, page: u32, bbox: &BBox) -> Option<String> {
        self.page(page).and_then(|p| p.text.text_in(bbox))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Word {
        Word::new(text, BBox::new(x0, y0, x1, y1))
    }

    #[test]
    fn test_text_in_reading_order() {
        let layer = TextLayer::new(vec![
            word("world", 60.0, 10.0, 100.0, 20.0),
            word("second", 10.0, 30.0, 50.0, 40.0),
            word("hello", 10.0, 11.0, 50.0, 21.0),
        ]);
        let text = layer.text_in(&BBox::new(0.0, 0.0, 200.0, 50.0));
        assert_eq!(text.as_deref(), Some("hello world second"));
    }

    #[test]
    fn test_text_in_scoped_to_bbox() {
        let layer = TextLayer::new(vec![
            word("E", 10.0, 10.0, 40.0, 20.0),
            word("(3)", 410.0, 10.0, 440.0, 20.0),
        ]);
        let text = layer.text_in(&BBox::new(400.0, 0.0, 450.0, 30.0));
        assert_eq!(text.as_deref(), Some("(3)"));
        assert!(layer.text_in(&BBox::new(200.0, 0.0, 300.0, 30.0)).is_none());
    }

    #[test]
    fn test_document_text_source_by_page() {
        let doc = DocumentInput::new("doc").with_page(
            PageInput::new(2).with_text(TextLayer::new(vec![word("7", 0.0, 0.0, 5.0, 5.0)])),
        );
        let bbox = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(LabelTextSource::text_in(&doc, 2, &bbox).as_deref(), Some("7"));
        assert!(LabelTextSource::text_in(&doc, 0, &bbox).is_none());
    }

    #[test]
    fn test_document_deserializes_minimal() {
        let doc: DocumentInput =
            serde_json::from_str(r#"{"id": "paper", "pages": [{"index": 0}]}"#).unwrap();
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].image, PageImage::None);
    }
}
