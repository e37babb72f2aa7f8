//! Detector that reads structure straight from the page text layer.
//!
//! Produces two kinds of zones:
//! - `label-number` for an equation-number token like `(3)` or `(2.1a)` that
//!   ends a line
//! - `text` for blocks of vertically adjacent lines
//!
//! It never produces content zones, so its labels only pair with content found
//! by another adapter.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use tessera_core::{keys, BBox, DetectResult, DetectorAdapter, PageInput, TextLayer, Word, Zone, ZoneId};

/// Class label for equation-number tokens.
pub const LABEL_NUMBER: &str = "label-number";
/// Class label for text blocks.
pub const TEXT_BLOCK: &str = "text";

static NUMBER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(\s*\d+(?:\.\d+)*[a-z]?\s*\)$").unwrap());

const LABEL_CONFIDENCE: f64 = 0.9;
const BLOCK_CONFIDENCE: f64 = 0.5;

/// Text-layer structure detector.
#[derive(Debug, Clone)]
pub struct TextStructureAdapter {
    name: String,
    /// Largest gap between lines of one block, as a multiple of line height.
    block_gap: f64,
}

impl Default for TextStructureAdapter {
    fn default() -> Self {
        Self::new("text-structure")
    }
}

impl TextStructureAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            block_gap: 1.0,
        }
    }

    pub fn with_block_gap(mut self, block_gap: f64) -> Self {
        self.block_gap = block_gap;
        self
    }

    /// Whether a token looks like an equation number.
    pub fn is_number_token(token: &str) -> bool {
        NUMBER_TOKEN.is_match(token.trim())
    }

    fn structure(&self, page: u32, layer: &TextLayer) -> Vec<Zone> {
        let words: Vec<&Word> = layer.words.iter().collect();
        let mut zones = Vec::new();
        let mut next_id = 0;
        let mut id = || {
            let id = ZoneId::for_adapter(&self.name, page, next_id);
            next_id += 1;
            id
        };

        let mut body_lines: Vec<Vec<&Word>> = Vec::new();
        for mut line in TextLayer::lines(&words) {
            if let Some(last) = line.last().copied() {
                if Self::is_number_token(&last.text) {
                    zones.push(
                        Zone::new(id(), page, last.bbox, LABEL_NUMBER, LABEL_CONFIDENCE, &self.name)
                            .with_metadata(keys::TEXT, last.text.trim()),
                    );
                    line.pop();
                }
            }
            if !line.is_empty() {
                body_lines.push(line);
            }
        }

        for block in self.blocks(body_lines) {
            let bbox = block
                .iter()
                .flatten()
                .map(|w| w.bbox)
                .reduce(|a, b| a.union(&b));
            let Some(bbox) = bbox else { continue };
            let text = block
                .iter()
                .map(|line| line.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" "))
                .collect::<Vec<_>>()
                .join("\n");
            zones.push(
                Zone::new(id(), page, bbox, TEXT_BLOCK, BLOCK_CONFIDENCE, &self.name)
                    .with_metadata(keys::TEXT, text),
            );
        }
        zones
    }

    /// Split lines into blocks wherever the vertical gap is too large.
    fn blocks<'a>(&self, lines: Vec<Vec<&'a Word>>) -> Vec<Vec<Vec<&'a Word>>> {
        let mut blocks: Vec<Vec<Vec<&Word>>> = Vec::new();
        let mut previous: Option<BBox> = None;

        for line in lines {
            let Some(extent) = line.iter().map(|w| w.bbox).reduce(|a, b| a.union(&b)) else {
                continue;
            };
            let starts_block = match previous {
                None => true,
                Some(prev) => extent.y0 - prev.y1 > self.block_gap * prev.height().max(extent.height()),
            };
            match blocks.last_mut() {
                Some(block) if !starts_block => block.push(line),
                _ => blocks.push(vec![line]),
            }
            previous = Some(extent);
        }
        blocks
    }
}

#[async_trait]
impl DetectorAdapter for TextStructureAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect(&self, page: &PageInput) -> DetectResult<Vec<Zone>> {
        Ok(self.structure(page.index, &page.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Word {
        Word::new(text, BBox::new(x0, y0, x1, y1))
    }

    fn page(words: Vec<Word>) -> PageInput {
        PageInput::new(3).with_text(TextLayer::new(words))
    }

    #[test]
    fn test_number_tokens() {
        for token in ["(3)", "(12)", "(2.1)", "(2.1a)", "( 4 )"] {
            assert!(TextStructureAdapter::is_number_token(token), "{}", token);
        }
        for token in ["3", "(x)", "(3", "[3]", "(1990-2000)"] {
            assert!(!TextStructureAdapter::is_number_token(token), "{}", token);
        }
    }

    #[tokio::test]
    async fn test_line_ending_number_becomes_label() {
        let adapter = TextStructureAdapter::default();
        let zones = adapter
            .detect(&page(vec![
                word("E", 100.0, 220.0, 110.0, 232.0),
                word("=", 115.0, 220.0, 125.0, 232.0),
                word("mc²", 130.0, 220.0, 160.0, 232.0),
                word("(4)", 420.0, 220.0, 440.0, 232.0),
            ]))
            .await
            .unwrap();

        let labels: Vec<&Zone> = zones.iter().filter(|z| z.class_label() == LABEL_NUMBER).collect();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].metadata().get_str(keys::TEXT), Some("(4)"));
        assert_eq!(labels[0].page(), 3);
        assert_eq!(labels[0].source_adapter(), "text-structure");

        let blocks: Vec<&Zone> = zones.iter().filter(|z| z.class_label() == TEXT_BLOCK).collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].metadata().get_str(keys::TEXT), Some("E = mc²"));
        assert_eq!(blocks[0].bbox(), &BBox::new(100.0, 220.0, 160.0, 232.0));
    }

    #[tokio::test]
    async fn test_mid_line_number_is_text() {
        let adapter = TextStructureAdapter::default();
        let zones = adapter
            .detect(&page(vec![
                word("see", 10.0, 10.0, 30.0, 20.0),
                word("(4)", 35.0, 10.0, 50.0, 20.0),
                word("above", 55.0, 10.0, 90.0, 20.0),
            ]))
            .await
            .unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].class_label(), TEXT_BLOCK);
    }

    #[tokio::test]
    async fn test_blocks_split_on_gap() {
        let adapter = TextStructureAdapter::default();
        let zones = adapter
            .detect(&page(vec![
                word("first", 10.0, 10.0, 50.0, 20.0),
                word("second", 10.0, 22.0, 50.0, 32.0),
                word("far", 10.0, 100.0, 50.0, 110.0),
            ]))
            .await
            .unwrap();

        let texts: Vec<&str> = zones
            .iter()
            .filter_map(|z| z.metadata().get_str(keys::TEXT))
            .collect();
        assert_eq!(texts, vec!["first\nsecond", "far"]);
        let ids: Vec<&str> = zones.iter().map(|z| z.id().as_str()).collect();
        assert_eq!(ids, vec!["text-structure:p3:0", "text-structure:p3:1"]);
    }

    #[test]
    fn test_empty_text_layer_yields_no_zones() {
        let adapter = TextStructureAdapter::default();
        let zones = tokio_test::block_on(adapter.detect(&PageInput::new(0))).unwrap();
        assert!(zones.is_empty());
    }
}
