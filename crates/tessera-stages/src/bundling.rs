//! Stage 2: semantic bundling.
//!
//! Text objects of each page are joined into one page text and cut into
//! chunks of bounded size at whitespace. Each chunk lists the extraction
//! objects it mentions (`citations`, possibly empty), and every mention is
//! recorded on the document's relationship graph.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use tessera_core::contract::catalog;
use tessera_core::{
    Payload, Record, Stage, StageContext, StageContract, StageError, StageInput, StageOutput,
    StageReport, RELATIONSHIP_GRAPH,
};

use crate::graph::RelationshipGraph;
use crate::references::{find_mentions, ReferenceIndex};

const PARAGRAPH_BREAK: &str = "\n\n";

/// Chunker and reference resolver over extraction output.
pub struct BundlingStage {
    contract: StageContract,
}

impl Default for BundlingStage {
    fn default() -> Self {
        Self::new()
    }
}

impl BundlingStage {
    pub fn new() -> Self {
        Self {
            contract: catalog::bundling(),
        }
    }
}

/// A `[start, end)` span of a page text, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

/// Cut `text` into spans of at most `max_chars` characters.
///
/// Cuts prefer a line break in the second half of the window, then any
/// whitespace, and fall back to a hard cut. Spans never start or end with
/// whitespace.
pub fn chunk_spans(text: &str, max_chars: usize) -> Vec<CharSpan> {
    let chars: Vec<char> = text.chars().collect();
    let max_chars = max_chars.max(1);
    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        while start < chars.len() && chars[start].is_whitespace() {
            start += 1;
        }
        if start >= chars.len() {
            break;
        }

        let limit = (start + max_chars).min(chars.len());
        let mut end = if limit == chars.len() {
            limit
        } else {
            let window = start + 1..=limit;
            let half = start + max_chars / 2;
            window
                .clone()
                .rev()
                .find(|&i| i > half && chars[i] == '\n')
                .or_else(|| window.rev().find(|&i| chars[i].is_whitespace()))
                .unwrap_or(limit)
        };
        while end > start && chars[end - 1].is_whitespace() {
            end -= 1;
        }
        spans.push(CharSpan { start, end });
        start = end;
    }
    spans
}

/// Page text built from a page's text objects.
struct PageText {
    page: u64,
    text: String,
    /// Object id and character span of each text object in `text`.
    objects: Vec<(String, CharSpan)>,
}

fn page_texts(records: &[Record]) -> Vec<PageText> {
    let mut pages: BTreeMap<u64, PageText> = BTreeMap::new();
    for record in records {
        if record.get("type").and_then(Value::as_str) != Some("text") {
            continue;
        }
        let (Some(id), Some(page), Some(content)) = (
            record.get("id").and_then(Value::as_str),
            record.get("page").and_then(Value::as_u64),
            record.get("content").and_then(Value::as_str),
        ) else {
            continue;
        };
        if content.trim().is_empty() {
            continue;
        }

        let entry = pages.entry(page).or_insert_with(|| PageText {
            page,
            text: String::new(),
            objects: Vec::new(),
        });
        if !entry.text.is_empty() {
            entry.text.push_str(PARAGRAPH_BREAK);
        }
        let start = entry.text.chars().count();
        entry.text.push_str(content);
        let end = start + content.chars().count();
        entry.objects.push((id.to_string(), CharSpan { start, end }));
    }
    pages.into_values().collect()
}

fn slice_chars(text: &str, span: CharSpan) -> String {
    text.chars().skip(span.start).take(span.end - span.start).collect()
}

#[async_trait]
impl Stage for BundlingStage {
    fn name(&self) -> &str {
        catalog::BUNDLING
    }

    fn output_contract(&self) -> &StageContract {
        &self.contract
    }

    async fn run(&self, input: StageInput<'_>, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let objects = &input.require_previous(catalog::BUNDLING)?.records;
        let document_id = input.document.id.as_str();
        let max_chars = ctx.config.bundling.max_chunk_chars;
        let index = ReferenceIndex::from_records(objects);
        let mut report = StageReport::default();

        let mut graph = RelationshipGraph::new();
        for object in objects {
            if let (Some(id), Some(kind)) = (
                object.get("id").and_then(Value::as_str),
                object.get("type").and_then(Value::as_str),
            ) {
                let page = object.get("page").and_then(Value::as_u64).unwrap_or(0);
                graph.add_node(id, kind, page);
            }
        }

        let mut chunks: Vec<Record> = Vec::new();
        for page in page_texts(objects) {
            for (n, span) in chunk_spans(&page.text, max_chars).into_iter().enumerate() {
                let chunk_id = format!("{}:p{}:c{}", document_id, page.page, n);
                let text = slice_chars(&page.text, span);
                graph.add_node(chunk_id.as_str(), "chunk", page.page);

                let mut citations: Vec<String> = Vec::new();
                for mention in find_mentions(&text) {
                    report.add("mentions", 1);
                    match index.resolve(&mention) {
                        Some(target) => {
                            graph.add_mention(&chunk_id, target, mention.kind.edge_type());
                            if !citations.iter().any(|c| c == target) {
                                citations.push(target.to_string());
                            }
                        }
                        None => {
                            report.add("unresolved_references", 1);
                            debug!(
                                chunk = %chunk_id,
                                kind = mention.kind.as_str(),
                                key = %mention.key,
                                "reference does not resolve to an extracted object"
                            );
                        }
                    }
                }

                let sources: Vec<&str> = page
                    .objects
                    .iter()
                    .filter(|(_, s)| s.start < span.end && span.start < s.end)
                    .map(|(id, _)| id.as_str())
                    .collect();

                let mut chunk = Record::new();
                chunk.insert("id".into(), json!(chunk_id));
                chunk.insert("document_id".into(), json!(document_id));
                chunk.insert("page".into(), json!(page.page));
                chunk.insert("char_start".into(), json!(span.start));
                chunk.insert("char_end".into(), json!(span.end));
                chunk.insert("text".into(), json!(text));
                chunk.insert("citations".into(), json!(citations));
                chunk.insert("source_objects".into(), json!(sources));
                chunks.push(chunk);
            }
        }

        report.add("chunks", chunks.len() as u64);
        report.add("graph_edges", graph.edge_count() as u64);
        info!(
            run_id = ctx.run_id,
            document = %document_id,
            chunks = chunks.len(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "bundling finished"
        );

        let payload = Payload::new(chunks).with_artifact(RELATIONSHIP_GRAPH, graph.to_value());
        Ok(StageOutput::new(payload).with_report(report))
    }
}
