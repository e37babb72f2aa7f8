//! In-text references to equations, tables and figures.
//!
//! Mentions such as `Eq. (3)`, `Equation 3`, `Table 2`, `Fig. 1` are found
//! with regexes and resolved against extraction records: equations by their
//! `equation_number`, tables and figures by their 1-based order in the
//! document.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use tessera_core::Record;

static EQUATION_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:Eqs?\.|Equations?)\s*\(?\s*(\d+(?:\.\d+)*[a-z]?)\s*\)?").unwrap()
});
static TABLE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bTables?\s+(\d+)\b").unwrap());
static FIGURE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:Figs?\.|Figures?)\s*(\d+)\b").unwrap());

/// What a mention points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReferenceKind {
    Equation,
    Table,
    Figure,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equation => "equation",
            Self::Table => "table",
            Self::Figure => "figure",
        }
    }

    /// Relationship-graph edge type for a mention of this kind.
    pub fn edge_type(&self) -> &'static str {
        match self {
            Self::Equation => "cites_equation",
            Self::Table => "cites_table",
            Self::Figure => "cites_figure",
        }
    }
}

/// One reference found in a text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub kind: ReferenceKind,
    /// Equation number or table/figure ordinal as written.
    pub key: String,
    /// Byte range of the whole mention.
    pub start: usize,
    pub end: usize,
}

/// Every mention in `text`, in order of appearance.
pub fn find_mentions(text: &str) -> Vec<Mention> {
    let patterns: [(ReferenceKind, &Regex); 3] = [
        (ReferenceKind::Equation, &*EQUATION_REF),
        (ReferenceKind::Table, &*TABLE_REF),
        (ReferenceKind::Figure, &*FIGURE_REF),
    ];

    let mut mentions: Vec<Mention> = patterns
        .iter()
        .flat_map(|(kind, re)| {
            re.captures_iter(text).filter_map(move |caps| {
                let whole = caps.get(0)?;
                let key = caps.get(1)?;
                Some(Mention {
                    kind: *kind,
                    key: key.as_str().to_string(),
                    start: whole.start(),
                    end: whole.end(),
                })
            })
        })
        .collect();
    mentions.sort_by_key(|m| (m.start, m.kind));
    mentions
}

/// Lookup from mention keys to extraction object ids.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    equations: HashMap<String, String>,
    tables: Vec<String>,
    figures: Vec<String>,
}

impl ReferenceIndex {
    /// Index extraction records, which must be in document order.
    pub fn from_records(records: &[Record]) -> Self {
        let mut index = Self::default();
        for record in records {
            let Some(id) = record.get("id").and_then(Value::as_str) else {
                continue;
            };
            match record.get("type").and_then(Value::as_str) {
                Some("equation") => {
                    if let Some(number) = record.get("equation_number").and_then(Value::as_str) {
                        if let Some(existing) = index.equations.get(number) {
                            debug!(number, kept = %existing, ignored = id, "duplicate equation number");
                        } else {
                            index.equations.insert(number.to_string(), id.to_string());
                        }
                    }
                }
                Some("table") => index.tables.push(id.to_string()),
                Some("figure") => index.figures.push(id.to_string()),
                _ => {}
            }
        }
        index
    }

    /// Object id a mention refers to.
    pub fn resolve(&self, mention: &Mention) -> Option<&str> {
        match mention.kind {
            ReferenceKind::Equation => self.equations.get(&mention.key).map(String::as_str),
            ReferenceKind::Table => ordinal(&self.tables, &mention.key),
            ReferenceKind::Figure => ordinal(&self.figures, &mention.key),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty() && self.tables.is_empty() && self.figures.is_empty()
    }
}

fn ordinal<'a>(ids: &'a [String], key: &str) -> Option<&'a str> {
    let n: usize = key.parse().ok()?;
    ids.get(n.checked_sub(1)?).map(String::as_str)
}
