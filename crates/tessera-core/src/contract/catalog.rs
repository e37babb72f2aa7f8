//! Contracts for the built-in stages.
//!
//! Field names live here so producers and validators agree on them.

use serde_json::Value;

use super::{FieldRule, StageContract};
use crate::types::RELATIONSHIP_GRAPH;

pub const EXTRACTION: &str = "extraction";
pub const BUNDLING: &str = "bundling";
pub const LOAD: &str = "load";

/// Object kinds an extraction record may carry.
pub const OBJECT_TYPES: &[&str] = &["equation", "table", "figure", "text", "label", "other"];

/// One record per reconciled object.
pub fn extraction() -> StageContract {
    StageContract::new(EXTRACTION)
        .require("id", FieldRule::NonEmptyString)
        .require("document_id", FieldRule::NonEmptyString)
        .require(
            "type",
            FieldRule::OneOf(OBJECT_TYPES.iter().map(|t| t.to_string()).collect()),
        )
        .require("page", FieldRule::NonNegativeInteger)
        .require("bbox", FieldRule::BBox)
        .require("content", FieldRule::String)
        .require("confidence", FieldRule::UnitInterval)
        .require("source_adapters", FieldRule::StringArray)
        .require("equation_number", FieldRule::NullableString)
        .require("has_number", FieldRule::Bool)
        .require("standalone_label", FieldRule::Bool)
}

/// One record per chunk; every chunk states its citations, even when empty.
pub fn bundling() -> StageContract {
    StageContract::new(BUNDLING)
        .require("id", FieldRule::NonEmptyString)
        .require("document_id", FieldRule::NonEmptyString)
        .require("page", FieldRule::NonNegativeInteger)
        .require("char_start", FieldRule::NonNegativeInteger)
        .require("char_end", FieldRule::NonNegativeInteger)
        .require("text", FieldRule::String)
        .require("citations", FieldRule::StringArray)
        .require_artifact(RELATIONSHIP_GRAPH, relationship_graph_rule())
}

/// A single summary record per document.
pub fn load() -> StageContract {
    StageContract::new(LOAD)
        .require("document_id", FieldRule::NonEmptyString)
        .require("sink", FieldRule::NonEmptyString)
        .require("loaded", FieldRule::NonNegativeInteger)
        .require("failed", FieldRule::NonNegativeInteger)
}

/// Every built-in contract in pipeline order.
pub fn all() -> Vec<StageContract> {
    vec![extraction(), bundling(), load()]
}

/// Look up a built-in contract by stage name.
pub fn by_name(name: &str) -> Option<StageContract> {
    match name {
        EXTRACTION => Some(extraction()),
        BUNDLING => Some(bundling()),
        LOAD => Some(load()),
        _ => None,
    }
}

fn relationship_graph_rule() -> FieldRule {
    FieldRule::custom("relationship graph {nodes, edges}", |value| {
        let graph = value
            .as_object()
            .ok_or_else(|| "relationship graph must be an object".to_string())?;
        let nodes = graph
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| "relationship graph is missing a 'nodes' array".to_string())?;
        let edges = graph
            .get("edges")
            .and_then(Value::as_array)
            .ok_or_else(|| "relationship graph is missing an 'edges' array".to_string())?;

        if let Some(i) = nodes.iter().position(|n| n.get("id").and_then(Value::as_str).is_none()) {
            return Err(format!("node {} has no string 'id'", i));
        }
        for (i, edge) in edges.iter().enumerate() {
            for key in ["source", "target", "type"] {
                if edge.get(key).and_then(Value::as_str).is_none() {
                    return Err(format!("edge {} has no string '{}'", i, key));
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{validate_payload, ValidationResult};
    use crate::types::{Payload, Record};
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    fn chunk(citations: Value) -> Record {
        rec(json!({
            "id": "doc:chunk:0",
            "document_id": "doc",
            "page": 0,
            "char_start": 0,
            "char_end": 10,
            "text": "see Eq. 4.",
            "citations": citations,
        }))
    }

    #[test]
    fn test_bundling_rejects_missing_citations() {
        let mut record = chunk(json!([]));
        record.remove("citations");
        let payload = Payload::new(vec![chunk(json!(["doc:eq:4"])), record])
            .with_artifact(RELATIONSHIP_GRAPH, json!({"nodes": [], "edges": []}));

        match validate_payload(&payload, &bundling()) {
            ValidationResult::Failed(v) => {
                assert_eq!(v.record_index, Some(1));
                assert_eq!(v.field, "citations");
            }
            ValidationResult::Ok => panic!("expected a violation"),
        }
    }

    #[test]
    fn test_bundling_requires_graph_artifact() {
        let payload = Payload::new(vec![chunk(json!([]))]);
        let result = validate_payload(&payload, &bundling());
        let v = result.violation().unwrap();
        assert_eq!(v.record_index, None);
        assert_eq!(v.field, RELATIONSHIP_GRAPH);
    }

    #[test]
    fn test_graph_shape_checked() {
        let payload = Payload::new(vec![chunk(json!([]))]).with_artifact(
            RELATIONSHIP_GRAPH,
            json!({"nodes": [{"id": "a"}], "edges": [{"source": "a", "target": "b"}]}),
        );
        let result = validate_payload(&payload, &bundling());
        assert!(result.violation().unwrap().reason.contains("'type'"));
    }

    #[test]
    fn test_extraction_record() {
        let good = rec(json!({
            "id": "doc:p0:0",
            "document_id": "doc",
            "type": "equation",
            "page": 0,
            "bbox": [100.0, 200.0, 300.0, 250.0],
            "content": "E = mc^2",
            "confidence": 0.9,
            "source_adapters": ["vision"],
            "equation_number": "4",
            "has_number": true,
            "standalone_label": false,
        }));
        let mut bad = good.clone();
        bad.insert("type".into(), json!("chart"));

        assert!(validate_payload(&Payload::new(vec![good.clone()]), &extraction()).is_ok());
        let v = validate_payload(&Payload::new(vec![good, bad]), &extraction())
            .violation()
            .cloned()
            .unwrap();
        assert_eq!((v.record_index, v.field.as_str()), (Some(1), "type"));
    }

    #[test]
    fn test_by_name() {
        assert_eq!(by_name("load").unwrap().name(), LOAD);
        assert!(by_name("transform").is_none());
        assert_eq!(all().len(), 3);
    }
}
