use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use tessera_core::contract::catalog;
use tessera_core::{validate_all, Payload};

/// Check a records file against a named contract and print every violation.
/// Returns `true` when the file satisfies the contract.
pub fn run(input_file: &Path, stage: &str) -> Result<bool> {
    let contract = catalog::by_name(stage).ok_or_else(|| {
        let known: Vec<String> = catalog::all().iter().map(|c| c.name().to_string()).collect();
        anyhow!("unknown contract '{}'; expected one of {}", stage, known.join(", "))
    })?;
    let content = std::fs::read_to_string(input_file)
        .with_context(|| format!("failed to read {}", input_file.display()))?;
    let payload = parse_payload(&content)?;

    let violations = validate_all(&payload, &contract);
    for violation in &violations {
        println!("{}", serde_json::to_string(violation)?);
    }
    if violations.is_empty() {
        eprintln!("{} record(s) satisfy the '{}' contract", payload.len(), stage);
    } else {
        eprintln!("{} violation(s) of the '{}' contract", violations.len(), stage);
    }
    Ok(violations.is_empty())
}

/// Accept either a bare record array or a full payload object.
fn parse_payload(content: &str) -> Result<Payload> {
    let value: Value = serde_json::from_str(content).context("input is not valid JSON")?;
    match value {
        Value::Array(items) => {
            let records = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Object(record) => Ok(record),
                    _ => Err(anyhow!("record {} is not a JSON object", i)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Payload::new(records))
        }
        object @ Value::Object(_) => {
            serde_json::from_value(object).context("input object is not a payload")
        }
        _ => Err(anyhow!("expected a record array or a payload object")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record_array() {
        let payload = parse_payload(r#"[{"id": "a"}, {"id": "b"}]"#).unwrap();
        assert_eq!(payload.len(), 2);
    }

    #[test]
    fn test_parse_payload_object() {
        let payload = parse_payload(r#"{"records": [{"id": "a"}], "artifacts": {"k": 1}}"#).unwrap();
        assert_eq!(payload.len(), 1);
        assert!(payload.artifact("k").is_some());
    }

    #[test]
    fn test_rejects_non_object_record() {
        assert!(parse_payload("[1, 2]").is_err());
    }

    #[test]
    fn test_validate_reports_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.json");
        std::fs::write(&path, r#"[{"id": "c0", "document_id": "d"}]"#).unwrap();
        assert!(!run(&path, "bundling").unwrap());
        assert!(run(&path, "no-such-stage").is_err());
    }
}
