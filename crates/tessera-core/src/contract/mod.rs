//! Stage contracts and the contract validator.
//!
//! A contract lists, in order, the fields every output record of a stage must
//! carry and the rule each value must satisfy. Validation is pure and
//! deterministic: the first violation reported is the one with the lowest
//! record index, then the first declared field.

pub mod catalog;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::types::{Payload, Record};

type CheckFn = dyn Fn(&Value) -> Result<(), String> + Send + Sync;

/// Predicate applied to a field value.
#[derive(Clone)]
pub enum FieldRule {
    /// Any value, including null.
    Any,
    String,
    NonEmptyString,
    /// String or null.
    NullableString,
    Bool,
    Integer,
    NonNegativeInteger,
    Number,
    /// Number in [0, 1].
    UnitInterval,
    /// Array of four finite numbers with x0 < x1 and y0 < y1.
    BBox,
    Array,
    StringArray,
    /// Object carrying at least the given keys.
    ObjectWith(Vec<String>),
    /// String equal to one of the given values.
    OneOf(Vec<String>),
    /// Named custom predicate.
    Custom { name: String, check: Arc<CheckFn> },
}

impl fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl FieldRule {
    /// Create a custom rule from a closure.
    pub fn custom(
        name: impl Into<String>,
        check: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self::Custom {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// Human-readable rule name.
    pub fn describe(&self) -> String {
        match self {
            Self::Any => "any".to_string(),
            Self::String => "string".to_string(),
            Self::NonEmptyString => "non-empty string".to_string(),
            Self::NullableString => "string or null".to_string(),
            Self::Bool => "bool".to_string(),
            Self::Integer => "integer".to_string(),
            Self::NonNegativeInteger => "non-negative integer".to_string(),
            Self::Number => "number".to_string(),
            Self::UnitInterval => "number in [0, 1]".to_string(),
            Self::BBox => "bbox [x0, y0, x1, y1]".to_string(),
            Self::Array => "array".to_string(),
            Self::StringArray => "array of strings".to_string(),
            Self::ObjectWith(keys) => format!("object with {}", keys.join(", ")),
            Self::OneOf(values) => format!("one of {}", values.join(" | ")),
            Self::Custom { name, .. } => name.clone(),
        }
    }

    /// Check a present value against the rule.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let expected = |what: &str| Err(format!("expected {}, got {}", what, type_name(value)));
        match self {
            Self::Any => Ok(()),
            Self::String => match value {
                Value::String(_) => Ok(()),
                _ => expected("string"),
            },
            Self::NonEmptyString => match value {
                Value::String(s) if !s.trim().is_empty() => Ok(()),
                Value::String(_) => Err("string is empty".to_string()),
                _ => expected("non-empty string"),
            },
            Self::NullableString => match value {
                Value::String(_) | Value::Null => Ok(()),
                _ => expected("string or null"),
            },
            Self::Bool => match value {
                Value::Bool(_) => Ok(()),
                _ => expected("bool"),
            },
            Self::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                _ => expected("integer"),
            },
            Self::NonNegativeInteger => match value {
                Value::Number(n) if n.is_u64() => Ok(()),
                Value::Number(n) if n.is_i64() => Err(format!("{} is negative", n)),
                _ => expected("non-negative integer"),
            },
            Self::Number => match value {
                Value::Number(_) => Ok(()),
                _ => expected("number"),
            },
            Self::UnitInterval => match value.as_f64() {
                Some(v) if (0.0..=1.0).contains(&v) => Ok(()),
                Some(v) => Err(format!("{} is outside [0, 1]", v)),
                None => expected("number"),
            },
            Self::BBox => check_bbox(value),
            Self::Array => match value {
                Value::Array(_) => Ok(()),
                _ => expected("array"),
            },
            Self::StringArray => match value {
                Value::Array(items) => match items.iter().position(|v| !v.is_string()) {
                    None => Ok(()),
                    Some(i) => Err(format!("element {} is {}, expected string", i, type_name(&items[i]))),
                },
                _ => expected("array of strings"),
            },
            Self::ObjectWith(keys) => match value {
                Value::Object(map) => match keys.iter().find(|k| !map.contains_key(k.as_str())) {
                    None => Ok(()),
                    Some(k) => Err(format!("object is missing key '{}'", k)),
                },
                _ => expected("object"),
            },
            Self::OneOf(values) => match value {
                Value::String(s) if values.iter().any(|v| v == s) => Ok(()),
                Value::String(s) => Err(format!("'{}' is not one of {}", s, values.join(" | "))),
                _ => expected("string"),
            },
            Self::Custom { check, .. } => check(value),
        }
    }
}

fn check_bbox(value: &Value) -> Result<(), String> {
    let items = match value {
        Value::Array(items) if items.len() == 4 => items,
        Value::Array(items) => return Err(format!("bbox has {} elements, expected 4", items.len())),
        other => return Err(format!("expected bbox array, got {}", type_name(other))),
    };
    let coords: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
    if coords.len() != 4 || coords.iter().any(|c| !c.is_finite()) {
        return Err("bbox coordinates must be finite numbers".to_string());
    }
    if coords[0] >= coords[2] || coords[1] >= coords[3] {
        return Err("bbox is inverted or empty".to_string());
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared field of a contract.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub required: bool,
    pub rule: FieldRule,
}

/// Schema a stage's output must satisfy.
#[derive(Debug, Clone)]
pub struct StageContract {
    name: String,
    fields: Vec<FieldSpec>,
    artifacts: Vec<FieldSpec>,
}

impl StageContract {
    /// Create an empty contract.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    /// Declare a required field.
    pub fn require(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push(FieldSpec {
            name: field.into(),
            required: true,
            rule,
        });
        self
    }

    /// Declare a field that is checked only when present.
    pub fn optional(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push(FieldSpec {
            name: field.into(),
            required: false,
            rule,
        });
        self
    }

    /// Declare a required payload artifact.
    pub fn require_artifact(mut self, key: impl Into<String>, rule: FieldRule) -> Self {
        self.artifacts.push(FieldSpec {
            name: key.into(),
            required: true,
            rule,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields in contract order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn artifacts(&self) -> &[FieldSpec] {
        &self.artifacts
    }

    /// Names of required fields in contract order.
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    /// Validator for a field.
    pub fn validator(&self, field: &str) -> Option<&FieldRule> {
        self.fields.iter().find(|f| f.name == field).map(|f| &f.rule)
    }
}

/// A single contract failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Index of the failing record; `None` when a payload artifact failed.
    pub record_index: Option<usize>,
    pub field: String,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record_index {
            Some(i) => write!(f, "record {}, field '{}': {}", i, self.field, self.reason),
            None => write!(f, "artifact '{}': {}", self.field, self.reason),
        }
    }
}

/// Outcome of validating records against a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Ok,
    Failed(Violation),
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Self::Ok => None,
            Self::Failed(v) => Some(v),
        }
    }
}

fn check_spec(spec: &FieldSpec, value: Option<&Value>) -> Option<String> {
    match value {
        None if spec.required => Some("required field is missing".to_string()),
        None => None,
        Some(value) => spec
            .rule
            .check(value)
            .err()
            .map(|reason| format!("{} (rule: {})", reason, spec.rule.describe())),
    }
}

fn record_violations<'a>(
    records: &'a [Record],
    contract: &'a StageContract,
) -> impl Iterator<Item = Violation> + 'a {
    records.iter().enumerate().flat_map(move |(index, record)| {
        contract.fields.iter().filter_map(move |spec| {
            check_spec(spec, record.get(&spec.name)).map(|reason| Violation {
                record_index: Some(index),
                field: spec.name.clone(),
                reason,
            })
        })
    })
}

fn artifact_violations<'a>(
    payload: &'a Payload,
    contract: &'a StageContract,
) -> impl Iterator<Item = Violation> + 'a {
    contract.artifacts.iter().filter_map(move |spec| {
        check_spec(spec, payload.artifact(&spec.name)).map(|reason| Violation {
            record_index: None,
            field: spec.name.clone(),
            reason,
        })
    })
}

/// Validate records against a contract, reporting the first violation.
pub fn validate(records: &[Record], contract: &StageContract) -> ValidationResult {
    match record_violations(records, contract).next() {
        None => ValidationResult::Ok,
        Some(v) => ValidationResult::Failed(v),
    }
}

/// Validate a whole payload: records first, then artifacts.
pub fn validate_payload(payload: &Payload, contract: &StageContract) -> ValidationResult {
    match record_violations(&payload.records, contract)
        .chain(artifact_violations(payload, contract))
        .next()
    {
        None => ValidationResult::Ok,
        Some(v) => ValidationResult::Failed(v),
    }
}

/// Every violation in a payload, in reporting order.
pub fn validate_all(payload: &Payload, contract: &StageContract) -> Vec<Violation> {
    record_violations(&payload.records, contract)
        .chain(artifact_violations(payload, contract))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record;
    use serde_json::json;

    fn contract() -> StageContract {
        StageContract::new("test")
            .require("id", FieldRule::NonEmptyString)
            .require("citations", FieldRule::StringArray)
            .optional("score", FieldRule::UnitInterval)
    }

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_valid_records() {
        let records = vec![
            rec(json!({"id": "a", "citations": []})),
            rec(json!({"id": "b", "citations": ["eq-1"], "score": 0.5})),
        ];
        assert!(validate(&records, &contract()).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let records = vec![
            rec(json!({"id": "a", "citations": []})),
            rec(json!({"id": "b"})),
        ];
        let result = validate(&records, &contract());
        let v = result.violation().unwrap();
        assert_eq!(v.record_index, Some(1));
        assert_eq!(v.field, "citations");
        assert!(v.reason.contains("missing"));
    }

    #[test]
    fn test_first_failure_is_lowest_index_then_field_order() {
        let records = vec![
            rec(json!({"id": "ok", "citations": []})),
            rec(json!({"id": "", "citations": [1]})),
            rec(json!({})),
        ];
        let v = validate(&records, &contract()).violation().cloned().unwrap();
        assert_eq!(v.record_index, Some(1));
        assert_eq!(v.field, "id");

        let all = validate_all(&Payload::new(records), &contract());
        let located: Vec<(Option<usize>, &str)> =
            all.iter().map(|v| (v.record_index, v.field.as_str())).collect();
        assert_eq!(
            located,
            vec![
                (Some(1), "id"),
                (Some(1), "citations"),
                (Some(2), "id"),
                (Some(2), "citations"),
            ]
        );
    }

    #[test]
    fn test_optional_field_checked_when_present() {
        let records = vec![rec(json!({"id": "a", "citations": [], "score": 3}))];
        let v = validate(&records, &contract()).violation().cloned().unwrap();
        assert_eq!(v.field, "score");
    }

    #[test]
    fn test_validation_is_deterministic() {
        let records = vec![rec(json!({"id": "a", "citations": "eq-1"}))];
        let first = validate(&records, &contract());
        let second = validate(&records, &contract());
        assert_eq!(first, second);
    }

    #[test]
    fn test_artifact_required() {
        let contract = StageContract::new("bundling")
            .require_artifact("graph", FieldRule::ObjectWith(vec!["nodes".into(), "edges".into()]));
        let payload = Payload::new(vec![]);
        let v = validate_payload(&payload, &contract).violation().cloned().unwrap();
        assert_eq!(v.record_index, None);
        assert_eq!(v.field, "graph");

        let payload = payload.with_artifact("graph", json!({"nodes": [], "edges": []}));
        assert!(validate_payload(&payload, &contract).is_ok());
    }

    #[test]
    fn test_field_rules() {
        assert!(FieldRule::BBox.check(&json!([0, 0, 1, 1])).is_ok());
        assert!(FieldRule::BBox.check(&json!([1, 0, 0, 1])).is_err());
        assert!(FieldRule::BBox.check(&json!([0, 0, 1])).is_err());
        assert!(FieldRule::NullableString.check(&Value::Null).is_ok());
        assert!(FieldRule::NonNegativeInteger.check(&json!(-1)).is_err());
        assert!(FieldRule::NonNegativeInteger.check(&json!(1.5)).is_err());
        assert!(FieldRule::OneOf(vec!["a".into()]).check(&json!("b")).is_err());

        let even = FieldRule::custom("even", |v| match v.as_u64() {
            Some(n) if n % 2 == 0 => Ok(()),
            _ => Err("not even".to_string()),
        });
        assert!(even.check(&json!(4)).is_ok());
        assert_eq!(even.check(&json!(3)), Err("not even".to_string()));
    }

    #[test]
    fn test_record_helper() {
        let r = record([("id", json!("x")), ("citations", json!([]))]);
        assert!(validate(&[r], &contract()).is_ok());
    }
}
