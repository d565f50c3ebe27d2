//! Output schema registry: the single source of truth for valid answer shapes.
//!
//! Two shapes exist:
//!
//! - [`SchemaKind::Plain`]: `{ answer_markdown }`
//! - [`SchemaKind::WithAssumptions`]: `{ answer_markdown, assumptions[] }`
//!
//! Each [`OutputSchema`] carries a fixed field set. It produces the JSON Schema
//! document sent to the provider, checks in-flight snapshots leniently
//! ([`OutputSchema::check_partial`]) and validates the completed value strictly
//! ([`OutputSchema::finalize`]). Nothing is coerced: a value that does not fit
//! is a [`SchemaViolation`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SchemaViolation;

/// Which output shape a request targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    #[default]
    Plain,
    WithAssumptions,
}

impl SchemaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::WithAssumptions => "with_assumptions",
        }
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "with_assumptions" | "with-assumptions" => Ok(Self::WithAssumptions),
            other => Err(format!(
                "unknown schema kind '{other}' (expected 'plain' or 'with_assumptions')"
            )),
        }
    }
}

/// Provenance tag for a claim made in an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssumptionSource {
    /// Taken from the offering memorandum
    Om,
    /// Industry norms or market data
    Industry,
    /// A blend of both
    Mixed,
}

impl AssumptionSource {
    pub const ALL: [AssumptionSource; 3] = [Self::Om, Self::Industry, Self::Mixed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Om => "om",
            Self::Industry => "industry",
            Self::Mixed => "mixed",
        }
    }

    /// Exact, case-sensitive match against the wire values.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

/// A claim the answer relies on, with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assumption {
    pub text: String,
    pub source: AssumptionSource,
    #[serde(default)]
    pub citation: Option<String>,
}

/// A completed, fully validated answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer_markdown: String,

    /// Always empty for the plain schema.
    #[serde(default)]
    pub assumptions: Vec<Assumption>,
}

/// An assumption as seen mid-stream: every member may still be missing or
/// incomplete, and `source` stays raw text until the value is finalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialAssumption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
}

/// A snapshot of the answer while it is being generated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialAnswer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assumptions: Option<Vec<PartialAssumption>>,
}

impl PartialAnswer {
    /// The markdown generated so far (empty before the field starts).
    pub fn answer_text(&self) -> &str {
        self.answer_markdown.as_deref().unwrap_or_default()
    }
}

// ── Field sets ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    String,
    Assumptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSpec {
    name: &'static str,
    ty: FieldType,
}

const ANSWER_MARKDOWN: FieldSpec = FieldSpec {
    name: "answer_markdown",
    ty: FieldType::String,
};

const ASSUMPTIONS: FieldSpec = FieldSpec {
    name: "assumptions",
    ty: FieldType::Assumptions,
};

const PLAIN_FIELDS: &[FieldSpec] = &[ANSWER_MARKDOWN];
const WITH_ASSUMPTIONS_FIELDS: &[FieldSpec] = &[ANSWER_MARKDOWN, ASSUMPTIONS];

const ASSUMPTION_KEYS: [&str; 3] = ["text", "source", "citation"];

const ASSUMPTIONS_INSTRUCTIONS: &str = "\
Alongside the answer, list every assumption your guidance relies on in `assumptions`.
For each assumption:
- `text`: the assumption in one sentence.
- `source`: \"om\" if it comes from the offering memorandum or project record, \"industry\" if it reflects market or industry norms, \"mixed\" if it combines both.
- `citation`: where the figure comes from, or null when there is nothing specific to cite.
Return an empty list when the answer makes no assumptions.";

/// A resolved output schema with a fixed field set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSchema {
    kind: SchemaKind,
    fields: &'static [FieldSpec],
}

/// Resolve the schema for a kind. Resolution is total: every kind has exactly
/// one schema.
pub fn resolve_schema(kind: SchemaKind) -> OutputSchema {
    let fields = match kind {
        SchemaKind::Plain => PLAIN_FIELDS,
        SchemaKind::WithAssumptions => WITH_ASSUMPTIONS_FIELDS,
    };
    OutputSchema { kind, fields }
}

impl OutputSchema {
    pub fn kind(&self) -> SchemaKind {
        self.kind
    }

    /// Stable schema name, used as the provider-side schema/tool identifier.
    pub fn name(&self) -> &'static str {
        match self.kind {
            SchemaKind::Plain => "field_answer",
            SchemaKind::WithAssumptions => "field_answer_with_assumptions",
        }
    }

    /// One-line description sent alongside the schema.
    pub fn description(&self) -> &'static str {
        match self.kind {
            SchemaKind::Plain => "A markdown answer about a loan application form field.",
            SchemaKind::WithAssumptions => {
                "A markdown answer about a loan application form field, with the assumptions it relies on."
            }
        }
    }

    /// Names of the top-level fields, in declaration order.
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    /// Extra system-prompt text describing how to fill the schema, if any.
    pub fn instructions(&self) -> Option<&'static str> {
        match self.kind {
            SchemaKind::Plain => None,
            SchemaKind::WithAssumptions => Some(ASSUMPTIONS_INSTRUCTIONS),
        }
    }

    /// The JSON Schema document constraining provider output.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in self.fields {
            properties.insert(field.name.to_string(), field_json_schema(field.ty));
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.field_names(),
            "additionalProperties": false,
        })
    }

    /// Check an in-flight snapshot against the field set.
    ///
    /// Incomplete values are fine: missing fields, missing assumption members
    /// and not-yet-valid `source` text are all accepted. Only definitive
    /// violations fail: a non-object root, a complete key outside the field
    /// set, or a value of the wrong JSON type.
    pub fn check_partial(&self, value: &Value) -> Result<PartialAnswer, SchemaViolation> {
        let object = as_object(value, "<root>")?;
        let mut partial = PartialAnswer::default();

        for (key, value) in object {
            match self.field(key)?.ty {
                FieldType::String => {
                    partial.answer_markdown = Some(expect_string(value, key)?.to_string());
                }
                FieldType::Assumptions => {
                    let items = expect_array(value, key)?;
                    let mut assumptions = Vec::with_capacity(items.len());
                    for (index, item) in items.iter().enumerate() {
                        assumptions.push(partial_assumption(item, index)?);
                    }
                    partial.assumptions = Some(assumptions);
                }
            }
        }

        Ok(partial)
    }

    /// Strictly validate a completed value and convert it to an [`AnswerResult`].
    pub fn finalize(&self, value: &Value) -> Result<AnswerResult, SchemaViolation> {
        let object = as_object(value, "<root>")?;

        for key in object.keys() {
            self.field(key)?;
        }

        let mut result = AnswerResult::default();
        for field in self.fields {
            let value = object.get(field.name).ok_or_else(|| SchemaViolation::MissingField {
                schema: self.name(),
                field: field.name.to_string(),
            })?;
            match field.ty {
                FieldType::String => {
                    result.answer_markdown = expect_string(value, field.name)?.to_string();
                }
                FieldType::Assumptions => {
                    let items = expect_array(value, field.name)?;
                    for (index, item) in items.iter().enumerate() {
                        result.assumptions.push(complete_assumption(item, index)?);
                    }
                }
            }
        }

        Ok(result)
    }

    fn field(&self, key: &str) -> Result<&'static FieldSpec, SchemaViolation> {
        self.fields
            .iter()
            .find(|f| f.name == key)
            .ok_or_else(|| SchemaViolation::UnknownField {
                schema: self.name(),
                field: key.to_string(),
            })
    }
}

fn field_json_schema(ty: FieldType) -> Value {
    match ty {
        FieldType::String => serde_json::json!({
            "type": "string",
            "description": "The answer, formatted as markdown with bolded key points and bullet lists for actionable items.",
        }),
        FieldType::Assumptions => serde_json::json!({
            "type": "array",
            "items": {
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "source": {
                        "type": "string",
                        "enum": AssumptionSource::ALL.map(|s| s.as_str()),
                    },
                    "citation": { "type": ["string", "null"] },
                },
                "required": ASSUMPTION_KEYS,
                "additionalProperties": false,
            },
        }),
    }
}

fn as_object<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>, SchemaViolation> {
    value.as_object().ok_or_else(|| SchemaViolation::WrongType {
        field: field.to_string(),
        expected: "an object",
    })
}

fn expect_string<'a>(value: &'a Value, field: &str) -> Result<&'a str, SchemaViolation> {
    value.as_str().ok_or_else(|| SchemaViolation::WrongType {
        field: field.to_string(),
        expected: "a string",
    })
}

fn expect_array<'a>(value: &'a Value, field: &str) -> Result<&'a Vec<Value>, SchemaViolation> {
    value.as_array().ok_or_else(|| SchemaViolation::WrongType {
        field: field.to_string(),
        expected: "an array",
    })
}

fn assumption_member(index: usize, key: &str) -> String {
    format!("assumptions[{index}].{key}")
}

/// Optional string member: `null` and absence both mean "no value".
fn optional_string(value: Option<&Value>, field: impl FnOnce() -> String) -> Result<Option<String>, SchemaViolation> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(SchemaViolation::WrongType {
            field: field(),
            expected: "a string or null",
        }),
    }
}

fn check_assumption_keys(object: &Map<String, Value>, index: usize) -> Result<(), SchemaViolation> {
    match object.keys().find(|k| !ASSUMPTION_KEYS.contains(&k.as_str())) {
        Some(unknown) => Err(SchemaViolation::UnknownField {
            schema: "assumption",
            field: assumption_member(index, unknown),
        }),
        None => Ok(()),
    }
}

fn partial_assumption(item: &Value, index: usize) -> Result<PartialAssumption, SchemaViolation> {
    let object = as_object(item, &format!("assumptions[{index}]"))?;
    check_assumption_keys(object, index)?;

    let text = match object.get("text") {
        Some(v) => Some(expect_string(v, &assumption_member(index, "text"))?.to_string()),
        None => None,
    };
    let source = match object.get("source") {
        Some(v) => Some(expect_string(v, &assumption_member(index, "source"))?.to_string()),
        None => None,
    };
    let citation = optional_string(object.get("citation"), || assumption_member(index, "citation"))?;

    Ok(PartialAssumption {
        text,
        source,
        citation,
    })
}

fn complete_assumption(item: &Value, index: usize) -> Result<Assumption, SchemaViolation> {
    let object = as_object(item, &format!("assumptions[{index}]"))?;
    check_assumption_keys(object, index)?;

    let required = |key: &str| {
        object.get(key).ok_or_else(|| SchemaViolation::MissingField {
            schema: "assumption",
            field: assumption_member(index, key),
        })
    };

    let text = expect_string(required("text")?, &assumption_member(index, "text"))?.to_string();
    let raw_source = expect_string(required("source")?, &assumption_member(index, "source"))?;
    let source = AssumptionSource::parse(raw_source).ok_or_else(|| SchemaViolation::InvalidSource {
        index,
        value: raw_source.to_string(),
    })?;
    let citation = optional_string(object.get("citation"), || assumption_member(index, "citation"))?;

    Ok(Assumption {
        text,
        source,
        citation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_schema_document() {
        let schema = resolve_schema(SchemaKind::Plain);
        let doc = schema.json_schema();
        assert_eq!(doc["required"], json!(["answer_markdown"]));
        assert_eq!(doc["additionalProperties"], json!(false));
        assert!(doc["properties"]["assumptions"].is_null());
        assert!(schema.instructions().is_none());
    }

    #[test]
    fn assumptions_schema_document() {
        let schema = resolve_schema(SchemaKind::WithAssumptions);
        let doc = schema.json_schema();
        assert_eq!(doc["required"], json!(["answer_markdown", "assumptions"]));
        let source = &doc["properties"]["assumptions"]["items"]["properties"]["source"];
        assert_eq!(source["enum"], json!(["om", "industry", "mixed"]));
        assert!(schema.instructions().unwrap().contains("\"industry\""));
    }

    #[test]
    fn finalize_plain() {
        let schema = resolve_schema(SchemaKind::Plain);
        let result = schema
            .finalize(&json!({"answer_markdown": "**Request $5M**"}))
            .unwrap();
        assert_eq!(result.answer_markdown, "**Request $5M**");
        assert!(result.assumptions.is_empty());
    }

    #[test]
    fn plain_rejects_assumptions_field() {
        let schema = resolve_schema(SchemaKind::Plain);
        let err = schema
            .finalize(&json!({"answer_markdown": "x", "assumptions": []}))
            .unwrap_err();
        assert!(matches!(err, SchemaViolation::UnknownField { ref field, .. } if field == "assumptions"));
    }

    #[test]
    fn finalize_with_assumptions() {
        let schema = resolve_schema(SchemaKind::WithAssumptions);
        let result = schema
            .finalize(&json!({
                "answer_markdown": "Use 70% LTV.",
                "assumptions": [
                    {"text": "Cap rate of 5.5%", "source": "industry", "citation": null},
                    {"text": "NOI of $410k", "source": "om", "citation": "OM p. 12"},
                    {"text": "Blended rent growth", "source": "mixed"}
                ]
            }))
            .unwrap();
        assert_eq!(result.assumptions.len(), 3);
        assert_eq!(result.assumptions[0].source, AssumptionSource::Industry);
        assert_eq!(result.assumptions[1].citation.as_deref(), Some("OM p. 12"));
        assert!(result.assumptions[2].citation.is_none());
    }

    #[test]
    fn empty_assumption_list_is_valid() {
        let schema = resolve_schema(SchemaKind::WithAssumptions);
        let result = schema
            .finalize(&json!({"answer_markdown": "x", "assumptions": []}))
            .unwrap();
        assert!(result.assumptions.is_empty());
    }

    #[test]
    fn missing_assumptions_rejected() {
        let schema = resolve_schema(SchemaKind::WithAssumptions);
        let err = schema.finalize(&json!({"answer_markdown": "x"})).unwrap_err();
        assert!(matches!(err, SchemaViolation::MissingField { ref field, .. } if field == "assumptions"));
    }

    #[test]
    fn invalid_source_rejected_not_coerced() {
        let schema = resolve_schema(SchemaKind::WithAssumptions);
        let err = schema
            .finalize(&json!({
                "answer_markdown": "x",
                "assumptions": [
                    {"text": "a", "source": "om"},
                    {"text": "b", "source": "Industry"}
                ]
            }))
            .unwrap_err();
        assert_eq!(
            err,
            SchemaViolation::InvalidSource {
                index: 1,
                value: "Industry".into()
            }
        );
    }

    #[test]
    fn wrong_type_rejected() {
        let schema = resolve_schema(SchemaKind::Plain);
        let err = schema.finalize(&json!({"answer_markdown": 42})).unwrap_err();
        assert!(matches!(err, SchemaViolation::WrongType { expected: "a string", .. }));

        let err = schema.finalize(&json!(["answer"])).unwrap_err();
        assert!(matches!(err, SchemaViolation::WrongType { expected: "an object", .. }));
    }

    #[test]
    fn partial_tolerates_incomplete_members() {
        let schema = resolve_schema(SchemaKind::WithAssumptions);
        let partial = schema
            .check_partial(&json!({
                "answer_markdown": "Lenders typically",
                "assumptions": [{"text": "Cap ra", "source": "indu"}]
            }))
            .unwrap();
        assert_eq!(partial.answer_text(), "Lenders typically");
        let items = partial.assumptions.unwrap();
        assert_eq!(items[0].source.as_deref(), Some("indu"));
        assert!(items[0].citation.is_none());
    }

    #[test]
    fn partial_rejects_unknown_key() {
        let schema = resolve_schema(SchemaKind::Plain);
        let err = schema
            .check_partial(&json!({"answer_markdown": "a", "confidence": 0.9}))
            .unwrap_err();
        assert!(matches!(err, SchemaViolation::UnknownField { .. }));
    }

    #[test]
    fn partial_empty_object_is_fine() {
        let schema = resolve_schema(SchemaKind::WithAssumptions);
        let partial = schema.check_partial(&json!({})).unwrap();
        assert_eq!(partial, PartialAnswer::default());
        assert_eq!(partial.answer_text(), "");
    }

    #[test]
    fn schema_kind_parsing() {
        assert_eq!("plain".parse::<SchemaKind>().unwrap(), SchemaKind::Plain);
        assert_eq!(
            "with-assumptions".parse::<SchemaKind>().unwrap(),
            SchemaKind::WithAssumptions
        );
        assert!("fancy".parse::<SchemaKind>().is_err());
        assert_eq!(SchemaKind::WithAssumptions.to_string(), "with_assumptions");
    }
}
