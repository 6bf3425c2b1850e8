//! Strategic analysis validation
//!
//! Structure is enforced by a JSON Schema compiled once per process: missing
//! keys, wrong types, blank strings and empty arrays are hard errors. The
//! expected counts (2 imperatives, 2 priorities, 3 impacts) and the
//! introduction length are only checked softly and reported as warnings.

use jsonschema::JSONSchema;
use serde_json::{json, Value};
use std::ops::RangeInclusive;
use std::sync::OnceLock;

use crate::error::{ResearchError, Result};
use crate::research::types::StrategicAnalysis;
use crate::workflow_utils::{extract_json, truncate_chars};

pub const EXPECTED_IMPERATIVES: usize = 2;
pub const EXPECTED_PRIORITIES: usize = 2;
pub const EXPECTED_IMPACTS: usize = 3;
pub const INTRODUCTION_CHARS: RangeInclusive<usize> = 100..=1000;

/// Hard errors and soft warnings for one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parsed and validated step 2 output
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAnalysis {
    /// Normalized JSON text to persist
    pub json: String,
    pub analysis: StrategicAnalysis,
    pub warnings: Vec<String>,
}

fn non_empty_string() -> Value {
    json!({ "type": "string", "minLength": 1, "pattern": "\\S" })
}

fn object_of(fields: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = fields
        .iter()
        .map(|field| (field.to_string(), non_empty_string()))
        .collect();
    json!({
        "type": "object",
        "required": fields,
        "properties": properties,
    })
}

/// JSON Schema of the strategic analysis document
pub fn strategic_analysis_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": [
            "introduction",
            "strategic_imperatives",
            "ai_agent_recommendations",
            "expected_business_impact"
        ],
        "properties": {
            "introduction": non_empty_string(),
            "strategic_imperatives": {
                "type": "array",
                "minItems": 1,
                "items": object_of(&["title", "context", "ai_agent_opportunity", "expected_impact"])
            },
            "ai_agent_recommendations": {
                "type": "object",
                "required": ["introduction", "priorities"],
                "properties": {
                    "introduction": non_empty_string(),
                    "priorities": {
                        "type": "array",
                        "minItems": 1,
                        "items": object_of(&["imperative_reference", "title", "use_case", "business_impact"])
                    }
                }
            },
            "expected_business_impact": {
                "type": "array",
                "minItems": 1,
                "items": non_empty_string()
            }
        }
    })
}

fn compiled_schema() -> std::result::Result<&'static JSONSchema, String> {
    static SCHEMA: OnceLock<std::result::Result<JSONSchema, String>> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            let schema = strategic_analysis_schema();
            JSONSchema::compile(&schema).map_err(|e| format!("invalid strategic analysis schema: {}", e))
        })
        .as_ref()
        .map_err(Clone::clone)
}

/// Validate a parsed strategic analysis document
pub fn validate_strategic_analysis(value: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();

    let schema = match compiled_schema() {
        Ok(schema) => schema,
        Err(e) => {
            report.errors.push(e);
            return report;
        }
    };

    if let Err(errors) = schema.validate(value) {
        report.errors = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
    }

    let count = |pointer: &str| value.pointer(pointer).and_then(Value::as_array).map(Vec::len);

    if let Some(intro) = value.get("introduction").and_then(Value::as_str) {
        let chars = intro.trim().chars().count();
        if !INTRODUCTION_CHARS.contains(&chars) {
            report.warnings.push(format!(
                "introduction is {} characters, expected {}-{}",
                chars,
                INTRODUCTION_CHARS.start(),
                INTRODUCTION_CHARS.end()
            ));
        }
    }

    for (pointer, label, expected) in [
        ("/strategic_imperatives", "strategic_imperatives", EXPECTED_IMPERATIVES),
        ("/ai_agent_recommendations/priorities", "ai_agent_recommendations.priorities", EXPECTED_PRIORITIES),
        ("/expected_business_impact", "expected_business_impact", EXPECTED_IMPACTS),
    ] {
        if let Some(n) = count(pointer) {
            if n != expected && n > 0 {
                report
                    .warnings
                    .push(format!("{} has {} entries, expected {}", label, n, expected));
            }
        }
    }

    report
}

/// Extract, validate and type the JSON in a step 2 provider answer
pub fn parse_strategic_analysis(text: &str) -> Result<ValidatedAnalysis> {
    let extracted = extract_json(text);
    let value: Value = serde_json::from_str(&extracted).map_err(|e| {
        ResearchError::Validation(vec![format!(
            "response is not valid JSON ({}): {}",
            e,
            truncate_chars(&extracted, 120)
        )])
    })?;

    let report = validate_strategic_analysis(&value);
    if !report.is_valid() {
        return Err(ResearchError::Validation(report.errors));
    }

    let analysis: StrategicAnalysis = serde_json::from_value(value.clone())
        .map_err(|e| ResearchError::Validation(vec![e.to_string()]))?;
    let json = serde_json::to_string_pretty(&value)
        .map_err(|e| ResearchError::Validation(vec![e.to_string()]))?;

    Ok(ValidatedAnalysis {
        json,
        analysis,
        warnings: report.warnings,
    })
}
