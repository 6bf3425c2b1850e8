//! Tests for strategic analysis validation
//!
//! Unit-level checks of `parse_strategic_analysis` plus how the
//! orchestrator persists warnings and halts on hard errors.

use super::common::*;
use outreach_research::research::validation::{parse_strategic_analysis, validate_strategic_analysis};
use outreach_research_sdk::{Step, WorkflowLog};
use serde_json::Value;

fn analysis_value() -> Value {
    serde_json::from_str(&valid_analysis_json()).unwrap()
}

// ============================================================================
// Parsing Tests
// ============================================================================

#[test]
fn test_valid_analysis_has_no_findings() {
    let report = validate_strategic_analysis(&analysis_value());
    assert!(report.is_valid(), "{:?}", report.errors);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[test]
fn test_fenced_json_is_extracted() {
    let text = format!("Here is the analysis:\n```json\n{}\n```\n", valid_analysis_json());
    let validated = parse_strategic_analysis(&text).unwrap();

    assert_eq!(validated.analysis.strategic_imperatives.len(), 2);
    assert_eq!(
        validated.analysis.ai_agent_recommendations.priorities[0].title,
        "Order Intake Agent"
    );
    let reparsed: Value = serde_json::from_str(&validated.json).unwrap();
    assert_eq!(reparsed, analysis_value());
}

#[test]
fn test_missing_section_is_hard_error() {
    let mut value = analysis_value();
    value.as_object_mut().unwrap().remove("ai_agent_recommendations");

    let err = parse_strategic_analysis(&value.to_string()).unwrap_err();
    assert_eq!(err.kind(), "validation_error");
    assert!(err.to_string().contains("ai_agent_recommendations"));
}

#[test]
fn test_blank_field_is_hard_error() {
    let mut value = analysis_value();
    value["strategic_imperatives"][0]["title"] = Value::String("   ".to_string());

    let report = validate_strategic_analysis(&value);
    assert!(!report.is_valid());
    assert!(report.errors.iter().any(|e| e.contains("/strategic_imperatives/0/title")));
}

#[test]
fn test_unexpected_counts_are_warnings() {
    let mut value = analysis_value();
    value["expected_business_impact"]
        .as_array_mut()
        .unwrap()
        .push(Value::String("Happier customers".to_string()));

    let validated = parse_strategic_analysis(&value.to_string()).unwrap();
    assert_eq!(
        validated.warnings,
        vec!["expected_business_impact has 4 entries, expected 3".to_string()]
    );
}

#[test]
fn test_non_json_is_hard_error() {
    let err = parse_strategic_analysis("I could not produce an analysis today.").unwrap_err();
    assert_eq!(err.kind(), "validation_error");
}

// ============================================================================
// Orchestrator Tests
// ============================================================================

#[test]
fn test_warnings_are_recorded_as_events() {
    let mut value = analysis_value();
    value["strategic_imperatives"]
        .as_array_mut()
        .unwrap()
        .truncate(1);

    let fixture = Fixture::new(
        ScriptedProvider::new("openai")
            .deep_text(RESEARCH_TEXT)
            .structured(&value.to_string())
            .completion(REPORT_TEXT),
    );

    let result = tokio_test::block_on(fixture.orchestrator.start(
        fixture.tenant,
        fixture.subject_id,
        "openai",
        false,
    ));
    assert!(result.success, "{:?}", result);

    let warnings: Vec<String> = fixture
        .db
        .get_events(fixture.tenant, fixture.subject_id, None)
        .unwrap()
        .into_iter()
        .filter_map(|e| match e.event {
            WorkflowLog::ValidationWarning { step, warning, .. } => {
                assert_eq!(step, Step::StrategicAnalysis);
                Some(warning)
            }
            _ => None,
        })
        .collect();
    assert_eq!(warnings, vec!["strategic_imperatives has 1 entries, expected 2".to_string()]);
}

#[tokio::test]
async fn test_invalid_analysis_halts_before_report() {
    let fixture = Fixture::new(
        ScriptedProvider::new("openai")
            .deep_text(RESEARCH_TEXT)
            .structured("{\"introduction\": \"only this\"}")
            .completion(REPORT_TEXT),
    );

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("validation_error"));
    assert_eq!(result.step_reached, Some(Step::StrategicAnalysis));
    assert!(result.status.as_deref().unwrap().starts_with("failed: step_2"));

    let subject = fixture.subject();
    assert_eq!(subject.step1_result.as_deref(), Some(RESEARCH_TEXT));
    assert!(subject.step2_result.as_deref().unwrap().starts_with("ERROR:"));
    assert_eq!(subject.step3_result, None);
    assert!(subject.ai_agent_recommendations.is_empty());
    assert!(!fixture.provider.calls().contains(&"completion".to_string()));
}

#[tokio::test]
async fn test_rerun_after_invalid_analysis_resumes_at_step2() {
    let fixture = Fixture::new(
        ScriptedProvider::new("openai")
            .deep_text(RESEARCH_TEXT)
            .structured("not json at all")
            .structured(&valid_analysis_json())
            .completion(REPORT_TEXT),
    );

    let first = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;
    assert!(!first.success);

    let second = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;
    assert!(second.success, "{:?}", second);

    assert_eq!(
        fixture.provider.calls(),
        vec!["deep_research", "structured", "structured", "completion"]
    );
    let subject = fixture.subject();
    assert_eq!(subject.ai_agent_recommendations.len(), 2);
    assert_eq!(subject.ai_agent_recommendations[1].title, "Procurement Agent");
}
