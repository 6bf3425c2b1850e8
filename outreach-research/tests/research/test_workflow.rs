//! Tests for workflow orchestration
//!
//! End-to-end runs against an in-memory database and a scripted provider:
//! auto-progression, resumption, background jobs, failures and tenancy.

use super::common::*;
use outreach_research::config::WorkflowSettings;
use outreach_research::providers::{JobPoll, ProviderError, ProviderRegistry};
use outreach_research::report::HtmlReportRenderer;
use outreach_research::research::prompts::deep_research_prompt;
use outreach_research::research::types::BACKGROUND_JOB_MARKER;
use outreach_research::ResearchOrchestrator;
use outreach_research_sdk::{ResearchRuntime, Step, WorkflowLog, WorkflowStatus};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Happy Path Tests
// ============================================================================

#[tokio::test]
async fn test_full_run_with_claude() {
    let fixture = Fixture::new(happy_provider("claude"));

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "anthropic", false)
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.step_reached, Some(Step::ReportGeneration));
    assert_eq!(result.status.as_deref(), Some("completed"));
    assert_eq!(
        fixture.provider.calls(),
        vec!["deep_research", "structured", "completion"]
    );

    let subject = fixture.subject();
    assert_eq!(subject.status, WorkflowStatus::Completed);
    assert_eq!(subject.provider.as_deref(), Some("claude"));
    assert_eq!(subject.step1_result.as_deref(), Some(RESEARCH_TEXT));
    assert!(subject.step2_result.is_some());
    assert!(subject.step3_result.is_some());
    assert!(subject.completed_at.is_some());
    assert_eq!(subject.ai_agent_recommendations.len(), 2);

    let analysis: serde_json::Value = serde_json::from_str(subject.step2_result.as_deref().unwrap()).unwrap();
    assert_eq!(analysis["strategic_imperatives"].as_array().unwrap().len(), 2);
    assert_eq!(analysis["expected_business_impact"].as_array().unwrap().len(), 3);

    let html = subject.report_html.unwrap();
    assert!(html.contains("<strong>growing</strong>"));
    assert!(subject.report_markdown.unwrap().starts_with("# Acme Corp Research Report"));
}

#[tokio::test]
async fn test_later_steps_receive_prior_results() {
    let fixture = Fixture::new(happy_provider("openai"));

    fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    let structured = fixture.provider.prompts("structured");
    assert!(structured[0].contains(RESEARCH_TEXT));
    let completion = fixture.provider.prompts("completion");
    assert!(completion[0].contains(RESEARCH_TEXT));
    assert!(completion[0].contains("Order Intake Agent"));
}

#[tokio::test]
async fn test_events_follow_the_run() {
    let fixture = Fixture::new(happy_provider("openai"));

    fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    assert_eq!(
        fixture.event_types(),
        vec![
            "workflow_started",
            "step_started",
            "step_completed",
            "step_started",
            "step_completed",
            "step_started",
            "step_completed",
            "workflow_completed",
        ]
    );

    let events = fixture
        .db
        .get_events(fixture.tenant, fixture.subject_id, Some(2))
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].sequence + 1, events[1].sequence);
}

#[tokio::test]
async fn test_completed_subject_is_a_no_op() {
    let fixture = Fixture::new(happy_provider("openai"));
    fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;
    let calls_before = fixture.provider.calls().len();

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    assert!(result.success);
    assert_eq!(result.message, "research already completed");
    assert_eq!(fixture.provider.calls().len(), calls_before);
}

#[tokio::test]
async fn test_runtime_trait_drives_the_orchestrator() {
    let fixture = Fixture::new(happy_provider("openai"));
    let runtime: Arc<dyn ResearchRuntime> = fixture.orchestrator.clone();

    let result = runtime
        .start_research(fixture.tenant, fixture.subject_id, "openai", false)
        .await;
    assert!(result.success, "{:?}", result);
    assert!(!runtime.check_status(fixture.tenant, fixture.subject_id).already_in_progress);
}

// ============================================================================
// Resumption Tests
// ============================================================================

#[tokio::test]
async fn test_resume_skips_completed_step1() {
    let fixture = Fixture::new(
        ScriptedProvider::new("openai")
            .structured(&valid_analysis_json())
            .completion(REPORT_TEXT),
    );
    fixture
        .db
        .save_step_result(fixture.tenant, fixture.subject_id, Step::DeepResearch, RESEARCH_TEXT)
        .unwrap();

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(fixture.provider.calls(), vec!["structured", "completion"]);
}

#[tokio::test]
async fn test_prompt_echo_in_step1_is_rerun() {
    let fixture = Fixture::new(happy_provider("openai"));
    let echo = deep_research_prompt("Acme Corp", Some("https://acme.example"));
    fixture
        .db
        .save_step_result(fixture.tenant, fixture.subject_id, Step::DeepResearch, &echo)
        .unwrap();

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(fixture.provider.calls()[0], "deep_research");
    assert_eq!(fixture.subject().step1_result.as_deref(), Some(RESEARCH_TEXT));
}

#[tokio::test]
async fn test_force_refresh_restarts_completed_research() {
    let fixture = Fixture::new(
        happy_provider("openai")
            .deep_text("Acme Corp was acquired by Globex in March.")
            .structured(&valid_analysis_json().replace("Order Intake Agent", "Partner Onboarding Agent"))
            .completion("Acme Corp now operates as a Globex subsidiary."),
    );
    fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", true)
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(
        fixture.provider.calls().iter().filter(|c| *c == "deep_research").count(),
        2
    );
    let subject = fixture.subject();
    assert_eq!(
        subject.step1_result.as_deref(),
        Some("Acme Corp was acquired by Globex in March.")
    );
    assert!(subject.step2_result.unwrap().contains("Partner Onboarding Agent"));
    assert_eq!(
        subject.step3_result.as_deref(),
        Some("Acme Corp now operates as a Globex subsidiary.")
    );
    assert_eq!(subject.ai_agent_recommendations[0].title, "Partner Onboarding Agent");
}

#[tokio::test]
async fn test_reset_allows_a_fresh_run() {
    let fixture = Fixture::new(happy_provider("openai").deep_text(RESEARCH_TEXT));
    fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    let reset = fixture.orchestrator.reset_research(fixture.tenant, fixture.subject_id);
    assert!(reset.success);
    assert_eq!(reset.status.as_deref(), Some("not_started"));
    assert_eq!(fixture.subject().report_html, None);

    // only step 1 is scripted a second time; step 2 runs out of answers
    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;
    assert!(!result.success);
    assert_eq!(result.step_reached, Some(Step::StrategicAnalysis));
    assert_eq!(fixture.subject().step1_result.as_deref(), Some(RESEARCH_TEXT));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_triggers_run_step1_once() {
    let fixture = Fixture::new(happy_provider("openai"));

    let handles = vec![
        fixture
            .orchestrator
            .spawn_research(fixture.tenant, fixture.subject_id, "openai".to_string(), false),
        fixture
            .orchestrator
            .spawn_research(fixture.tenant, fixture.subject_id, "openai".to_string(), false),
    ];
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let completed = results
        .iter()
        .filter(|r| r.success && r.message == "research completed")
        .count();
    let turned_away = results
        .iter()
        .filter(|r| {
            r.error_kind.as_deref() == Some("guard_blocked") || r.message == "research already completed"
        })
        .count();
    assert_eq!(completed, 1, "{:?}", results);
    assert_eq!(turned_away, 1, "{:?}", results);
    assert_eq!(
        fixture.provider.calls().iter().filter(|c| *c == "deep_research").count(),
        1
    );
    assert_eq!(fixture.subject().status, WorkflowStatus::Completed);
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn test_provider_error_is_persisted() {
    let fixture = Fixture::new(ScriptedProvider::new("openai").deep_error(ProviderError::Http {
        status: 400,
        body: "bad request".to_string(),
    }));

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("provider_error"));
    assert_eq!(result.step_reached, Some(Step::DeepResearch));
    assert!(result.error.as_deref().unwrap().contains("HTTP 400"));

    let subject = fixture.subject();
    assert!(subject.step1_result.as_deref().unwrap().starts_with("ERROR:"));
    assert!(subject.status.is_failure());
    assert!(fixture.event_types().contains(&"step_failed".to_string()));
    assert!(!fixture.orchestrator.check_status(fixture.tenant, fixture.subject_id).already_in_progress);
}

#[tokio::test]
async fn test_degraded_deep_research_falls_back_to_completion() {
    let fixture = Fixture::new(
        ScriptedProvider::new("openai")
            .deep_error(ProviderError::RateLimited("slow down".to_string()))
            .completion(RESEARCH_TEXT)
            .structured(&valid_analysis_json())
            .completion(REPORT_TEXT),
    );

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(
        fixture.provider.calls(),
        vec!["deep_research", "completion", "structured", "completion"]
    );
    assert_eq!(fixture.subject().step1_result.as_deref(), Some(RESEARCH_TEXT));

    let events = fixture
        .db
        .get_events(fixture.tenant, fixture.subject_id, None)
        .unwrap();
    let fallbacks: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == "provider_fallback")
        .collect();
    assert_eq!(fallbacks.len(), 1);
    match &fallbacks[0].event {
        WorkflowLog::ProviderFallback { subject_id, provider, mode, reason } => {
            assert_eq!(*subject_id, fixture.subject_id);
            assert_eq!(provider, "openai");
            assert_eq!(mode, "deep_research");
            assert!(reason.contains("slow down"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    let types = fixture.event_types();
    let started = types.iter().position(|t| t == "step_started").unwrap();
    let fallback = types.iter().position(|t| t == "provider_fallback").unwrap();
    assert!(started < fallback);
}

#[tokio::test]
async fn test_report_failure_keeps_prior_steps() {
    let fixture = Fixture::new(
        ScriptedProvider::new("openai")
            .deep_text(RESEARCH_TEXT)
            .structured(&valid_analysis_json())
            .completion_error(ProviderError::InvalidResponse("empty body".to_string())),
    );

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    assert!(!result.success);
    assert_eq!(result.step_reached, Some(Step::ReportGeneration));
    let subject = fixture.subject();
    assert_eq!(subject.step1_result.as_deref(), Some(RESEARCH_TEXT));
    assert!(subject.step2_result.is_some());
    assert!(subject.step3_result.as_deref().unwrap().starts_with("ERROR:"));
    assert_eq!(subject.report_html, None);
}

#[tokio::test]
async fn test_unknown_provider_is_rejected() {
    let fixture = Fixture::new(happy_provider("openai"));

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "mistral", false)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("provider_error"));
    assert!(fixture.provider.calls().is_empty());
    assert_eq!(fixture.subject().status, WorkflowStatus::NotStarted);
}

#[tokio::test]
async fn test_unconfigured_provider_is_rejected() {
    let fixture = Fixture::new(happy_provider("openai"));

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "claude", false)
        .await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("not configured"));
}

// ============================================================================
// Tenancy Tests
// ============================================================================

#[tokio::test]
async fn test_other_tenant_cannot_run_subject() {
    let fixture = Fixture::new(happy_provider("openai"));

    let result = fixture
        .orchestrator
        .start(Uuid::new_v4(), fixture.subject_id, "openai", false)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("not_found"));
    assert!(fixture.provider.calls().is_empty());
    assert_eq!(fixture.subject().status, WorkflowStatus::NotStarted);
}

#[tokio::test]
async fn test_tenants_do_not_share_events() {
    let fixture = Fixture::new(happy_provider("openai"));
    fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    assert!(fixture.db.get_event_count(fixture.tenant, fixture.subject_id).unwrap() > 0);
    assert_eq!(
        fixture.db.get_event_count(Uuid::new_v4(), fixture.subject_id).unwrap(),
        0
    );
}

// ============================================================================
// Background Job Tests
// ============================================================================

#[tokio::test]
async fn test_background_job_parks_the_run() {
    let fixture = Fixture::new(ScriptedProvider::new("openai").deep_job("resp_1"));

    let result = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.status.as_deref(), Some("background_job_running"));
    assert!(result.message.contains("resp_1"));

    let subject = fixture.subject();
    assert_eq!(subject.step1_result, None);
    assert_eq!(subject.background_job_id.as_deref(), Some("resp_1"));
    assert!(fixture.event_types().contains(&"background_job_started".to_string()));

    // a second trigger while the job runs is blocked
    let again = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;
    assert_eq!(again.error_kind.as_deref(), Some("guard_blocked"));
}

#[tokio::test]
async fn test_complete_background_job_continues_run() {
    let fixture = Fixture::new(
        ScriptedProvider::new("openai")
            .deep_job("resp_1")
            .structured(&valid_analysis_json())
            .completion(REPORT_TEXT),
    );
    fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    let rejected = fixture
        .orchestrator
        .complete_background_job(
            fixture.tenant,
            fixture.subject_id,
            "",
            format!("{}:resp_1", BACKGROUND_JOB_MARKER),
        )
        .await;
    assert!(!rejected.success);
    assert_eq!(rejected.error_kind.as_deref(), Some("invalid_input"));
    assert_eq!(fixture.subject().step1_result, None);
    assert_eq!(fixture.subject().status, WorkflowStatus::BackgroundJobRunning);

    let result = fixture
        .orchestrator
        .complete_background_job(fixture.tenant, fixture.subject_id, "", RESEARCH_TEXT.to_string())
        .await;

    assert!(result.success, "{:?}", result);
    let subject = fixture.subject();
    assert_eq!(subject.status, WorkflowStatus::Completed);
    assert_eq!(subject.step1_result.as_deref(), Some(RESEARCH_TEXT));
    assert_eq!(subject.background_job_id, None);
}

#[tokio::test]
async fn test_late_job_result_after_completed_run_is_rejected() {
    let fixture = Fixture::new(happy_provider("openai"));
    let first = fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;
    assert!(first.success, "{:?}", first);
    let before = fixture.subject();

    let result = fixture
        .orchestrator
        .complete_background_job(fixture.tenant, fixture.subject_id, "", "Stale callback text".to_string())
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("invalid_input"));
    assert_eq!(fixture.provider.calls(), vec!["deep_research", "structured", "completion"]);
    let after = fixture.subject();
    assert_eq!(after.step1_result.as_deref(), Some(RESEARCH_TEXT));
    assert_eq!(after.status, WorkflowStatus::Completed);
    assert_eq!(after.completed_at, before.completed_at);
}

#[tokio::test]
async fn test_poll_until_job_completes() {
    let fixture = Fixture::new(
        ScriptedProvider::new("openai")
            .deep_job("resp_9")
            .poll(JobPoll::Pending)
            .poll_error(ProviderError::Network("connection reset".to_string()))
            .poll(JobPoll::Completed(RESEARCH_TEXT.to_string()))
            .structured(&valid_analysis_json())
            .completion(REPORT_TEXT),
    );
    fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    let pending = fixture
        .orchestrator
        .poll_background_job(fixture.tenant, fixture.subject_id)
        .await;
    assert!(pending.success);
    assert_eq!(pending.status.as_deref(), Some("background_job_running"));

    let transient = fixture
        .orchestrator
        .poll_background_job(fixture.tenant, fixture.subject_id)
        .await;
    assert!(!transient.success);
    assert_eq!(transient.status.as_deref(), Some("background_job_running"));

    let done = fixture
        .orchestrator
        .poll_background_job(fixture.tenant, fixture.subject_id)
        .await;
    assert!(done.success, "{:?}", done);
    assert_eq!(done.status.as_deref(), Some("completed"));
    assert_eq!(fixture.provider.prompts("poll"), vec!["resp_9", "resp_9", "resp_9"]);
}

#[tokio::test]
async fn test_failed_job_marks_step1_failed() {
    let fixture = Fixture::new(
        ScriptedProvider::new("openai")
            .deep_job("resp_2")
            .poll(JobPoll::Failed("quota exceeded".to_string())),
    );
    fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    let result = fixture
        .orchestrator
        .poll_background_job(fixture.tenant, fixture.subject_id)
        .await;

    assert!(!result.success);
    assert_eq!(result.step_reached, Some(Step::DeepResearch));
    let subject = fixture.subject();
    assert!(subject.step1_result.as_deref().unwrap().contains("quota exceeded"));
    assert!(subject.status.is_failure());
    assert_eq!(subject.background_job_id, None);
}

#[tokio::test]
async fn test_failed_job_is_not_polled_again() {
    let fixture = Fixture::new(
        ScriptedProvider::new("openai")
            .deep_job("resp_9")
            .poll(JobPoll::Failed("model overloaded".to_string()))
            .poll(JobPoll::Failed("model overloaded".to_string())),
    );
    fixture
        .orchestrator
        .start(fixture.tenant, fixture.subject_id, "openai", false)
        .await;

    let first = fixture
        .orchestrator
        .poll_background_job(fixture.tenant, fixture.subject_id)
        .await;
    assert_eq!(first.error_kind.as_deref(), Some("provider_error"));

    let second = fixture
        .orchestrator
        .poll_background_job(fixture.tenant, fixture.subject_id)
        .await;
    assert_eq!(second.error_kind.as_deref(), Some("invalid_input"));
    assert_eq!(fixture.provider.prompts("poll"), vec!["resp_9"]);
}

#[tokio::test]
async fn test_poll_without_job_is_rejected() {
    let fixture = Fixture::new(happy_provider("openai"));

    let result = fixture
        .orchestrator
        .poll_background_job(fixture.tenant, fixture.subject_id)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind.as_deref(), Some("invalid_input"));
    assert!(fixture.provider.calls().is_empty());
}

// ============================================================================
// Fallback Provider Tests
// ============================================================================

#[tokio::test]
async fn test_report_falls_back_to_second_provider() {
    let primary = Arc::new(
        ScriptedProvider::new("openai")
            .deep_text(RESEARCH_TEXT)
            .structured(&valid_analysis_json())
            .completion_error(ProviderError::Unavailable("overloaded".to_string())),
    );
    let fallback = Arc::new(ScriptedProvider::new("claude").completion(REPORT_TEXT));
    let registry = ProviderRegistry::new()
        .with_provider("openai", primary.clone())
        .with_provider("claude", fallback.clone())
        .with_fallback("claude");

    let db = Arc::new(create_test_db());
    let tenant = Uuid::new_v4();
    let id = db.insert_company(tenant, "Acme Corp", None).unwrap();
    let orchestrator = ResearchOrchestrator::new(
        db.clone(),
        Arc::new(registry),
        Arc::new(HtmlReportRenderer),
        WorkflowSettings::default(),
    );

    let result = orchestrator.start(tenant, id, "openai", false).await;

    assert!(result.success, "{:?}", result);
    assert_eq!(fallback.calls(), vec!["completion"]);
    let subject = db.get_company(tenant, id).unwrap().unwrap();
    assert_eq!(subject.status, WorkflowStatus::Completed);
}
