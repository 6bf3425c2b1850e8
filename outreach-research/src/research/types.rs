//! Data structures for research workflows

use chrono::{DateTime, Utc};
use outreach_research_sdk::{Step, SubjectId, TenantId, WorkflowStatus};
use serde::{Deserialize, Serialize};

/// Sentinel some providers hand back instead of content when a deep research
/// call was queued. It must never be written to a step field.
pub const BACKGROUND_JOB_MARKER: &str = "BACKGROUND_JOB_STARTED";

pub fn is_background_marker(text: &str) -> bool {
    text.trim().starts_with(BACKGROUND_JOB_MARKER)
}

/// A company record and its research state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSubject {
    pub id: SubjectId,
    pub tenant_id: TenantId,
    pub name: String,
    pub website: Option<String>,
    pub step1_result: Option<String>,
    pub step2_result: Option<String>,
    pub step3_result: Option<String>,
    pub status: WorkflowStatus,
    pub provider: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub background_job_id: Option<String>,
    pub report_html: Option<String>,
    pub report_markdown: Option<String>,
    /// Projection of step 2 `ai_agent_recommendations.priorities`
    pub ai_agent_recommendations: Vec<AgentRecommendation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchSubject {
    /// Raw persisted field for a step
    pub fn step_result(&self, step: Step) -> Option<&str> {
        match step {
            Step::DeepResearch => self.step1_result.as_deref(),
            Step::StrategicAnalysis => self.step2_result.as_deref(),
            Step::ReportGeneration => self.step3_result.as_deref(),
        }
    }
}

/// Status columns read by the duplicate-trigger guard
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchStatusRow {
    pub status: WorkflowStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub provider: Option<String>,
}

/// Step 2 output: strategic analysis of a company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicAnalysis {
    pub introduction: String,
    pub strategic_imperatives: Vec<StrategicImperative>,
    pub ai_agent_recommendations: AgentRecommendations,
    pub expected_business_impact: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicImperative {
    pub title: String,
    pub context: String,
    pub ai_agent_opportunity: String,
    pub expected_impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecommendations {
    pub introduction: String,
    pub priorities: Vec<AgentRecommendation>,
}

/// A single AI agent recommendation, consumed downstream for email personalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecommendation {
    pub imperative_reference: String,
    pub title: String,
    pub use_case: String,
    pub business_impact: String,
}

/// Step 3 output ready for persistence
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutcome {
    pub report_text: String,
    pub markdown: String,
    pub html: String,
    /// True when the renderer failed and `html` is the plain-text fallback
    pub degraded_html: bool,
}
