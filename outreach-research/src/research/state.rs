//! Workflow state derivation
//!
//! Which step runs next is decided here and nowhere else. A step counts as
//! done only when its field holds genuine content: non-empty, not
//! `ERROR:`-prefixed and not an echo of the request prompt.

use outreach_research_sdk::{Step, WorkflowStatus};

use crate::error::ResearchError;
use crate::research::prompts::is_prompt_echo;
use crate::research::types::{is_background_marker, ResearchSubject};

/// Prefix marking a step field that holds a failure description
pub const ERROR_PREFIX: &str = "ERROR:";

/// Classification of a single step field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepContent<'a> {
    Empty,
    /// The field holds the request prompt, not a response
    PromptEcho,
    Error(&'a str),
    Ready(&'a str),
}

impl<'a> StepContent<'a> {
    pub fn describe(&self) -> &'static str {
        match self {
            StepContent::Empty => "empty",
            StepContent::PromptEcho => "holds the request prompt instead of a response",
            StepContent::Error(_) => "holds an error from a previous attempt",
            StepContent::Ready(_) => "ready",
        }
    }
}

pub fn classify(field: Option<&str>) -> StepContent<'_> {
    let Some(text) = field else {
        return StepContent::Empty;
    };
    let trimmed = text.trim();

    if trimmed.is_empty() || is_background_marker(trimmed) {
        StepContent::Empty
    } else if let Some(message) = trimmed.strip_prefix(ERROR_PREFIX) {
        StepContent::Error(message.trim())
    } else if is_prompt_echo(trimmed) {
        StepContent::PromptEcho
    } else {
        StepContent::Ready(trimmed)
    }
}

/// Value written to a step field when the step fails
pub fn error_value(message: &str) -> String {
    format!("{} {}", ERROR_PREFIX, message)
}

/// Research progress derived from the step fields alone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    NotStarted,
    Step1Complete,
    Step2Complete,
    Completed,
    Failed { step: Step, reason: String },
}

impl WorkflowState {
    /// First step that is not done; `None` once everything is complete
    pub fn next_step(&self) -> Option<Step> {
        match self {
            WorkflowState::NotStarted => Some(Step::DeepResearch),
            WorkflowState::Step1Complete => Some(Step::StrategicAnalysis),
            WorkflowState::Step2Complete => Some(Step::ReportGeneration),
            WorkflowState::Completed => None,
            WorkflowState::Failed { step, .. } => Some(*step),
        }
    }
}

/// Derive the workflow state of a subject from its step fields
pub fn derive_state(subject: &ResearchSubject) -> WorkflowState {
    for step in Step::ALL {
        match classify(subject.step_result(step)) {
            StepContent::Ready(_) => continue,
            StepContent::Error(reason) => {
                return WorkflowState::Failed {
                    step,
                    reason: reason.to_string(),
                }
            }
            StepContent::Empty | StepContent::PromptEcho => {
                return match step {
                    Step::DeepResearch => WorkflowState::NotStarted,
                    Step::StrategicAnalysis => WorkflowState::Step1Complete,
                    Step::ReportGeneration => WorkflowState::Step2Complete,
                };
            }
        }
    }
    WorkflowState::Completed
}

/// The status column value implied by the step fields
pub fn derive_status(subject: &ResearchSubject) -> WorkflowStatus {
    match derive_state(subject) {
        WorkflowState::NotStarted => WorkflowStatus::NotStarted,
        WorkflowState::Step1Complete => WorkflowStatus::StepCompleted(Step::DeepResearch),
        WorkflowState::Step2Complete => WorkflowStatus::StepCompleted(Step::StrategicAnalysis),
        WorkflowState::Completed => WorkflowStatus::Completed,
        WorkflowState::Failed { step, .. } => WorkflowStatus::StepError(step),
    }
}

/// Genuine content of `source` or a descriptive prerequisite error for `step`
pub fn require_ready<'a>(
    step: Step,
    source: Step,
    field: Option<&'a str>,
) -> Result<&'a str, ResearchError> {
    match classify(field) {
        StepContent::Ready(text) => Ok(text),
        other => Err(ResearchError::PrerequisiteMissing {
            step,
            reason: format!("{} result {}", source.label(), other.describe()),
        }),
    }
}
