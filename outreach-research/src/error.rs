//! Error types for the research workflow

use chrono::{DateTime, Utc};
use outreach_research_sdk::Step;
use thiserror::Error;

use crate::providers::ProviderError;

/// Errors produced while running a research step
///
/// Step handlers return these; the orchestrator converts them into a
/// [`WorkflowResult`](outreach_research_sdk::WorkflowResult) and never lets
/// them escape to its caller.
#[derive(Debug, Error)]
pub enum ResearchError {
    /// A fresh run already owns the subject
    #[error("research already in progress (status: {status}, started at: {})", fmt_started(.started_at))]
    GuardBlocked {
        status: String,
        started_at: Option<DateTime<Utc>>,
    },

    /// Step 2 or 3 was asked to run without genuine prior-step content
    #[error("{step} prerequisite missing: {reason}")]
    PrerequisiteMissing { step: Step, reason: String },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Step 2 produced structurally invalid JSON
    #[error("strategic analysis validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("subject {0} not found")]
    SubjectNotFound(i64),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ResearchError {
    /// Stable tag for API responses
    pub fn kind(&self) -> &'static str {
        match self {
            ResearchError::GuardBlocked { .. } => "guard_blocked",
            ResearchError::PrerequisiteMissing { .. } => "prerequisite_missing",
            ResearchError::Provider(_) => "provider_error",
            ResearchError::Validation(_) => "validation_error",
            ResearchError::Persistence(_) => "persistence_error",
            ResearchError::SubjectNotFound(_) => "not_found",
            ResearchError::InvalidInput(_) => "invalid_input",
        }
    }

    pub fn persistence(err: anyhow::Error) -> Self {
        ResearchError::Persistence(format!("{:#}", err))
    }
}

fn fmt_started(started_at: &Option<DateTime<Utc>>) -> String {
    started_at
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

pub type Result<T> = std::result::Result<T, ResearchError>;
