//! Step 1: Deep research
//!
//! Asks the provider for a web-grounded profile of the company. Providers
//! with a background mode may queue the work instead of answering; the
//! caller persists the job id and finishes the step later through
//! `complete_background_job`.

use outreach_research_sdk::Step;

use crate::error::{ResearchError, Result};
use crate::providers::{FallbackHook, InvokeMode, ProviderError, ProviderOutput, ProviderRegistry};
use crate::research::prompts::{deep_research_prompt, is_prompt_echo};
use crate::research::types::is_background_marker;

#[derive(Debug, Clone, PartialEq)]
pub enum DeepResearchOutcome {
    Completed(String),
    BackgroundJob { job_id: String },
}

/// Run deep research for one subject
pub async fn run_deep_research(
    providers: &ProviderRegistry,
    subject_name: &str,
    subject_url: Option<&str>,
    subject_id: i64,
    provider: &str,
    on_fallback: FallbackHook<'_>,
) -> Result<DeepResearchOutcome> {
    if subject_name.trim().is_empty() {
        return Err(ResearchError::InvalidInput(format!(
            "subject {} has no company name",
            subject_id
        )));
    }

    let prompt = deep_research_prompt(subject_name, subject_url);
    tracing::info!(subject_id, provider, step = %Step::DeepResearch, "requesting deep research");

    match providers.invoke(&prompt, provider, InvokeMode::DeepResearch, on_fallback).await? {
        ProviderOutput::BackgroundJob { job_id } => {
            tracing::info!(subject_id, %job_id, "deep research queued as background job");
            Ok(DeepResearchOutcome::BackgroundJob { job_id })
        }
        ProviderOutput::Text(text) => accept_research_text(&text).map(DeepResearchOutcome::Completed),
    }
}

/// Validate step 1 text before it is persisted
pub fn accept_research_text(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ProviderError::InvalidResponse("deep research returned no content".to_string()).into());
    }
    if is_background_marker(text) {
        return Err(ProviderError::InvalidResponse(
            "deep research returned a background job marker instead of content".to_string(),
        )
        .into());
    }
    if is_prompt_echo(text) {
        return Err(ProviderError::InvalidResponse(
            "deep research echoed the request prompt".to_string(),
        )
        .into());
    }
    Ok(text.to_string())
}
