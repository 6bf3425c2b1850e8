//! Step 2: Strategic analysis
//!
//! Turns the deep research text into the structured strategic analysis
//! JSON. The prerequisite is checked before any provider call: an empty,
//! failed or prompt-echo step 1 never reaches the model.

use outreach_research_sdk::Step;

use crate::error::Result;
use crate::providers::{FallbackHook, InvokeMode, ProviderError, ProviderOutput, ProviderRegistry};
use crate::research::prompts::strategic_analysis_prompt;
use crate::research::state::require_ready;
use crate::research::types::StrategicAnalysis;
use crate::research::validation::parse_strategic_analysis;

#[derive(Debug, Clone, PartialEq)]
pub struct StrategicAnalysisOutcome {
    pub json_string: String,
    pub analysis: StrategicAnalysis,
    /// Soft validation findings; the analysis is still accepted
    pub warnings: Vec<String>,
}

pub async fn run_strategic_analysis(
    providers: &ProviderRegistry,
    subject_name: &str,
    step1_result: Option<&str>,
    provider: &str,
    on_fallback: FallbackHook<'_>,
) -> Result<StrategicAnalysisOutcome> {
    let research = require_ready(Step::StrategicAnalysis, Step::DeepResearch, step1_result)?;

    let prompt = strategic_analysis_prompt(subject_name, research);
    tracing::info!(provider, step = %Step::StrategicAnalysis, "requesting strategic analysis");

    let text = match providers.invoke(&prompt, provider, InvokeMode::StructuredJson, on_fallback).await? {
        ProviderOutput::Text(text) => text,
        ProviderOutput::BackgroundJob { job_id } => {
            return Err(ProviderError::InvalidResponse(format!(
                "strategic analysis cannot run as a background job ({})",
                job_id
            ))
            .into())
        }
    };

    let validated = parse_strategic_analysis(&text)?;
    for warning in &validated.warnings {
        tracing::warn!(step = %Step::StrategicAnalysis, %warning, "strategic analysis validation warning");
    }

    Ok(StrategicAnalysisOutcome {
        json_string: validated.json,
        analysis: validated.analysis,
        warnings: validated.warnings,
    })
}
