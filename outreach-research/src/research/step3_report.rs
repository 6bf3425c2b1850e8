//! Step 3: Report generation
//!
//! Writes the executive narrative from steps 1 and 2 and renders it. A
//! renderer failure does not fail the step; the report degrades to the
//! escaped plain text.

use outreach_research_sdk::Step;

use crate::error::Result;
use crate::providers::{FallbackHook, InvokeMode, ProviderError, ProviderOutput, ProviderRegistry};
use crate::report::{plain_text_report, ReportRenderer};
use crate::research::prompts::{is_prompt_echo, report_prompt};
use crate::research::state::require_ready;
use crate::research::types::ReportOutcome;

pub async fn run_report_generation(
    providers: &ProviderRegistry,
    renderer: &dyn ReportRenderer,
    subject_name: &str,
    step1_result: Option<&str>,
    step2_result: Option<&str>,
    provider: &str,
    on_fallback: FallbackHook<'_>,
) -> Result<ReportOutcome> {
    let research = require_ready(Step::ReportGeneration, Step::DeepResearch, step1_result)?;
    let analysis = require_ready(Step::ReportGeneration, Step::StrategicAnalysis, step2_result)?;

    let prompt = report_prompt(subject_name, research, analysis);
    tracing::info!(provider, step = %Step::ReportGeneration, "requesting report");

    let text = match providers.invoke(&prompt, provider, InvokeMode::RegularCompletion, on_fallback).await? {
        ProviderOutput::Text(text) => text.trim().to_string(),
        ProviderOutput::BackgroundJob { job_id } => {
            return Err(ProviderError::InvalidResponse(format!(
                "report generation cannot run as a background job ({})",
                job_id
            ))
            .into())
        }
    };

    if text.is_empty() {
        return Err(ProviderError::InvalidResponse("report generation returned no content".to_string()).into());
    }
    if is_prompt_echo(&text) {
        return Err(ProviderError::InvalidResponse("report generation echoed the request prompt".to_string()).into());
    }

    Ok(build_report(renderer, subject_name, text))
}

/// Markdown and HTML artifacts for a narrative
pub fn build_report(renderer: &dyn ReportRenderer, subject_name: &str, text: String) -> ReportOutcome {
    let markdown = if text.trim_start().starts_with('#') {
        text.clone()
    } else {
        format!("# {} Research Report\n\n{}", subject_name.trim(), text)
    };

    let (html, degraded_html) = match renderer.render(subject_name, &markdown) {
        Ok(html) => (html, false),
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "report rendering failed; using plain text");
            (plain_text_report(subject_name, &text), true)
        }
    };

    ReportOutcome {
        report_text: text,
        markdown,
        html,
        degraded_html,
    }
}
