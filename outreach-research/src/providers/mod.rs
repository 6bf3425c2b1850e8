//! LLM provider adapters
//!
//! Step handlers never talk to a vendor API directly. They call
//! [`ProviderRegistry::invoke`] with a provider name and an [`InvokeMode`];
//! the registry resolves the name, dispatches to the matching
//! [`ResearchProvider`] and applies the fallback policy:
//!
//! - rate limits, authentication failures, unavailability and timeouts are
//!   *degradable*: the call is retried once as a plain completion (same
//!   provider for deep research / structured JSON, the configured fallback
//!   provider for plain completions)
//! - every other error is returned as is
//!
//! Provider clients are built once at startup ([`ProviderRegistry::from_config`])
//! and shared through an `Arc`.

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::AppConfig;
use crate::workflow_utils::truncate_chars;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

pub const DEEP_RESEARCH_SYSTEM_PROMPT: &str = "You are a senior B2B market research analyst. \
Research companies thoroughly using current public information and report verifiable facts.";

pub const STRUCTURED_JSON_SYSTEM_PROMPT: &str = "You are a strategic management consultant \
specialising in AI adoption. Respond with a single valid JSON object and no other text.";

pub const COMPLETION_SYSTEM_PROMPT: &str = "You are an expert business writer producing \
executive-level research reports for enterprise sales teams.";

/// What kind of generation a step needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeMode {
    DeepResearch,
    StructuredJson,
    RegularCompletion,
}

/// Callback told about a degraded call: primary provider, mode and the error
pub type FallbackHook<'a> = &'a (dyn Fn(&str, InvokeMode, &ProviderError) + Send + Sync);

impl fmt::Display for InvokeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvokeMode::DeepResearch => "deep_research",
            InvokeMode::StructuredJson => "structured_json",
            InvokeMode::RegularCompletion => "regular_completion",
        };
        f.write_str(s)
    }
}

/// Provider answer
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutput {
    Text(String),
    /// The provider queued the work; poll `job_id` for the result
    BackgroundJob { job_id: String },
}

/// State of a provider background job
#[derive(Debug, Clone, PartialEq)]
pub enum JobPoll {
    Pending,
    Completed(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("provider '{0}' is not configured")]
    NotConfigured(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Errors that justify downgrading to a simpler completion
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Auth(_)
                | ProviderError::Unavailable(_)
                | ProviderError::Timeout(_)
        )
    }

    /// Classify a non-success HTTP response
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = truncate_chars(body.trim(), 500);
        match status {
            429 => ProviderError::RateLimited(body),
            401 | 403 => ProviderError::Auth(body),
            500 | 502 | 503 | 504 | 529 => ProviderError::Unavailable(body),
            _ => ProviderError::Http { status, body },
        }
    }

    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::from_status(status.as_u16(), &err.to_string())
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// A vendor client able to perform every kind of research generation
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    /// Canonical provider name (`openai`, `claude`, ...)
    fn name(&self) -> &str;

    /// Deep research with web access; may return a background job
    async fn deep_research(&self, prompt: &str) -> Result<ProviderOutput, ProviderError>;

    /// Completion constrained to a JSON object
    async fn structured_completion(&self, prompt: &str, system: &str)
        -> Result<String, ProviderError>;

    /// Plain chat completion
    async fn completion(&self, prompt: &str, system: &str) -> Result<String, ProviderError>;

    /// Poll a background job started by [`deep_research`](Self::deep_research)
    async fn poll_job(&self, job_id: &str) -> Result<JobPoll, ProviderError> {
        Err(ProviderError::Unsupported(format!(
            "{} does not run background jobs (job {})",
            self.name(),
            job_id
        )))
    }
}

/// Map user-facing provider names to registry keys
pub fn normalize_provider_name(name: &str) -> String {
    let name = name.trim().to_ascii_lowercase();
    match name.as_str() {
        "anthropic" | "claude" => "claude".to_string(),
        "openai" | "gpt" | "chatgpt" => "openai".to_string(),
        _ => name,
    }
}

/// Provider clients keyed by canonical name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ResearchProvider>>,
    fallback: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every provider that has credentials in `config`
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let mut registry = Self::new();

        if let Some(api_key) = config.openai.api_key.as_deref().filter(|k| !k.is_empty()) {
            let provider = OpenAiProvider::new(api_key, client.clone())
                .with_base_url(&config.openai.base_url)
                .with_models(&config.openai.chat_model, &config.openai.deep_research_model)
                .with_background(config.openai.background)
                .with_max_tokens(config.max_output_tokens);
            registry = registry.with_provider("openai", Arc::new(provider));
        }

        if let Some(api_key) = config.anthropic.api_key.as_deref().filter(|k| !k.is_empty()) {
            let provider = AnthropicProvider::new(api_key, client)
                .with_base_url(&config.anthropic.base_url)
                .with_model(&config.anthropic.model)
                .with_web_search_max_uses(config.anthropic.web_search_max_uses)
                .with_max_tokens(config.max_output_tokens);
            registry = registry.with_provider("claude", Arc::new(provider));
        }

        if let Some(fallback) = &config.workflow.fallback_provider {
            registry = registry.with_fallback(fallback);
        }

        if registry.providers.is_empty() {
            tracing::warn!("no LLM provider configured; set OPENAI_API_KEY or ANTHROPIC_API_KEY");
        }

        Ok(registry)
    }

    pub fn with_provider(mut self, name: &str, provider: Arc<dyn ResearchProvider>) -> Self {
        self.providers.insert(normalize_provider_name(name), provider);
        self
    }

    /// Provider used when a plain completion on the requested provider degrades
    pub fn with_fallback(mut self, name: &str) -> Self {
        self.fallback = Some(normalize_provider_name(name));
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ResearchProvider>, ProviderError> {
        let key = normalize_provider_name(name);
        if let Some(provider) = self.providers.get(&key) {
            return Ok(Arc::clone(provider));
        }
        match key.as_str() {
            "openai" | "claude" => Err(ProviderError::NotConfigured(key)),
            _ => Err(ProviderError::UnknownProvider(name.to_string())),
        }
    }

    /// Invoke `provider` in `mode`, downgrading once on degradable errors
    ///
    /// `on_fallback` hears about the degraded call before the fallback
    /// completion is attempted.
    pub async fn invoke(
        &self,
        prompt: &str,
        provider: &str,
        mode: InvokeMode,
        on_fallback: FallbackHook<'_>,
    ) -> Result<ProviderOutput, ProviderError> {
        let primary = self.get(provider)?;

        let result = match mode {
            InvokeMode::DeepResearch => primary.deep_research(prompt).await,
            InvokeMode::StructuredJson => primary
                .structured_completion(prompt, STRUCTURED_JSON_SYSTEM_PROMPT)
                .await
                .map(ProviderOutput::Text),
            InvokeMode::RegularCompletion => primary
                .completion(prompt, COMPLETION_SYSTEM_PROMPT)
                .await
                .map(ProviderOutput::Text),
        };

        let err = match result {
            Ok(output) => return Ok(output),
            Err(err) if err.is_degradable() => err,
            Err(err) => return Err(err),
        };

        let fallback = match mode {
            InvokeMode::DeepResearch | InvokeMode::StructuredJson => Some(Arc::clone(&primary)),
            InvokeMode::RegularCompletion => self.fallback_for(primary.name()),
        };
        let Some(fallback) = fallback else {
            return Err(err);
        };

        tracing::warn!(
            provider = primary.name(),
            fallback = fallback.name(),
            mode = %mode,
            error = %err,
            "provider call degraded; retrying as plain completion"
        );
        on_fallback(primary.name(), mode, &err);

        let system = match mode {
            InvokeMode::StructuredJson => STRUCTURED_JSON_SYSTEM_PROMPT,
            InvokeMode::DeepResearch => DEEP_RESEARCH_SYSTEM_PROMPT,
            InvokeMode::RegularCompletion => COMPLETION_SYSTEM_PROMPT,
        };

        fallback
            .completion(prompt, system)
            .await
            .map(ProviderOutput::Text)
            .map_err(|fallback_err| {
                tracing::error!(
                    provider = fallback.name(),
                    original_error = %err,
                    error = %fallback_err,
                    "fallback completion failed"
                );
                fallback_err
            })
    }

    /// Poll a background job on `provider`
    pub async fn poll_job(&self, provider: &str, job_id: &str) -> Result<JobPoll, ProviderError> {
        self.get(provider)?.poll_job(job_id).await
    }

    fn fallback_for(&self, primary: &str) -> Option<Arc<dyn ResearchProvider>> {
        let name = self.fallback.as_deref()?;
        if name == primary {
            return None;
        }
        self.providers.get(name).cloned()
    }
}
