//! Application configuration
//!
//! Values come from three layers, later layers winning:
//!
//! 1. built-in defaults
//! 2. an optional YAML settings file
//! 3. environment variables (`.env` is loaded by the binary before parsing)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::providers::{anthropic, normalize_provider_name, openai};

pub const ENV_DATABASE_PATH: &str = "OUTREACH_DATABASE_PATH";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const ENV_OPENAI_CHAT_MODEL: &str = "OPENAI_CHAT_MODEL";
pub const ENV_OPENAI_DEEP_RESEARCH_MODEL: &str = "OPENAI_DEEP_RESEARCH_MODEL";
pub const ENV_ANTHROPIC_MODEL: &str = "ANTHROPIC_MODEL";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "OUTREACH_REQUEST_TIMEOUT_SECS";
pub const ENV_STALENESS_MINUTES: &str = "OUTREACH_STALENESS_MINUTES";
pub const ENV_DEFAULT_PROVIDER: &str = "OUTREACH_DEFAULT_PROVIDER";
pub const ENV_FALLBACK_PROVIDER: &str = "OUTREACH_FALLBACK_PROVIDER";
pub const ENV_OPENAI_BACKGROUND: &str = "OUTREACH_OPENAI_BACKGROUND";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub openai: OpenAiSettings,
    pub anthropic: AnthropicSettings,
    pub max_output_tokens: u32,
    pub request_timeout_secs: u64,
    pub workflow: WorkflowSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub chat_model: String,
    pub deep_research_model: String,
    /// Run deep research as a background response
    pub background: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub web_search_max_uses: u32,
}

/// Knobs read by the orchestrator and the guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Age after which an in-progress marker is considered stuck
    pub staleness_minutes: i64,
    pub default_provider: String,
    /// Provider used when a plain completion degrades
    pub fallback_provider: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            openai: OpenAiSettings::default(),
            anthropic: AnthropicSettings::default(),
            max_output_tokens: 8000,
            request_timeout_secs: 600,
            workflow: WorkflowSettings::default(),
        }
    }
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: openai::DEFAULT_BASE_URL.to_string(),
            chat_model: openai::DEFAULT_CHAT_MODEL.to_string(),
            deep_research_model: openai::DEFAULT_DEEP_RESEARCH_MODEL.to_string(),
            background: true,
        }
    }
}

impl Default for AnthropicSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: anthropic::DEFAULT_BASE_URL.to_string(),
            model: anthropic::DEFAULT_MODEL.to_string(),
            web_search_max_uses: 10,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            staleness_minutes: 30,
            default_provider: "openai".to_string(),
            fallback_provider: None,
        }
    }
}

impl WorkflowSettings {
    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.staleness_minutes)
    }
}

impl AppConfig {
    /// Settings file (if any) overridden by the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                Self::from_yaml_str(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally `std::env::var`)
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(path) = get(ENV_DATABASE_PATH) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(key) = get(ENV_OPENAI_API_KEY) {
            self.openai.api_key = Some(key);
        }
        if let Some(key) = get(ENV_ANTHROPIC_API_KEY) {
            self.anthropic.api_key = Some(key);
        }
        if let Some(model) = get(ENV_OPENAI_CHAT_MODEL) {
            self.openai.chat_model = model;
        }
        if let Some(model) = get(ENV_OPENAI_DEEP_RESEARCH_MODEL) {
            self.openai.deep_research_model = model;
        }
        if let Some(model) = get(ENV_ANTHROPIC_MODEL) {
            self.anthropic.model = model;
        }
        if let Some(secs) = get(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = secs
                .parse()
                .with_context(|| format!("{} must be a number of seconds", ENV_REQUEST_TIMEOUT_SECS))?;
        }
        if let Some(minutes) = get(ENV_STALENESS_MINUTES) {
            self.workflow.staleness_minutes = minutes
                .parse()
                .with_context(|| format!("{} must be a number of minutes", ENV_STALENESS_MINUTES))?;
        }
        if let Some(provider) = get(ENV_DEFAULT_PROVIDER) {
            self.workflow.default_provider = normalize_provider_name(&provider);
        }
        if let Some(provider) = get(ENV_FALLBACK_PROVIDER) {
            self.workflow.fallback_provider = Some(normalize_provider_name(&provider));
        }
        if let Some(flag) = get(ENV_OPENAI_BACKGROUND) {
            self.openai.background = parse_bool(&flag)
                .with_context(|| format!("{} must be true or false", ENV_OPENAI_BACKGROUND))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workflow.staleness_minutes <= 0 {
            anyhow::bail!("staleness_minutes must be positive");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("invalid boolean '{}'", other),
    }
}

/// `~/.outreach-research/research.db`, or the working directory without a home
pub fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".outreach-research"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("research.db")
}
