//! Anthropic Messages API adapter
//!
//! Deep research uses the server-side web search tool. Anthropic has no
//! background mode, so every call returns text.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ProviderError, ProviderOutput, ResearchProvider, DEEP_RESEARCH_SYSTEM_PROMPT};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    model: String,
    web_search_max_uses: u32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, client: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            web_search_max_uses: 10,
            max_tokens: 8000,
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_web_search_max_uses(mut self, max_uses: u32) -> Self {
        self.web_search_max_uses = max_uses;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn messages(&self, body: Value) -> Result<String, ProviderError> {
        let url = format!("{}/messages", self.base_url);
        let resp = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        let response: Value = resp.json().await.map_err(ProviderError::from_reqwest)?;
        parse_messages_response(&response)
    }

    fn request(&self, prompt: &str, system: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": prompt }],
        })
    }
}

/// Joined `text` blocks of a Messages API response
pub fn parse_messages_response(response: &Value) -> Result<String, ProviderError> {
    let blocks = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::InvalidResponse("response has no content".to_string()))?;

    let text: Vec<&str> = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();

    if text.is_empty() {
        return Err(ProviderError::InvalidResponse(
            "response has no text blocks".to_string(),
        ));
    }
    Ok(text.join(""))
}

#[async_trait]
impl ResearchProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "claude"
    }

    async fn deep_research(&self, prompt: &str) -> Result<ProviderOutput, ProviderError> {
        let mut body = self.request(prompt, DEEP_RESEARCH_SYSTEM_PROMPT);
        body["tools"] = json!([{
            "type": "web_search_20250305",
            "name": "web_search",
            "max_uses": self.web_search_max_uses,
        }]);

        tracing::debug!(model = %self.model, "anthropic deep research request");
        self.messages(body).await.map(ProviderOutput::Text)
    }

    async fn structured_completion(&self, prompt: &str, system: &str) -> Result<String, ProviderError> {
        self.messages(self.request(prompt, system)).await
    }

    async fn completion(&self, prompt: &str, system: &str) -> Result<String, ProviderError> {
        self.messages(self.request(prompt, system)).await
    }
}
