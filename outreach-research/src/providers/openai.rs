//! OpenAI adapter
//!
//! Deep research goes through the Responses API with the web search tool and
//! may run as a background job. Structured and plain completions use chat
//! completions.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{JobPoll, ProviderError, ProviderOutput, ResearchProvider, DEEP_RESEARCH_SYSTEM_PROMPT};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub const DEFAULT_DEEP_RESEARCH_MODEL: &str = "o4-mini-deep-research";

pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    chat_model: String,
    deep_research_model: String,
    background: bool,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, client: reqwest::Client) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            deep_research_model: DEFAULT_DEEP_RESEARCH_MODEL.to_string(),
            background: true,
            max_tokens: 8000,
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(mut self, chat_model: &str, deep_research_model: &str) -> Self {
        self.chat_model = chat_model.to_string();
        self.deep_research_model = deep_research_model.to_string();
        self
    }

    /// Queue deep research as a background response instead of waiting for it
    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
        let resp = request
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        resp.json::<Value>().await.map_err(ProviderError::from_reqwest)
    }

    async fn chat(&self, prompt: &str, system: &str, json_mode: bool) -> Result<String, ProviderError> {
        let mut body = json!({
            "model": self.chat_model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": prompt }
            ],
            "max_tokens": self.max_tokens,
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(model = %self.chat_model, json_mode, "openai chat completion");
        let response = self.send(self.client.post(url).json(&body)).await?;
        parse_chat_response(&response)
    }
}

/// `choices[0].message.content` of a chat completion
pub fn parse_chat_response(response: &Value) -> Result<String, ProviderError> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidResponse("chat response missing content".to_string()))
}

/// Concatenated `output_text` parts of the message items of a Responses API answer
pub fn extract_output_text(response: &Value) -> Option<String> {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return Some(text.to_string());
        }
    }

    let parts: Vec<&str> = response
        .get("output")?
        .as_array()?
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Map a Responses API object onto a job state
pub fn parse_response_status(response: &Value) -> Result<JobPoll, ProviderError> {
    let status = response
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("completed");

    match status {
        "queued" | "in_progress" => Ok(JobPoll::Pending),
        "completed" => extract_output_text(response)
            .map(JobPoll::Completed)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("completed response has no output text".to_string())
            }),
        other => {
            let reason = response
                .pointer("/error/message")
                .and_then(Value::as_str)
                .or_else(|| response.pointer("/incomplete_details/reason").and_then(Value::as_str))
                .unwrap_or("no details");
            Ok(JobPoll::Failed(format!("{}: {}", other, reason)))
        }
    }
}

#[async_trait]
impl ResearchProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn deep_research(&self, prompt: &str) -> Result<ProviderOutput, ProviderError> {
        let body = json!({
            "model": self.deep_research_model,
            "instructions": DEEP_RESEARCH_SYSTEM_PROMPT,
            "input": prompt,
            "background": self.background,
            "tools": [{ "type": "web_search_preview" }],
        });

        let url = format!("{}/responses", self.base_url);
        tracing::debug!(
            model = %self.deep_research_model,
            background = self.background,
            "openai deep research request"
        );
        let response = self.send(self.client.post(url).json(&body)).await?;

        match parse_response_status(&response)? {
            JobPoll::Pending => {
                let job_id = response
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ProviderError::InvalidResponse("queued response has no id".to_string())
                    })?;
                Ok(ProviderOutput::BackgroundJob {
                    job_id: job_id.to_string(),
                })
            }
            JobPoll::Completed(text) => Ok(ProviderOutput::Text(text)),
            JobPoll::Failed(reason) => Err(ProviderError::InvalidResponse(reason)),
        }
    }

    async fn structured_completion(&self, prompt: &str, system: &str) -> Result<String, ProviderError> {
        self.chat(prompt, system, true).await
    }

    async fn completion(&self, prompt: &str, system: &str) -> Result<String, ProviderError> {
        self.chat(prompt, system, false).await
    }

    async fn poll_job(&self, job_id: &str) -> Result<JobPoll, ProviderError> {
        let url = format!("{}/responses/{}", self.base_url, job_id);
        let response = self.send(self.client.get(url)).await?;
        parse_response_status(&response)
    }
}
