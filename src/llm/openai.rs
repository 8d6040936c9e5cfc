//! HTTP adapter for OpenAI-compatible chat-completion endpoints.
//!
//! Transient failures (connect errors, 5xx, 429) are retried by
//! reqwest-retry; everything else surfaces as `AppError::Upstream`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::{json, Value};

use super::{CompletionClient, Prompt};
use crate::errors::AppError;

/// Low temperature keeps the three-line format stable.
const TEMPERATURE: f64 = 0.3;

/// Error bodies are truncated to this many chars in logs and errors.
const MAX_ERROR_BODY_CHARS: usize = 300;

pub struct OpenAiCompatClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("insightd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn complete(&self, prompt: &Prompt, model: &str) -> Result<String, AppError> {
        let body = json!({
            "model": model,
            "temperature": TEMPERATURE,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
        });
        let payload = serde_json::to_vec(&body).map_err(|e| AppError::Internal(e.into()))?;

        let mut req = self
            .client
            .post(self.endpoint())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::warn!("LLM request failed after retries: {}", e);
            AppError::Upstream(e.to_string())
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AppError::Upstream(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            let snippet: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            tracing::warn!(
                status = status.as_u16(),
                error_type = classify_status(status.as_u16()),
                model = model,
                "LLM returned non-success status"
            );
            return Err(AppError::Upstream(format!(
                "upstream returned {}: {}",
                status.as_u16(),
                snippet
            )));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| AppError::Upstream(format!("invalid JSON from upstream: {}", e)))?;

        extract_completion_text(&json)
            .ok_or_else(|| AppError::Upstream("response carried no completion text".into()))
    }
}

/// Pull the assistant text out of a completion body.
///
/// OpenAI: `choices[0].message.content`. Anthropic-style bodies
/// (`content[*].text`) are accepted too, concatenated in order.
pub fn extract_completion_text(json: &Value) -> Option<String> {
    if let Some(content) = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        return Some(content.to_string());
    }

    let blocks = json.get("content").and_then(|c| c.as_array())?;
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join(""))
    }
}

/// Coarse label for log fields.
fn classify_status(status: u16) -> &'static str {
    match status {
        401 | 403 => "invalid_auth",
        404 => "model_not_found",
        408 => "timeout",
        413 => "context_too_long",
        429 => "rate_limit",
        400..=499 => "invalid_request",
        500..=599 => "server_error",
        _ => "other",
    }
}
