use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{instrument, warn};

use crate::types::{Generation, LlmError, TextGenerator};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

fn build_http(timeout_ms: u64) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| LlmError::ApiError(e.to_string()))
}

/// POST `payload` with retries on 429, timeouts and transport errors.
async fn send_with_retry(
    request: impl Fn() -> RequestBuilder,
    max_retries: u32,
) -> Result<Value, LlmError> {
    let mut attempt = 0u32;
    loop {
        match request().send().await {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 && attempt < max_retries {
                        attempt += 1;
                        sleep(Duration::from_millis(150 * u64::from(attempt))).await;
                        continue;
                    }
                    return Err(LlmError::HttpStatus {
                        status: status.as_u16(),
                        body,
                    });
                }
                return response
                    .json()
                    .await
                    .map_err(|e| LlmError::ApiError(e.to_string()));
            }
            Err(e) => {
                if attempt < max_retries {
                    attempt += 1;
                    sleep(Duration::from_millis(150 * u64::from(attempt))).await;
                    continue;
                }
                if e.is_timeout() {
                    return Err(LlmError::Timeout);
                }
                return Err(LlmError::ApiError(e.to_string()));
            }
        }
    }
}

// ── Anthropic ─────────────────────────────────────────────────────────

pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

impl AnthropicClient {
    pub fn new(
        api_key: String,
        model: String,
        timeout_ms: u64,
        max_tokens: u32,
        max_retries: u32,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_http(timeout_ms)?,
            api_key,
            model,
            max_tokens,
            max_retries,
        })
    }

    fn extract_text_content(response_body: &Value) -> Result<&str, LlmError> {
        response_body
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|items| items.iter().find(|item| item["type"] == "text"))
            .and_then(|item| item["text"].as_str())
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl TextGenerator for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, instructions: &str, input: &str) -> Result<Generation, LlmError> {
        let payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": instructions,
            "messages": [{ "role": "user", "content": input }]
        });

        let body = send_with_retry(
            || {
                self.client
                    .post(ANTHROPIC_API_URL)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", "2023-06-01")
                    .header("content-type", "application/json")
                    .json(&payload)
            },
            self.max_retries,
        )
        .await?;

        Ok(Generation {
            content: Self::extract_text_content(&body)?.to_string(),
            model: self.model.clone(),
            cached: false,
        })
    }
}

// ── OpenAI ────────────────────────────────────────────────────────────

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        model: String,
        timeout_ms: u64,
        max_tokens: u32,
        max_retries: u32,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_http(timeout_ms)?,
            api_key,
            model,
            max_tokens,
            max_retries,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, instructions: &str, input: &str) -> Result<Generation, LlmError> {
        let payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": instructions },
                { "role": "user", "content": input }
            ]
        });

        let body = send_with_retry(
            || {
                self.client
                    .post(OPENAI_API_URL)
                    .bearer_auth(&self.api_key)
                    .json(&payload)
            },
            self.max_retries,
        )
        .await?;

        let content = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or(LlmError::EmptyResponse)?;

        Ok(Generation {
            content: content.to_string(),
            model: self.model.clone(),
            cached: false,
        })
    }
}

// ── Provider chain ────────────────────────────────────────────────────

/// Tries each provider in order and returns the first success.
pub struct FallbackChain {
    providers: Vec<Arc<dyn TextGenerator>>,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn TextGenerator>>) -> Self {
        Self { providers }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[async_trait]
impl TextGenerator for FallbackChain {
    fn name(&self) -> &str {
        "fallback-chain"
    }

    async fn generate(&self, instructions: &str, input: &str) -> Result<Generation, LlmError> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.generate(instructions, input).await {
                Ok(generation) => return Ok(generation),
                Err(e) => {
                    warn!("{} generation failed, trying next provider: {}", provider.name(), e);
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }
        if failures.is_empty() {
            return Err(LlmError::Unavailable(
                "set ANTHROPIC_API_KEY or OPENAI_API_KEY, or run offline".into(),
            ));
        }
        Err(LlmError::Unavailable(failures.join("; ")))
    }
}
