//! Anthropic Messages API client.

use async_trait::async_trait;
use co_core::traits::ProviderClient;
use co_core::types::{GeneratedTurn, Turn};
use errors::ClientError;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

use super::relative_role;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2_048;

pub struct AnthropicClient {
    name: String,
    model: String,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl AnthropicClient {
    pub fn new(
        name: &str,
        model: &str,
        api_key: String,
        base_url: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        if api_key.is_empty() {
            return Err(ClientError::Provider {
                provider: name.to_string(),
                reason: "API key is required".to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Provider {
                provider: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name: name.to_string(),
            model: model.to_string(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            http,
        })
    }

    fn format_messages(&self, prompt: &str, history: &[Turn]) -> Vec<serde_json::Value> {
        let mut messages: Vec<serde_json::Value> = history
            .iter()
            .map(|turn| {
                json!({
                    "role": relative_role(turn, &self.name),
                    "content": turn.content,
                })
            })
            .collect();
        messages.push(json!({ "role": "user", "content": prompt }));
        messages
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout {
                provider: self.name.clone(),
                timeout_ms: 0,
            }
        } else {
            ClientError::Provider {
                provider: self.name.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    type Error = ClientError;

    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<GeneratedTurn, Self::Error> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": 0.7,
            "messages": self.format_messages(prompt, history),
        });

        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error: ErrorResponse = response.json().await.unwrap_or(ErrorResponse {
                error: ErrorBody::default(),
            });
            let reason = format!("API error {}: {}", status.as_u16(), error.error.message);
            // Upstream throttling and server errors are transient; the
            // rest means the request itself is wrong.
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(ClientError::Provider {
                    provider: self.name.clone(),
                    reason,
                })
            } else {
                Err(ClientError::InvalidResponse {
                    provider: self.name.clone(),
                    reason,
                })
            };
        }

        let parsed: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| ClientError::InvalidResponse {
                    provider: self.name.clone(),
                    reason: e.to_string(),
                })?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let content: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();

        if content.is_empty() {
            return Err(ClientError::InvalidResponse {
                provider: self.name.clone(),
                reason: "empty response content".to_string(),
            });
        }

        Ok(GeneratedTurn {
            content,
            token_count: parsed.usage.input_tokens + parsed.usage.output_tokens,
            latency_ms,
        })
    }
}
