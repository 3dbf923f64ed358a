//! Google Gemini generateContent API client.

use async_trait::async_trait;
use co_core::traits::ProviderClient;
use co_core::types::{GeneratedTurn, Turn};
use errors::ClientError;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

use super::relative_role;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_OUTPUT_TOKENS: u32 = 2_048;

pub struct GoogleClient {
    name: String,
    model: String,
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct UsageMetadata {
    #[serde(default, rename = "totalTokenCount")]
    total_token_count: u32,
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

impl GoogleClient {
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

    fn format_contents(&self, prompt: &str, history: &[Turn]) -> Vec<serde_json::Value> {
        let mut contents: Vec<serde_json::Value> = history
            .iter()
            .map(|turn| {
                // Gemini names the assistant role "model".
                let role = if relative_role(turn, &self.name) == "assistant" {
                    "model"
                } else {
                    "user"
                };
                json!({
                    "role": role,
                    "parts": [{ "text": turn.content }],
                })
            })
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": prompt }] }));
        contents
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
impl ProviderClient for GoogleClient {
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
            "contents": self.format_contents(prompt, history),
            "generationConfig": {
                "temperature": 0.7,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
            },
        });

        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model
        );

        let started = Instant::now();
        let response = self
            .http
            .post(url)
            .query(&[("key", &self.api_key)])
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

        let parsed: GenerateContentResponse =
            response
                .json()
                .await
                .map_err(|e| ClientError::InvalidResponse {
                    provider: self.name.clone(),
                    reason: e.to_string(),
                })?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let candidate = parsed
            .candidates
            .first()
            .ok_or_else(|| ClientError::InvalidResponse {
                provider: self.name.clone(),
                reason: "no candidates returned".to_string(),
            })?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(ClientError::InvalidResponse {
                provider: self.name.clone(),
                reason: "content filtered for safety".to_string(),
            });
        }

        let content: String = candidate
            .content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .map(|part| part.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default();

        if content.is_empty() {
            return Err(ClientError::InvalidResponse {
                provider: self.name.clone(),
                reason: "empty response content".to_string(),
            });
        }

        Ok(GeneratedTurn {
            content,
            token_count: parsed.usage_metadata.total_token_count,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: String) -> GoogleClient {
        GoogleClient::new(
            "google",
            "gemini-pro",
            "test-key".to_string(),
            Some(base_url),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn own_turns_map_to_the_model_role() {
        let client = client("http://localhost".to_string());
        let history = vec![Turn {
            sequence: 1,
            provider: "google".to_string(),
            content: "opening".to_string(),
            token_count: 5,
            latency_ms: 50,
            timestamp: 0,
        }];
        let contents = client.format_contents("respond", &history);
        assert_eq!(contents[0]["role"], "model");
        assert_eq!(contents[1]["role"], "user");
    }

    #[tokio::test]
    async fn parses_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "An interesting angle." }] },
                    "finishReason": "STOP"
                }],
                "usageMetadata": { "totalTokenCount": 42 }
            })))
            .mount(&server)
            .await;

        let client = client(server.uri());
        let generated = client.generate("start", &[]).await.unwrap();
        assert_eq!(generated.content, "An interesting angle.");
        assert_eq!(generated.token_count, 42);
    }

    #[tokio::test]
    async fn safety_filtered_response_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "finishReason": "SAFETY" }]
            })))
            .mount(&server)
            .await;

        let client = client(server.uri());
        let err = client.generate("p", &[]).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client(server.uri());
        let err = client.generate("p", &[]).await.unwrap_err();
        assert!(err.is_transient());
    }
}
