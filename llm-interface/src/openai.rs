use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use research_core::{LlmConfig, LlmError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::{CompletionOracle, ResponseSchema};

const PROVIDER: &str = "openai";
const DEFAULT_RETRY_AFTER_SECS: u64 = 20;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

/// OpenAI-compatible chat completions client.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            http_client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("Sending chat completion to {} with model {}", url, self.model);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::RequestTimeout {
                        provider: PROVIDER.to_string(),
                    }
                } else {
                    LlmError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            error!("Chat completion failed with status {}: {}", status, body);
            return Err(self.status_error(status, retry_after, body));
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponseFormat {
                    provider: PROVIDER.to_string(),
                    details: e.to_string(),
                })?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| LlmError::EmptyResponse {
                provider: PROVIDER.to_string(),
            })?;

        if let Some(refusal) = message.refusal {
            warn!("Model refused the request: {}", refusal);
            return Err(LlmError::ContentFiltered { reason: refusal });
        }

        message
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyResponse {
                provider: PROVIDER.to_string(),
            })
    }

    fn status_error(&self, status: StatusCode, retry_after: Option<u64>, body: String) -> LlmError {
        match status.as_u16() {
            401 | 403 => LlmError::InvalidApiKey {
                provider: PROVIDER.to_string(),
            },
            404 => LlmError::ModelNotAvailable {
                model: self.model.clone(),
            },
            429 => LlmError::RateLimitExceeded {
                provider: PROVIDER.to_string(),
                retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            },
            code if code >= 500 => LlmError::ServiceUnavailable {
                provider: PROVIDER.to_string(),
            },
            _ => LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("status {}: {}", status, body),
            },
        }
    }
}

#[async_trait]
impl CompletionOracle for OpenAiProvider {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &ResponseSchema,
    ) -> Result<Value, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.0,
            max_tokens: None,
            response_format: Some(serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": true,
                    "schema": schema.schema,
                }
            })),
        };

        let content = self.send(&request).await?;
        serde_json::from_str(&content).map_err(|e| LlmError::InvalidResponseFormat {
            provider: PROVIDER.to_string(),
            details: e.to_string(),
        })
    }

    async fn complete_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature,
            max_tokens: Some(max_tokens),
            response_format: None,
        };

        self.send(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(&LlmConfig {
            api_key: "test-key".to_string(),
            base_url: server.uri(),
            model: "gpt-4o-mini".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    fn schema() -> ResponseSchema {
        ResponseSchema {
            name: "scores",
            schema: serde_json::json!({"type": "object"}),
        }
    }

    fn completion(content: &str) -> Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content, "refusal": null}}]
        })
    }

    #[tokio::test]
    async fn test_structured_completion_parses_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion(r#"{"scores": []}"#)),
            )
            .mount(&server)
            .await;

        let value = provider(&server)
            .complete_json("sys", "user", &schema())
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({"scores": []}));
    }

    #[tokio::test]
    async fn test_malformed_structured_content_is_invalid_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{not json")))
            .mount(&server)
            .await;

        let result = provider(&server).complete_json("sys", "user", &schema()).await;
        assert!(matches!(
            result,
            Err(LlmError::InvalidResponseFormat { .. })
        ));
    }

    #[tokio::test]
    async fn test_rate_limit_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let result = provider(&server)
            .complete_text("sys", "user", 0.5, 100)
            .await;
        assert!(matches!(
            result,
            Err(LlmError::RateLimitExceeded { retry_after: 7, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_choices_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let result = provider(&server)
            .complete_text("sys", "user", 0.5, 100)
            .await;
        assert!(matches!(result, Err(LlmError::EmptyResponse { .. })));
    }
}
