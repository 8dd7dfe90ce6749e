//! Groq chat-completion API client
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol with a bearer
//! token. One request per model, no retries.

use crate::dispatch::{ChatBackend, ModelError, ModelSpec, VisionPrompt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error};

/// Default chat-completion endpoint
pub const DEFAULT_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default completion budget per answer
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Upstream error bodies are cut to this many characters in logs
const ERROR_BODY_LOG_CHARS: usize = 500;

/// Bearer credential for the chat-completion API
///
/// `Debug` output never contains the key itself.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

/// Configuration for the Groq client
#[derive(Debug, Clone)]
pub struct GroqConfig {
    /// Chat-completion endpoint (default: [`DEFAULT_API_URL`])
    pub api_url: String,
    /// Bearer token
    pub api_key: ApiKey,
    /// Timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Completion budget (default: 1000)
    pub max_tokens: u32,
    /// Sampling temperature, provider default when unset
    pub temperature: Option<f32>,
}

impl GroqConfig {
    /// Config with default endpoint and limits
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
        }
    }
}

/// Groq API client
pub struct GroqClient {
    config: GroqConfig,
    client: reqwest::Client,
}

impl GroqClient {
    /// Create a new Groq client
    pub fn new(config: GroqConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &GroqConfig {
        &self.config
    }

    fn build_request(&self, model: &ModelSpec, prompt: &VisionPrompt) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: model.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: prompt.query.clone(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: prompt.image_url.clone(),
                        },
                    },
                ],
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }
}

#[async_trait]
impl ChatBackend for GroqClient {
    async fn complete(&self, model: &ModelSpec, prompt: &VisionPrompt) -> Result<String, ModelError> {
        let request = self.build_request(model, prompt);
        debug!("Sending {} request to {}", model.model, self.config.api_url);

        let transport = |err: reqwest::Error| {
            error!("API request failed for {}: {}", model.id, err);
            ModelError::Transport {
                model: model.id.clone(),
                detail: err.to_string(),
            }
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(self.config.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(ERROR_BODY_LOG_CHARS).collect();
            error!("Error from {} API: {} - {}", model.id, status, body);
            return Err(ModelError::Status {
                model: model.id.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        extract_answer(&body).map_err(|reason| {
            error!("Malformed response from {} API: {}", model.id, reason);
            ModelError::Parse {
                model: model.id.clone(),
                reason,
            }
        })
    }
}

/// Pull the first choice's message content out of a completion body
fn extract_answer(body: &[u8]) -> Result<String, String> {
    let response: ChatCompletionResponse =
        serde_json::from_slice(body).map_err(|err| err.to_string())?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| "response contained no choices".to_string())?;

    choice
        .message
        .content
        .ok_or_else(|| "response message had no content".to_string())
}

/// Chat-completion request body
#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
struct ImageUrl {
    url: String,
}

/// Chat-completion response body, only the fields read here
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
