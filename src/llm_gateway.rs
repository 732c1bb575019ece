use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tokio_stream::StreamExt;

use crate::config::LlmSettings;
use crate::errors::AppError;
use crate::models::{ChatMessage, LlmResponse, Role};
use crate::partial_json::{parse_llm_json, PartialResponse, StreamAccumulator};
use crate::prompt::{response_schema, RESPONSE_SCHEMA_NAME, SYSTEM_PROMPT};
use crate::sse;

/// Hosted LLM vendors. Both are reached through the OpenAI chat-completions
/// wire format; Google exposes a compatible endpoint for Gemini.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Google,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-5-nano-2025-08-07",
            ProviderKind::Google => "gemini-2.5-flash",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "google" | "gemini" => Ok(ProviderKind::Google),
            other => anyhow::bail!("LLM_PROVIDER must be 'openai' or 'google', got '{}'", other),
        }
    }
}

/// Events produced while a structured answer streams in.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Raw text fragment exactly as the provider sent it.
    Delta(String),
    /// The visible message changed.
    Partial(PartialResponse),
    /// The complete, validated answer.
    Done(LlmResponse),
}

pub type LlmEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, AppError>> + Send>>;

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for the configured LLM provider.
#[derive(Clone)]
pub struct LlmGateway {
    client: reqwest::Client,
    provider: ProviderKind,
    model: String,
    base_url: String,
    api_key: Option<String>,
}

impl LlmGateway {
    pub fn new(settings: &LlmSettings) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create LLM client: {}", e))
            })?;

        tracing::info!(
            "LLM gateway initialized with provider: {} ({})",
            settings.provider.as_str(),
            settings.model
        );

        Ok(Self {
            client,
            provider: settings.provider,
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// True when no key is configured and canned answers are returned.
    pub fn is_mock(&self) -> bool {
        self.api_key.is_none()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn messages<'a>(history: &'a [ChatMessage]) -> Vec<WireMessage<'a>> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage {
            role: "system",
            content: SYSTEM_PROMPT,
        });
        messages.extend(history.iter().map(|m| WireMessage {
            role: match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            },
            content: &m.content,
        }));
        messages
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, AppError> {
        let api_key = self.api_key.as_deref().unwrap_or_default();

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connect"
                } else {
                    "request"
                };
                AppError::ExternalApiError(format!(
                    "{} {} failed: {}",
                    self.provider.as_str(),
                    kind,
                    e
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "{} returned {}: {}",
                self.provider.as_str(),
                status,
                error_text
            )));
        }

        Ok(response)
    }

    /// Blocking completion parsed into a single structured answer.
    pub async fn complete(&self, history: &[ChatMessage]) -> Result<LlmResponse, AppError> {
        if self.is_mock() {
            tracing::debug!("No API key configured, returning development response");
            return Ok(LlmResponse::development_mock());
        }

        tracing::info!(
            "Calling {} with model: {}",
            self.provider.as_str(),
            self.model
        );

        let body = json!({
            "model": self.model,
            "messages": Self::messages(history),
        });

        let response = self.post(&body).await?;
        let completion: CompletionResponse = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse completion response: {}", e))
        })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                AppError::InvalidLlmResponse("Empty response from LLM".to_string())
            })?;

        parse_llm_json(&content)?.validate()
    }

    /// Schema-constrained streaming completion.
    ///
    /// Errors returned directly mean nothing was streamed yet; errors inside the
    /// stream mean the answer broke off midway.
    pub async fn stream(&self, history: &[ChatMessage]) -> Result<LlmEventStream, AppError> {
        if self.is_mock() {
            tracing::debug!("No API key configured, streaming development response");
            return Ok(single_response_stream(LlmResponse::development_mock()));
        }

        tracing::info!(
            "Streaming from {} with model: {}",
            self.provider.as_str(),
            self.model
        );

        let body = json!({
            "model": self.model,
            "messages": Self::messages(history),
            "stream": true,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": RESPONSE_SCHEMA_NAME,
                    "strict": true,
                    "schema": response_schema(),
                }
            }
        });

        let response = self.post(&body).await?;
        let deltas = sse::content_deltas(response.bytes_stream());

        let events = async_stream::stream! {
            tokio::pin!(deltas);
            let mut accumulator = StreamAccumulator::new();
            let mut last_partial = PartialResponse::default();

            while let Some(delta) = deltas.next().await {
                match delta {
                    Ok(text) => {
                        accumulator.push(&text);
                        yield Ok(StreamEvent::Delta(text));

                        let partial = accumulator.partial();
                        if partial != last_partial {
                            last_partial = partial.clone();
                            yield Ok(StreamEvent::Partial(partial));
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            match accumulator.finish().and_then(LlmResponse::validate) {
                Ok(response) => yield Ok(StreamEvent::Done(response)),
                Err(e) => {
                    tracing::warn!(
                        "Streamed answer failed validation after {} bytes",
                        accumulator.text().len()
                    );
                    yield Err(e);
                }
            }
        };

        Ok(Box::pin(events))
    }
}

/// Streams a ready answer as one delta followed by its final object.
pub fn single_response_stream(response: LlmResponse) -> LlmEventStream {
    let text = serde_json::to_string(&response).unwrap_or_default();
    let partial = PartialResponse {
        message: Some(response.client_response.message.clone()),
        is_final_answer: Some(response.client_response.is_final_answer),
    };
    let events = vec![
        Ok(StreamEvent::Delta(text)),
        Ok(StreamEvent::Partial(partial)),
        Ok(StreamEvent::Done(response)),
    ];
    Box::pin(tokio_stream::iter(events))
}
