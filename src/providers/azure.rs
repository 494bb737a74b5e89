//! Azure OpenAI chat-completions streaming.
//!
//! Unlike the direct API, the body is consumed as already-framed SSE events
//! and handed to the relay as a sequence of parsed completion chunks. The
//! sequence ends when the service sends `[DONE]` or closes the body.

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::config::AzureConfig;
use crate::errors::RelayError;
use crate::providers::openai::DONE_SENTINEL;
use crate::providers::{ensure_success, ChatCompletionChunk, ChatMessage, Provider};

/// Parsed completion events in arrival order.
pub type CompletionEvents = BoxStream<'static, Result<ChatCompletionChunk, RelayError>>;

#[derive(Debug, Serialize)]
struct AzureChatRequest {
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    stream: bool,
}

/// Client for one Azure OpenAI chat deployment.
#[derive(Debug, Clone)]
pub struct AzureClient {
    http: reqwest::Client,
    config: AzureConfig,
}

impl AzureClient {
    pub fn new(http: reqwest::Client, config: AzureConfig) -> Self {
        Self { http, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.endpoint.is_some() && self.config.api_key.is_some()
    }

    /// Start a streaming completion for `prompt`.
    pub async fn stream_chat(&self, prompt: &str) -> Result<CompletionEvents, RelayError> {
        let provider = Provider::Azure;
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or(RelayError::NotConfigured {
                provider,
                missing: "AZURE_OPENAI_ENDPOINT",
            })?;
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(RelayError::NotConfigured {
                provider,
                missing: "AZURE_OPENAI_KEY",
            })?;

        let url = format!(
            "{}/openai/deployments/{}/chat/completions",
            endpoint.trim_end_matches('/'),
            self.config.deployment
        );
        let request = AzureChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            max_tokens: self.config.max_tokens,
            stream: true,
        };

        debug!(%url, deployment = %self.config.deployment, "Opening Azure stream");

        let response = self
            .http
            .post(&url)
            .query(&[("api-version", self.config.api_version.as_str())])
            .header("api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|source| RelayError::Transport { provider, source })?;
        let response = ensure_success(provider, response).await?;

        Ok(completion_events(response.bytes_stream()))
    }
}

/// Frame an SSE body into completion events.
pub fn completion_events<S, E>(body: S) -> CompletionEvents
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    body.eventsource()
        .take_while(|item| {
            let done = matches!(item, Ok(event) if event.data.trim() == DONE_SENTINEL);
            future::ready(!done)
        })
        .filter_map(|item| {
            let parsed = match item {
                Ok(event) => parse_event_data(&event.data),
                Err(e) => Some(Err(RelayError::EventStream {
                    provider: Provider::Azure,
                    message: e.to_string(),
                })),
            };
            future::ready(parsed)
        })
        .boxed()
}

fn parse_event_data(data: &str) -> Option<Result<ChatCompletionChunk, RelayError>> {
    if data.trim().is_empty() {
        return None;
    }
    let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(source) => {
            return Some(Err(RelayError::MalformedLine {
                line: data.to_string(),
                source,
            }))
        }
    };
    match chunk.error {
        Some(error) => Some(Err(RelayError::Upstream {
            provider: Provider::Azure,
            status: StatusCode::OK,
            body: json!({ "error": error }),
        })),
        None => Some(Ok(chunk)),
    }
}
