//! Upstream LLM providers.
//!
//! - [`openai`]: direct OpenAI API, decoded line by line from raw bytes
//! - [`azure`]: Azure OpenAI deployment, consumed as parsed SSE events

pub mod azure;
pub mod openai;

use std::fmt;

use reqwest::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RelayError;

/// Marker substituted for `\n` in relayed text.
pub const LINE_BREAK: &str = "<br>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Azure,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "openai"),
            Provider::Azure => write!(f, "azure"),
        }
    }
}

/// Replace every newline so the browser renders it as a line break.
pub fn encode_line_breaks(text: &str) -> String {
    text.replace('\n', LINE_BREAK)
}

/// Chat message sent upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One streamed chat-completion chunk. Both providers share this wire shape.
///
/// Any well-formed JSON deserializes: fields that are missing, `null` or of
/// the wrong type read as "no content" rather than failing the stream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "Value")]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChunkChoice>,

    /// Error object some deployments embed mid-stream instead of a chunk.
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkChoice {
    pub delta: Option<ChunkDelta>,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkDelta {
    pub content: Option<String>,
}

impl From<Value> for ChatCompletionChunk {
    fn from(value: Value) -> Self {
        let choices = value
            .get("choices")
            .and_then(Value::as_array)
            .map(|choices| choices.iter().map(ChunkChoice::from_value).collect())
            .unwrap_or_default();
        let error = value.get("error").filter(|e| !e.is_null()).cloned();
        Self { choices, error }
    }
}

impl ChunkChoice {
    fn from_value(choice: &Value) -> Self {
        let delta = choice.get("delta").filter(|d| d.is_object()).map(|d| ChunkDelta {
            content: d.get("content").and_then(Value::as_str).map(str::to_string),
        });
        Self { delta }
    }

    /// The incremental text, if any was generated.
    pub fn content(&self) -> Option<&str> {
        self.delta
            .as_ref()
            .and_then(|d| d.content.as_deref())
            .filter(|c| !c.is_empty())
    }
}

/// Pass a successful response through; turn any other status into
/// [`RelayError::Upstream`] carrying the body (JSON when it parses, raw text otherwise).
pub(crate) async fn ensure_success(
    provider: Provider,
    response: Response,
) -> Result<Response, RelayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response
        .text()
        .await
        .map_err(|source| RelayError::Transport { provider, source })?;
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

    tracing::warn!(%provider, %status, body = %body, "Upstream request rejected");
    Err(RelayError::Upstream {
        provider,
        status,
        body,
    })
}
