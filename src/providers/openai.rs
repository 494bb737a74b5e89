//! Direct OpenAI chat-completions streaming.
//!
//! The response body is consumed as raw bytes. [`OpenAiLineDecoder`] turns
//! arbitrarily sized chunks into `data: {...}` lines and extracts the text of
//! `choices[0].delta.content`, stopping at the `[DONE]` sentinel.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::config::OpenAiConfig;
use crate::errors::RelayError;
use crate::providers::{
    encode_line_breaks, ensure_success, ChatCompletionChunk, ChatMessage, ChunkChoice, Provider,
};

/// In-band end-of-generation marker.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data: ";

/// Longest unterminated line the decoder will buffer.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Raw response body chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, RelayError>>;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    stream: bool,
}

/// Client for the OpenAI chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { http, config }
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Start a streaming completion for `prompt` and return the raw body.
    pub async fn stream_chat(&self, prompt: &str) -> Result<ByteStream, RelayError> {
        let provider = Provider::OpenAi;
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(RelayError::NotConfigured {
                provider,
                missing: "OPENAI_API_KEY",
            })?;

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![ChatMessage::user(prompt)],
            temperature: self.config.temperature,
            stream: true,
        };

        debug!(%url, model = %self.config.model, "Opening OpenAI stream");

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|source| RelayError::Transport { provider, source })?;
        let response = ensure_success(provider, response).await?;

        Ok(response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|source| RelayError::Transport { provider, source }))
            .boxed())
    }
}

/// Result of decoding one complete line.
#[derive(Debug)]
pub enum Decoded {
    /// Text fragment with newlines already replaced.
    Text(String),
    /// The `[DONE]` sentinel.
    Done,
    /// The line could not be used; nothing after it is decoded.
    Failed(RelayError),
}

impl Decoded {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Decoded::Done | Decoded::Failed(_))
    }
}

/// Incremental decoder for the OpenAI streaming body.
///
/// Partial lines are buffered across chunks. After a terminal result the
/// decoder is finished: the rest of that chunk and every later chunk is
/// discarded.
#[derive(Debug, Default)]
pub struct OpenAiLineDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no newline.
    scanned: usize,
    finished: bool,
}

impl OpenAiLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one body chunk and decode every line it completes.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }

        self.buf.extend_from_slice(chunk);

        let mut line_start = 0;
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let decoded = decode_line(&self.buf[line_start..end]);
            self.scanned = end + 1;
            line_start = self.scanned;
            let Some(decoded) = decoded else {
                continue;
            };
            let terminal = decoded.is_terminal();
            out.push(decoded);
            if terminal {
                self.finish_discarding();
                return out;
            }
        }

        self.buf.drain(..line_start);
        self.scanned = self.buf.len();
        if self.buf.len() > MAX_LINE_BYTES {
            out.push(Decoded::Failed(RelayError::LineTooLong {
                limit: MAX_LINE_BYTES,
            }));
            self.finish_discarding();
        }
        out
    }

    /// Decode an unterminated final line left at end of stream.
    pub fn finish(&mut self) -> Option<Decoded> {
        if self.finished {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        self.scanned = 0;
        self.finished = true;
        decode_line(&line)
    }

    fn finish_discarding(&mut self) {
        if !self.buf.is_empty() {
            debug!(bytes = self.buf.len(), "Discarding data after end of stream");
        }
        self.buf.clear();
        self.scanned = 0;
        self.finished = true;
    }
}

fn decode_line(raw: &[u8]) -> Option<Decoded> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim_end_matches('\r');
    // Blank separators and SSE comments.
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }

    let message = line.strip_prefix(DATA_PREFIX).unwrap_or(line);
    if message == DONE_SENTINEL {
        return Some(Decoded::Done);
    }

    let chunk: ChatCompletionChunk = match serde_json::from_str(message) {
        Ok(chunk) => chunk,
        Err(source) => {
            return Some(Decoded::Failed(RelayError::MalformedLine {
                line: message.to_string(),
                source,
            }))
        }
    };

    if let Some(error) = chunk.error {
        return Some(Decoded::Failed(RelayError::Upstream {
            provider: Provider::OpenAi,
            status: StatusCode::OK,
            body: json!({ "error": error }),
        }));
    }

    chunk
        .choices
        .first()
        .and_then(ChunkChoice::content)
        .map(|content| Decoded::Text(encode_line_breaks(content)))
}
