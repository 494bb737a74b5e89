//! Relay errors and the error classifier.
//!
//! Every failure on a relay path is reported to the browser as one display
//! string. [`RelayError`] covers what this crate raises; [`ErrorShape`]
//! classifies the dynamic JSON form of an error so the same precedence applies
//! to bodies returned by either provider.

use std::borrow::Cow;

use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use crate::providers::Provider;

/// Shown instead of the provider's text when Azure's content moderation rejects a request.
pub const CONTENT_FILTER_MESSAGE: &str = "Whoops, something strange was said in the dialogue. It's time for a pause while our chatbot undergoes repairs.";

pub const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Error, Debug)]
pub enum RelayError {
    /// Non-success HTTP status, or an error object embedded in the stream.
    #[error("{provider} request failed with status {status}")]
    Upstream {
        provider: Provider,
        status: StatusCode,
        body: Value,
    },

    #[error("{provider} request failed: {source}")]
    Transport {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },

    #[error("Malformed stream line: {source}")]
    MalformedLine {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stream line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("{provider} event stream error: {message}")]
    EventStream { provider: Provider, message: String },

    #[error("{provider} is not configured: {missing} is not set")]
    NotConfigured {
        provider: Provider,
        missing: &'static str,
    },
}

impl RelayError {
    /// The dynamic form the classifier inspects.
    pub fn to_error_value(&self) -> Value {
        match self {
            // The Azure service raises its error envelope as-is.
            Self::Upstream {
                provider: Provider::Azure,
                body,
                ..
            } if body.get("error").is_some_and(Value::is_object) => body.clone(),
            Self::Upstream { status, body, .. } => json!({
                "http_error": true,
                "message": self.to_string(),
                "response": {
                    "status": status.as_u16(),
                    "data": body,
                },
            }),
            Self::Transport { .. } => json!({
                "http_error": true,
                "message": self.to_string(),
            }),
            Self::MalformedLine { .. }
            | Self::LineTooLong { .. }
            | Self::EventStream { .. }
            | Self::NotConfigured { .. } => {
                json!({ "message": self.to_string() })
            }
        }
    }

    /// The string sent to the browser in the terminal `error` event.
    pub fn display_message(&self) -> String {
        error_message(&self.to_error_value())
    }
}

/// Recognized error shapes, in classification order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorShape {
    /// HTTP client error whose response body carries a `message`.
    HttpClient { message: String },
    /// OpenAI API error: `response.data.error.message`.
    OpenAi { message: String },
    /// Azure OpenAI error: `error.code` and `error.message`.
    Azure { code: String, message: String },
    WithMessage(String),
    WithCode(String),
    Plain(String),
    Unknown,
}

impl ErrorShape {
    /// Classify an arbitrary error value. First match wins; the order matters
    /// because the provider shapes also carry `message`/`code` fields.
    pub fn classify(value: &Value) -> Self {
        if value.get("http_error").is_some_and(truthy) {
            if let Some(message) = value
                .pointer("/response/data/message")
                .filter(|m| truthy(m))
            {
                return Self::HttpClient {
                    message: render(message),
                };
            }
        }

        if let Some(message) = present(value.pointer("/response/data/error/message")) {
            return Self::OpenAi {
                message: render(message),
            };
        }

        if let (Some(code), Some(message)) = (
            present(value.pointer("/error/code")),
            present(value.pointer("/error/message")),
        ) {
            return Self::Azure {
                code: render(code),
                message: render(message),
            };
        }

        if let Some(message) = present(value.get("message")) {
            return Self::WithMessage(render(message));
        }

        if let Some(code) = present(value.get("code")) {
            return Self::WithCode(render(code));
        }

        match value {
            Value::String(s) => Self::Plain(s.clone()),
            _ => Self::Unknown,
        }
    }

    pub fn message(&self) -> Cow<'_, str> {
        match self {
            Self::Azure { code, .. } if code == "content_filter" => {
                Cow::Borrowed(CONTENT_FILTER_MESSAGE)
            }
            Self::HttpClient { message }
            | Self::OpenAi { message }
            | Self::Azure { message, .. }
            | Self::WithMessage(message)
            | Self::WithCode(message)
            | Self::Plain(message) => Cow::Borrowed(message.as_str()),
            Self::Unknown => Cow::Borrowed(UNKNOWN_ERROR),
        }
    }
}

/// Classify `value` and return its display message. Never panics.
pub fn error_message(value: &Value) -> String {
    ErrorShape::classify(value).message().into_owned()
}

/// A field counts as present when it exists and is not `null`.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
