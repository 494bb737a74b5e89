//! SSE (Server-Sent Events) push channel to the browser.
//!
//! A relay task writes [`StreamEvent`]s into an [`EventSink`]; the receiving
//! half becomes the SSE response body. Each event is sent as
//! `data: <json>\n\n`.

use std::convert::Infallible;
use std::future::Future;

use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::errors::RelayError;

/// Outbound event. `Done` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    Done,
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Text(_))
    }

    pub fn to_sse(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_default();
        Event::default().data(data)
    }
}

/// Serializes as `{"text": ..}`, `{"done": true}` or `{"error": ..}`.
impl Serialize for StreamEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            StreamEvent::Text(text) => map.serialize_entry("text", text)?,
            StreamEvent::Done => map.serialize_entry("done", &true)?,
            StreamEvent::Error(message) => map.serialize_entry("error", message)?,
        }
        map.end()
    }
}

/// The browser went away; the relay should stop reading upstream.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("client disconnected")]
pub struct ClientGone;

/// How a relay ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    Done,
    Failed(String),
    /// Upstream ended without a terminal signal; closed with no terminal event.
    SilentEnd,
    ClientGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub end: RelayEnd,
    pub text_events: usize,
    /// Everything relayed as text, concatenated.
    pub body: String,
}

impl RelayOutcome {
    pub fn log(&self) {
        match &self.end {
            RelayEnd::Done => info!(
                text_events = self.text_events,
                body_len = self.body.len(),
                "Stream done, closing the connection"
            ),
            RelayEnd::Failed(message) => warn!(
                text_events = self.text_events,
                error = %message,
                "Stream failed, closing the connection"
            ),
            RelayEnd::SilentEnd => warn!(
                text_events = self.text_events,
                body_len = self.body.len(),
                "Upstream ended without a done signal, closing the connection"
            ),
            RelayEnd::ClientGone => info!(
                text_events = self.text_events,
                "Client disconnected, upstream stream dropped"
            ),
        }
        debug!(body = %self.body, "Relayed body");
    }
}

/// Send-only event channel with an explicit close.
///
/// The terminal operations take `self`, so at most one terminal event can be
/// sent and nothing can follow it.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    text_events: usize,
    body: String,
}

impl EventSink {
    /// Create a sink and the receiver that feeds the SSE body.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let sink = Self {
            tx,
            text_events: 0,
            body: String::new(),
        };
        (sink, rx)
    }

    pub async fn text(&mut self, text: String) -> Result<(), ClientGone> {
        let start = self.body.len();
        self.body.push_str(&text);
        if self.tx.send(StreamEvent::Text(text)).await.is_err() {
            self.body.truncate(start);
            return Err(ClientGone);
        }
        self.text_events += 1;
        Ok(())
    }

    pub async fn done(self) -> RelayOutcome {
        self.terminate(StreamEvent::Done, RelayEnd::Done).await
    }

    /// Send a terminal error event with an already classified message.
    pub async fn fail(self, message: String) -> RelayOutcome {
        let end = RelayEnd::Failed(message.clone());
        self.terminate(StreamEvent::Error(message), end).await
    }

    /// Classify `err` and send it as the terminal error event.
    pub async fn fail_with(self, err: &RelayError) -> RelayOutcome {
        warn!(error = %err, "Relay error");
        self.fail(err.display_message()).await
    }

    /// Close without a terminal event.
    pub fn close(self) -> RelayOutcome {
        self.finish(RelayEnd::SilentEnd)
    }

    pub fn client_gone(self) -> RelayOutcome {
        self.finish(RelayEnd::ClientGone)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Run `fut` unless the client disconnects first.
    pub async fn or_client_gone<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.closed() => None,
            out = fut => Some(out),
        }
    }

    async fn terminate(self, event: StreamEvent, end: RelayEnd) -> RelayOutcome {
        if self.tx.send(event).await.is_err() {
            return self.client_gone();
        }
        self.finish(end)
    }

    fn finish(self, end: RelayEnd) -> RelayOutcome {
        RelayOutcome {
            end,
            text_events: self.text_events,
            body: self.body,
        }
    }
}

/// Turn the receiving half of an [`EventSink`] into an SSE response.
pub fn sse_response(rx: mpsc::Receiver<StreamEvent>) -> impl IntoResponse {
    let stream = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_sse()));
    (
        [(header::CONNECTION, "keep-alive")],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
}
