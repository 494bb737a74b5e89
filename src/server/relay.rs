//! Relay loops: read a provider stream and forward it into an [`EventSink`].
//!
//! Each loop races the next upstream item against client disconnect, so a
//! closed browser tab stops the upstream read instead of draining it.

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use tracing::debug;

use crate::errors::RelayError;
use crate::providers::openai::{Decoded, OpenAiLineDecoder};
use crate::providers::{encode_line_breaks, ChatCompletionChunk};
use crate::server::streaming::{EventSink, RelayOutcome};

/// Relay an OpenAI byte stream.
///
/// Terminal paths: `[DONE]` sends `done`; a malformed line or upstream error
/// sends `error`; the body ending without `[DONE]` closes silently.
pub async fn relay_openai<S>(mut body: S, mut sink: EventSink) -> RelayOutcome
where
    S: Stream<Item = Result<Bytes, RelayError>> + Unpin,
{
    let mut decoder = OpenAiLineDecoder::new();

    loop {
        let Some(next) = sink.or_client_gone(body.next()).await else {
            return sink.client_gone();
        };

        let (decoded, ended) = match next {
            Some(Ok(chunk)) => {
                debug!(bytes = chunk.len(), "Upstream chunk");
                (decoder.push_chunk(&chunk), false)
            }
            Some(Err(err)) => return sink.fail_with(&err).await,
            None => (decoder.finish().into_iter().collect(), true),
        };

        for item in decoded {
            match item {
                Decoded::Text(text) => {
                    if sink.text(text).await.is_err() {
                        return sink.client_gone();
                    }
                }
                Decoded::Done => return sink.done().await,
                Decoded::Failed(err) => return sink.fail_with(&err).await,
            }
        }

        if ended {
            return sink.close();
        }
    }
}

/// Relay a sequence of Azure completion events. Exhaustion sends `done`.
pub async fn relay_azure<S>(mut events: S, mut sink: EventSink) -> RelayOutcome
where
    S: Stream<Item = Result<ChatCompletionChunk, RelayError>> + Unpin,
{
    loop {
        let Some(next) = sink.or_client_gone(events.next()).await else {
            return sink.client_gone();
        };

        match next {
            Some(Ok(chunk)) => {
                for content in chunk.choices.iter().filter_map(|c| c.content()) {
                    if sink.text(encode_line_breaks(content)).await.is_err() {
                        return sink.client_gone();
                    }
                }
            }
            Some(Err(err)) => return sink.fail_with(&err).await,
            None => return sink.done().await,
        }
    }
}
