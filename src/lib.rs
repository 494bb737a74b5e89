//! chat-stream-relay: streams chat completions from OpenAI and Azure OpenAI
//! to a browser over Server-Sent Events.
//!
//! Each provider's native streaming format is decoded incrementally and
//! re-emitted as a uniform event stream of `{"text"}` fragments followed by
//! one `{"done"}` or `{"error"}` event. Errors from either provider are
//! normalized into a single display message.

pub mod config;
pub mod errors;
pub mod providers;
pub mod server;
