//! HTTP server relaying provider streams to the browser.
//!
//! - [`routes`]: router, handlers and shared state
//! - [`relay`]: per-provider relay loops
//! - [`streaming`]: SSE event channel and encoding

pub mod relay;
pub mod routes;
pub mod streaming;
