//! HTTP routes.
//!
//! - GET /        demo page
//! - GET /openai  SSE relay of the direct OpenAI stream
//! - GET /azure   SSE relay of the Azure OpenAI stream
//! - GET /health

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::providers::azure::AzureClient;
use crate::providers::openai::OpenAiClient;
use crate::providers::Provider;
use crate::server::relay::{relay_azure, relay_openai};
use crate::server::streaming::{sse_response, EventSink, RelayOutcome};

const INDEX_HTML: &str = include_str!("index.html");

/// Application state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub openai: OpenAiClient,
    pub azure: AzureClient,
    pub start_time: Instant,
}

impl AppState {
    /// Build the provider clients once; they share one connection pool.
    pub fn new(config: Arc<Config>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("chat-stream-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            openai: OpenAiClient::new(http.clone(), config.openai.clone()),
            azure: AzureClient::new(http, config.azure.clone()),
            config,
            start_time: Instant::now(),
        })
    }
}

/// Build the axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/openai", get(openai_stream))
        .route("/azure", get(azure_stream))
        .route("/health", get(health))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub providers: ProviderStatus,
}

/// Whether each provider has credentials configured.
#[derive(Debug, Serialize)]
pub struct ProviderStatus {
    pub openai: bool,
    pub azure: bool,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(render_index(&state.config.prompt.query))
}

async fn openai_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    spawn_relay(&state, Provider::OpenAi, |state, sink| async move {
        let opened = sink
            .or_client_gone(state.openai.stream_chat(&state.config.prompt.query))
            .await;
        match opened {
            None => sink.client_gone(),
            Some(Ok(body)) => relay_openai(body, sink).await,
            Some(Err(err)) => sink.fail_with(&err).await,
        }
    })
}

async fn azure_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    spawn_relay(&state, Provider::Azure, |state, sink| async move {
        let opened = sink
            .or_client_gone(state.azure.stream_chat(&state.config.prompt.query))
            .await;
        match opened {
            None => sink.client_gone(),
            Some(Ok(events)) => relay_azure(events, sink).await,
            Some(Err(err)) => sink.fail_with(&err).await,
        }
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        providers: ProviderStatus {
            openai: state.openai.is_configured(),
            azure: state.azure.is_configured(),
        },
    })
}

/// Run one relay in its own task and return the SSE response it feeds.
///
/// Headers go out immediately; events follow as the relay produces them.
fn spawn_relay<F, Fut>(state: &Arc<AppState>, provider: Provider, relay: F) -> impl IntoResponse
where
    F: FnOnce(Arc<AppState>, EventSink) -> Fut,
    Fut: Future<Output = RelayOutcome> + Send + 'static,
{
    let (sink, rx) = EventSink::channel(state.config.server.event_buffer);
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("relay", request_id = %request_id, provider = %provider);

    let task = relay(state.clone(), sink);
    tokio::spawn(
        async move {
            info!("Stream requested");
            task.await.log();
        }
        .instrument(span),
    );

    sse_response(rx)
}

/// Fill the prompt into the page, HTML-escaped.
pub fn render_index(query: &str) -> String {
    INDEX_HTML.replace("{{query}}", &escape_html(query))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
