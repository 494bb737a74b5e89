//! End-to-end tests: the relay server in front of a fake upstream provider.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use chat_stream_relay::config::Config;
use chat_stream_relay::errors::CONTENT_FILTER_MESSAGE;
use chat_stream_relay::server::routes::{build_router, AppState};

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn sse_body(parts: Vec<String>) -> Response {
    let chunks = parts
        .into_iter()
        .map(|p| Ok::<_, Infallible>(Bytes::from(p)));
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .unwrap()
}

fn delta(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "content": content } }] })
    )
}

async fn fake_openai(headers: HeaderMap, Json(request): Json<Value>) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer sk-test");
    if !authorized {
        let body = json!({
            "error": {
                "message": "Incorrect API key provided: sk-bad.",
                "type": "invalid_request_error",
                "code": "invalid_api_key"
            }
        });
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }

    assert_eq!(request["stream"], json!(true));
    assert_eq!(request["model"], json!("gpt-4"));
    assert_eq!(request["messages"][0]["content"], json!("Why is the sky blue?"));

    let first = delta("Rayleigh");
    let (head, tail) = first.split_at(20);
    sse_body(vec![
        head.to_string(),
        format!("{tail}{}", delta(" scattering\n")),
        "data: [DONE]\n\n".to_string(),
    ])
}

async fn fake_openai_truncated() -> Response {
    sse_body(vec![delta("cut off")])
}

async fn fake_azure(headers: HeaderMap, Json(request): Json<Value>) -> Response {
    assert_eq!(
        headers.get("api-key").and_then(|v| v.to_str().ok()),
        Some("azure-key")
    );
    assert_eq!(request["max_tokens"], json!(1000));

    sse_body(vec![
        delta("The sky"),
        format!("{}data: [DONE]\n\n", delta(" is blue")),
    ])
}

async fn fake_azure_filtered() -> Response {
    let body = json!({
        "error": {
            "code": "content_filter",
            "message": "The response was filtered due to the prompt triggering content management policy.",
            "param": "prompt",
            "status": 400
        }
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

async fn upstream() -> SocketAddr {
    let app = Router::new()
        .route("/v1/chat/completions", post(fake_openai))
        .route("/truncated/chat/completions", post(fake_openai_truncated))
        .route(
            "/openai/deployments/gpt-35-turbo/chat/completions",
            post(fake_azure),
        )
        .route(
            "/openai/deployments/filtered/chat/completions",
            post(fake_azure_filtered),
        );
    spawn(app).await
}

fn config_for(upstream: SocketAddr) -> Config {
    let mut config = Config::default();
    config.openai.base_url = format!("http://{upstream}/v1");
    config.openai.api_key = Some("sk-test".to_string());
    config.azure.endpoint = Some(format!("http://{upstream}/"));
    config.azure.api_key = Some("azure-key".to_string());
    config
}

async fn relay(config: Config) -> SocketAddr {
    let state = Arc::new(AppState::new(Arc::new(config)).unwrap());
    spawn(build_router(state)).await
}

/// Fetch an SSE endpoint and return the JSON payload of every `data:` message.
async fn fetch_events(addr: SocketAddr, path: &str) -> (HeaderMap, Vec<Value>) {
    let response = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let headers = response.headers().clone();
    let text = response.text().await.unwrap();

    let events = text
        .split("\n\n")
        .filter_map(|block| block.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect();

    (headers, events)
}

#[tokio::test]
async fn test_openai_stream_relayed() {
    let addr = relay(config_for(upstream().await)).await;
    let (headers, events) = fetch_events(addr, "/openai").await;

    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache");
    assert_eq!(
        events,
        vec![
            json!({ "text": "Rayleigh" }),
            json!({ "text": " scattering<br>" }),
            json!({ "done": true }),
        ]
    );
}

#[tokio::test]
async fn test_openai_bad_key_reports_provider_message() {
    let mut config = config_for(upstream().await);
    config.openai.api_key = Some("sk-bad".to_string());
    let addr = relay(config).await;

    let (_, events) = fetch_events(addr, "/openai").await;
    assert_eq!(
        events,
        vec![json!({ "error": "Incorrect API key provided: sk-bad." })]
    );
}

#[tokio::test]
async fn test_openai_stream_without_sentinel_closes_silently() {
    let upstream = upstream().await;
    let mut config = config_for(upstream);
    config.openai.base_url = format!("http://{upstream}/truncated");
    let addr = relay(config).await;

    let (_, events) = fetch_events(addr, "/openai").await;
    assert_eq!(events, vec![json!({ "text": "cut off" })]);
}

#[tokio::test]
async fn test_openai_not_configured() {
    let mut config = config_for(upstream().await);
    config.openai.api_key = None;
    let addr = relay(config).await;

    let (_, events) = fetch_events(addr, "/openai").await;
    assert_eq!(
        events,
        vec![json!({ "error": "openai is not configured: OPENAI_API_KEY is not set" })]
    );
}

#[tokio::test]
async fn test_openai_unreachable() {
    // Reserve a port, then free it so nothing is listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let mut config = config_for(upstream().await);
    config.openai.base_url = format!("http://{dead}/v1");
    let addr = relay(config).await;

    let (_, events) = fetch_events(addr, "/openai").await;
    assert_eq!(events.len(), 1);
    let message = events[0]["error"].as_str().unwrap();
    assert!(message.starts_with("openai request failed"), "{message}");
}

#[tokio::test]
async fn test_azure_stream_relayed() {
    let addr = relay(config_for(upstream().await)).await;
    let (_, events) = fetch_events(addr, "/azure").await;

    assert_eq!(
        events,
        vec![
            json!({ "text": "The sky" }),
            json!({ "text": " is blue" }),
            json!({ "done": true }),
        ]
    );
}

#[tokio::test]
async fn test_azure_content_filter() {
    let mut config = config_for(upstream().await);
    config.azure.deployment = "filtered".to_string();
    let addr = relay(config).await;

    let (_, events) = fetch_events(addr, "/azure").await;
    assert_eq!(events, vec![json!({ "error": CONTENT_FILTER_MESSAGE })]);
}

#[tokio::test]
async fn test_both_streams_concurrently() {
    let addr = relay(config_for(upstream().await)).await;
    let (openai, azure) = tokio::join!(fetch_events(addr, "/openai"), fetch_events(addr, "/azure"));

    assert_eq!(openai.1.last(), Some(&json!({ "done": true })));
    assert_eq!(azure.1.last(), Some(&json!({ "done": true })));
}
