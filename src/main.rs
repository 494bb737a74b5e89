//! chat-stream-relay server binary.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use chat_stream_relay::config::{Cli, Config};
use chat_stream_relay::server::routes::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real environment variables still apply.
    let dotenv = dotenvy::dotenv();

    // Parse CLI arguments (environment-backed flags see the .env values).
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "chat_stream_relay=debug,tower_http=debug"
    } else {
        "chat_stream_relay=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("chat-stream-relay v{}", env!("CARGO_PKG_VERSION"));
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);
    let config = Arc::new(config);

    info!(
        openai_model = %config.openai.model,
        azure_deployment = %config.azure.deployment,
        query = %config.prompt.query,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new(config.clone())?);
    if !state.openai.is_configured() {
        warn!("OPENAI_API_KEY is not set; /openai will report an error");
    }
    if !state.azure.is_configured() {
        warn!("AZURE_OPENAI_ENDPOINT or AZURE_OPENAI_KEY is not set; /azure will report an error");
    }

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.listen_addr()?;
    let listener = TcpListener::bind(listen_addr).await?;
    info!("Server is running at http://localhost:{}", listen_addr.port());

    axum::serve(listener, app).await?;

    Ok(())
}
