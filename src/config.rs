//! Runtime configuration for chat-stream-relay.
//!
//! Non-secret settings (prompt, models, listen address) come from an optional
//! JSON file with defaults for every field. Provider credentials are read from
//! the environment only, so the config file can be committed.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid listen address {0}")]
    InvalidListenAddr(String),
}

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "chat-stream-relay",
    about = "Relays OpenAI and Azure OpenAI chat streams to the browser over SSE"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen host.
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// HTTP listen port.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// OpenAI API key.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Azure OpenAI resource endpoint, e.g. https://my-resource.openai.azure.com.
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT")]
    pub azure_endpoint: Option<String>,

    /// Azure OpenAI API key.
    #[arg(long, env = "AZURE_OPENAI_KEY", hide_env_values = true)]
    pub azure_api_key: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// The question both providers are asked.
    pub prompt: PromptConfig,

    /// Direct OpenAI API settings.
    pub openai: OpenAiConfig,

    /// Azure OpenAI settings.
    pub azure: AzureConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Capacity of the per-request event channel between relay task and SSE body.
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            event_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub query: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            query: "Why is the sky blue?".to_string(),
        }
    }
}

/// OpenAI chat-completions settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// API base URL, without the trailing `/chat/completions`.
    pub base_url: String,

    pub model: String,

    pub temperature: f64,

    /// Never read from the config file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.4,
            api_key: None,
        }
    }
}

/// Azure OpenAI deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    /// Resource endpoint; usually supplied through `AZURE_OPENAI_ENDPOINT`.
    pub endpoint: Option<String>,

    pub deployment: String,

    pub api_version: String,

    pub max_tokens: u32,

    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            deployment: "gpt-35-turbo".to_string(),
            api_version: "2023-05-15".to_string(),
            max_tokens: 1000,
            api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Overlay command-line and environment values on top of the file config.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        self.openai.api_key = non_empty(cli.openai_api_key.as_deref());
        self.azure.api_key = non_empty(cli.azure_api_key.as_deref());
        if let Some(endpoint) = non_empty(cli.azure_endpoint.as_deref()) {
            self.azure.endpoint = Some(endpoint);
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse()
            .map_err(|_| ConfigError::InvalidListenAddr(addr))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
