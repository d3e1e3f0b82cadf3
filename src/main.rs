//! gmail-mcp-rs: Gmail MCP server over HTTP
//!
//! Exposes a Gmail mailbox to MCP clients through three tools: message
//! search, full message content with normalized body and attachment listing,
//! and attachment download with PDF text extraction.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading, CLI overrides and serving
//! - [`config`]: Environment-driven server and Gmail API settings
//! - [`errors`]: Application error model with JSON-RPC error mapping
//! - [`auth`]: Access token providers (static token, refreshing token file)
//! - [`gmail`]: Gmail REST transport behind the `Mailbox` trait
//! - [`models`]: Gmail response and tool input DTOs
//! - [`mime`]: Part tree walking, body normalization, attachment catalog
//! - [`attachments`]: Content-type driven attachment rendering and PDF text
//! - [`dates`]: Human-readable date parsing for search filters
//! - [`tools`]: Tool handlers
//! - [`registry`]: Tool descriptors and dispatch
//! - [`rpc`]: JSON-RPC method routing
//! - [`server`]: HTTP routes and keep-alive stream

mod attachments;
mod auth;
mod config;
mod dates;
mod errors;
mod gmail;
mod mime;
mod models;
mod registry;
mod rpc;
mod server;
mod tools;

use std::sync::Arc;

use clap::Parser;
use config::ServerConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::attachments::AttachmentMaterializer;
use crate::auth::{AuthorizedUserProvider, StaticTokenProvider, TokenProvider};
use crate::gmail::GmailClient;
use crate::registry::ToolRegistry;
use crate::server::AppState;
use crate::tools::GmailTools;

/// Command line overrides for the environment configuration
#[derive(Debug, Parser)]
#[command(name = "gmail-mcp-rs", version, about)]
struct Cli {
    /// Listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Listen address (overrides GMAIL_MCP_BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,
}

impl Cli {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        config
    }
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, wires the Gmail
/// client into the tool registry, and serves HTTP until Ctrl-C.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// GMAIL_MCP_TOKEN_FILE=token.json PORT=3001 cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().apply(ServerConfig::load_from_env()?);
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()?;

    let tokens: Arc<dyn TokenProvider> = match &config.access_token {
        Some(token) => {
            info!("using static access token");
            Arc::new(StaticTokenProvider::new(token.clone()))
        }
        None => {
            info!(token_file = %config.token_file.display(), "using authorized-user token file");
            Arc::new(AuthorizedUserProvider::new(
                config.token_file.clone(),
                config.credentials_file.clone(),
                config.token_uri.clone(),
                http.clone(),
            ))
        }
    };

    let mailbox = Arc::new(GmailClient::from_config(&config, http, tokens));
    let tools = GmailTools::new(mailbox, Arc::new(AttachmentMaterializer::default()));
    let shutdown = CancellationToken::new();
    let app = server::router(AppState {
        registry: Arc::new(ToolRegistry::new(tools)),
        keepalive_interval: config.keepalive_interval(),
        shutdown: shutdown.clone(),
    });

    let listener = tokio::net::TcpListener::bind((config.bind_addr.as_str(), config.port)).await?;
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl_c received; shutting down"),
            Err(e) => warn!(error = %e, "cannot listen for ctrl_c; shutting down"),
        }
        on_signal.cancel();
    });

    server::serve(listener, app, shutdown).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;
    use crate::config::{DEFAULT_API_BASE, DEFAULT_TOKEN_URI, ServerConfig};

    fn base_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "0.0.0.0".to_owned(),
            port: 3001,
            token_file: "token.json".into(),
            credentials_file: "credentials.json".into(),
            access_token: None,
            api_base: DEFAULT_API_BASE.to_owned(),
            token_uri: DEFAULT_TOKEN_URI.to_owned(),
            http_timeout_ms: 30_000,
            keepalive_secs: 30,
        }
    }

    #[test]
    fn cli_flags_override_environment() {
        let cli = Cli::try_parse_from(["gmail-mcp-rs", "--port", "8080", "--bind", "127.0.0.1"])
            .expect("parse");
        let config = cli.apply(base_config());
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_addr, "127.0.0.1");
    }

    #[test]
    fn no_flags_keep_environment() {
        let cli = Cli::try_parse_from(["gmail-mcp-rs"]).expect("parse");
        let config = cli.apply(base_config());
        assert_eq!(config.port, 3001);
        assert_eq!(config.bind_addr, "0.0.0.0");
    }
}
