//! outlook-zendesk-mcp-rs: Outlook and Zendesk MCP server
//!
//! This server exposes Outlook mail, folders, inbox rules and calendar
//! (Microsoft Graph) plus Zendesk tickets as Model Context Protocol tools,
//! over stdio or streamable HTTP. Email search degrades through a fixed
//! ladder of strategies instead of returning nothing, and bulk mutations
//! isolate per-item failures.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and transport selection
//! - [`config`]: Environment-driven configuration for both services
//! - [`errors`]: Application error model with tool-result mapping
//! - [`server`]: MCP tool handlers, write gating and login flow
//! - [`models`]: Tool input DTOs with JSON schemas
//! - [`auth`]: Token lifecycle (OAuth refresh, file store, API-token auth)
//! - [`api`]: Remote API client with retries and error extraction
//! - [`query`]: Query tree and the Graph query dialect
//! - [`search`]: Progressive search-fallback ladder
//! - [`bulk`]: Per-item bulk executor
//! - [`outlook`]: Graph resources and Outlook tool logic
//! - [`zendesk`]: Zendesk resources and tool logic
//! - [`format`]: Plain-text rendering of results

mod api;
mod auth;
mod bulk;
mod config;
mod errors;
mod format;
mod models;
mod outlook;
mod query;
mod search;
mod server;
#[cfg(test)]
mod testing;
mod zendesk;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::server::OutlookZendeskServer;

/// MCP transport to serve on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// stdin/stdout, for clients that spawn the server
    Stdio,
    /// Streamable HTTP under `/mcp`
    Http,
}

/// Command line options
#[derive(Debug, Parser)]
#[command(version, about = "Outlook and Zendesk MCP server")]
struct Cli {
    /// Transport to serve the MCP protocol on
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,
    /// Listen address for the HTTP transport
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,
}

/// Application entry point
///
/// Initializes tracing from environment (to stderr, since stdout carries
/// the stdio transport), loads config, and serves the MCP server.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// OUTLOOK_CLIENT_ID=00000000-0000-0000-0000-000000000000 \
/// ZENDESK_SUBDOMAIN=acme ZENDESK_EMAIL=agent@acme.com ZENDESK_API_KEY=token \
/// cargo run -- --transport http --bind 127.0.0.1:8080
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load_from_env()?;
    log_configuration(&config);
    let server = OutlookZendeskServer::new(config)?;

    match cli.transport {
        Transport::Stdio => {
            let service = server.serve(stdio()).await?;
            service.waiting().await?;
        }
        Transport::Http => serve_http(server, cli.bind).await?,
    }
    Ok(())
}

fn log_configuration(config: &ServerConfig) {
    match &config.outlook {
        Some(outlook) => info!(
            tenant = %outlook.tenant_id,
            token_path = %outlook.token_path.display(),
            "Outlook configured"
        ),
        None => info!("Outlook not configured (OUTLOOK_CLIENT_ID unset)"),
    }
    match &config.zendesk {
        Some(zendesk) => info!(subdomain = %zendesk.subdomain, "Zendesk configured"),
        None => info!("Zendesk not configured (ZENDESK_* unset)"),
    }
    info!(
        write_enabled = config.write_enabled,
        max_results = config.search.max_results,
        "server settings loaded"
    );
}

/// Serve streamable HTTP on `/mcp` until Ctrl-C
async fn serve_http(
    server: OutlookZendeskServer,
    bind: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = CancellationToken::new();
    let mut http_config = StreamableHttpServerConfig::default();
    http_config.cancellation_token = shutdown.child_token();

    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        Arc::new(LocalSessionManager::default()),
        http_config,
    );
    let router = axum::Router::new().nest_service("/mcp", service);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "serving MCP over streamable HTTP at /mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}
