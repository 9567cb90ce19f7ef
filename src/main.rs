//! # Wisp Server
//!
//! Entry point: parses the command line, initializes tracing, and serves
//! the Wisp WebSocket endpoint plus a small inspection API.

mod api;
mod handlers;
mod protocol;
mod relay;
mod state;
mod transport;

use anyhow::Context;
use axum::{routing::get, Router};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::state::AppState;

/// Wisp protocol server: carries TCP and UDP streams over one WebSocket.
#[derive(Parser)]
struct Args {
    /// Address to listen on.
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[clap(long, default_value_t = 6001)]
    port: u16,

    /// Buffer slots advertised to clients via CONTINUE frames; also the
    /// capacity of each stream's inbound queue.
    #[clap(long, default_value_t = 32, value_parser = clap::value_parser!(u32).range(1..))]
    buffer_size: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wisp_server=info".into()),
        )
        .init();

    let state = AppState::new(args.buffer_size);
    let app = Router::new()
        .route("/", get(handlers::ws_handler))
        .route("/api/sessions", get(api::list_sessions))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    info!("Wisp server listening on {}:{}", args.host, args.port);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
