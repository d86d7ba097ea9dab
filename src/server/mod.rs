//! The relay endpoint.
//!
//! `POST /api/chat` injects the spoiler policy, forwards the conversation to
//! the provider, and answers with plain streamed text, a JSON message, or a
//! JSON classification. `GET /health` answers `ok`.

pub mod handlers;
pub mod prompts;
pub mod upstream;


use std::error::Error;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;

use crate::core::config::{resolve_api_key, Config};
use upstream::UpstreamClient;

pub struct RelayState {
    upstream: Option<UpstreamClient>,
}

impl RelayState {
    /// `None` means no credentials are available; chat requests then fail
    /// with a configuration error while `/health` keeps answering.
    pub fn new(upstream: Option<UpstreamClient>) -> Self {
        Self { upstream }
    }

    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        let upstream = resolve_api_key().map(|api_key| {
            UpstreamClient::new(client, config.provider_base_url(), api_key, config.model())
        });
        if upstream.is_none() {
            tracing::warn!("No provider API key found; chat requests will fail until one is set");
        }
        Self::new(upstream)
    }

    pub fn upstream(&self) -> Option<&UpstreamClient> {
        self.upstream.as_ref()
    }
}

pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route("/health", get(handlers::health))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: Arc<RelayState>) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

pub async fn bind_and_serve(bind: &str, state: Arc<RelayState>) -> Result<(), Box<dyn Error>> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(address = %listener.local_addr()?, "Relay listening");
    serve(listener, state).await?;
    Ok(())
}
