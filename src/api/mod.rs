//! Local REST API for chat-digest.
//!
//! Provides HTTP endpoints for:
//! - Starting a summary run over an archive on disk
//! - Polling and cancelling the active run

pub mod error;
pub mod routes;

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::pipeline::JobRunner;
use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;

pub use routes::summary::{SummarizeRequest, SummaryState};

pub struct ApiServer {
    port: u16,
    summary_state: SummaryState,
}

impl ApiServer {
    pub fn new(config: &Config, credentials: CredentialStore, port: u16) -> Self {
        Self {
            port,
            summary_state: SummaryState {
                runner: Arc::new(JobRunner::new()),
                config: config.clone(),
                credentials: Arc::new(credentials),
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(status))
            .route("/version", get(version))
            .merge(routes::summary::router(self.summary_state.clone()))
            .layer(ServiceBuilder::new())
    }

    pub async fn start(self) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  GET  /           - Service info");
        info!("  GET  /version    - Get version info");
        info!("  POST /summarize  - Start a summary run");
        info!("  GET  /status     - Get job status");
        info!("  POST /cancel     - Cancel the active run");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "chat-digest",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "chat-digest"
    }))
}
