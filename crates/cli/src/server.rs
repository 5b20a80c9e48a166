//! HTTP proxy for description generation.
//!
//! `POST /api/generate-description` always answers 200: upstream failures
//! and unreadable bodies produce the templated fallback instead.

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use kidneyscan_core::description::{generate_description, DescriptionRequest, DescriptionResponse};
use providers::ProviderRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const INVALID_BODY: &str = "Invalid request body format";

#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<ProviderRegistry>,
    /// Generator name; `None` uses the registry's preferred one.
    pub provider: Option<String>,
}

impl ServerState {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            provider: None,
        }
    }
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/generate-description", post(describe_handler))
        .with_state(state)
}

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn describe_handler(
    State(state): State<ServerState>,
    body: Bytes,
) -> Json<DescriptionResponse> {
    let req = match serde_json::from_slice::<Value>(&body) {
        Ok(v) if v.is_object() => DescriptionRequest::from_json(&v),
        Ok(_) | Err(_) => {
            warn!(len = body.len(), "unreadable description request body");
            let req = DescriptionRequest::default();
            return Json(DescriptionResponse::fallback(&req, INVALID_BODY));
        }
    };
    let resp = generate_description(&req, &state.registry, state.provider.as_deref()).await;
    Json(resp)
}

pub async fn serve(bind: &str, state: ServerState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "description server listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
