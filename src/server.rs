//! Webhook endpoint the platform pushes messages to.
//!
//! `GET` answers the one-time URL verification handshake, `POST` carries the
//! XML messages. Both are signed with the shared token.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::platform::wechat::{decode_message, verify_signature};

// ── Shared state ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Dispatcher>,
    token: Arc<str>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, token: &str) -> Self {
        Self {
            dispatcher,
            token: Arc::from(token),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SignatureQuery {
    #[serde(default)]
    signature: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    nonce: String,
    /// Only present on the verification handshake
    #[serde(default)]
    echostr: String,
}

impl SignatureQuery {
    fn is_signed_with(&self, token: &str) -> bool {
        verify_signature(token, &self.signature, &self.timestamp, &self.nonce)
    }
}

// ── Handlers ───────────────────────────────────────────────────────────────────

async fn verify(
    State(state): State<AppState>,
    Query(query): Query<SignatureQuery>,
) -> Result<String, StatusCode> {
    if !query.is_signed_with(&state.token) {
        warn!("Rejected webhook verification with a bad signature");
        return Err(StatusCode::FORBIDDEN);
    }
    info!("Webhook URL verified");
    Ok(query.echostr)
}

async fn receive(
    State(state): State<AppState>,
    Query(query): Query<SignatureQuery>,
    body: String,
) -> Response {
    if !query.is_signed_with(&state.token) {
        warn!("Rejected webhook push with a bad signature");
        return StatusCode::FORBIDDEN.into_response();
    }

    let message = match decode_message(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!("Undecodable webhook body: {:#}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let reply = state.dispatcher.handle(&message).await;
    match reply.render(&message, Utc::now().timestamp()) {
        Ok(xml) => ([(header::CONTENT_TYPE, "application/xml")], xml).into_response(),
        Err(e) => {
            error!("Failed to render reply for {}: {:#}", message.source_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ── Entry points ───────────────────────────────────────────────────────────────

pub fn router(state: AppState, path: &str) -> Router {
    Router::new()
        .route(path, get(verify).post(receive))
        .with_state(state)
}

/// Bind the configured address and serve until the process is stopped.
pub async fn run(config: &ServerConfig, state: AppState) -> Result<()> {
    let app = router(state, &config.path);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    info!(
        "Webhook listening on http://{}{}",
        config.listen_addr, config.path
    );

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
