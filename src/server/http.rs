//! HTTP surface: login and health

use crate::auth::{CredentialError, CredentialStore, TokenError, TokenService};
use crate::channels::ChannelRegistry;
use crate::server::connections::ConnectionRegistry;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, error, info};

/// Shared state for all handlers
#[derive(Clone)]
pub struct GatewayState {
    pub tokens: Arc<TokenService>,
    pub credentials: Arc<CredentialStore>,
    pub channels: Arc<ChannelRegistry>,
    pub connections: ConnectionRegistry,
    pub write_timeout: Duration,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Error)]
pub enum LoginError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error("token issue failed: {0}")]
    Token(#[from] TokenError),

    #[error("login task failed: {0}")]
    Task(#[from] JoinError),
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        match self {
            // Same body whether or not the username exists
            LoginError::Credentials(_) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized" })),
            )
                .into_response(),
            other => {
                error!(error = %other, "Login error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

/// `POST /login`
pub async fn login_handler(
    State(state): State<GatewayState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, LoginError> {
    let credentials = state.credentials.clone();
    let tokens = state.tokens.clone();

    // Argon2 verification blocks
    let (username, token) = tokio::task::spawn_blocking(move || -> Result<_, LoginError> {
        let identity = credentials
            .authenticate(&request.username, &request.password)
            .inspect_err(|_| debug!(username = %request.username, "Login rejected"))?;
        let token = tokens.issue(&identity.claims_input())?;
        Ok((identity.username.clone(), token))
    })
    .await??;

    info!(username = %username, "Issued token");
    Ok(Json(LoginResponse {
        token: token.into_string(),
    }))
}

/// `GET /health`
pub async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.connections.count(),
    }))
}
