//! Authentication gate for stream upgrades
//!
//! Runs as route middleware in front of the upgrade handler, so a request
//! that fails here never reaches `WebSocketUpgrade` and no stream is opened.
//! The token travels in the `token` query parameter because browsers cannot
//! set headers on a WebSocket handshake.

use crate::auth::{Claims, TokenError, TokenService};
use crate::server::http::GatewayState;

use axum::{
    extract::{rejection::QueryRejection, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("missing token")]
    MissingToken,

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl IntoResponse for GateError {
    /// Every cause looks the same to the client
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Check a presented token. Absent or empty tokens are `MissingToken`.
pub fn authorize(tokens: &TokenService, token: Option<&str>) -> Result<Claims, GateError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(GateError::MissingToken)?;

    Ok(tokens.verify(token)?)
}

/// Middleware: verify the query token and attach the claims to the request
pub async fn require_token(
    State(state): State<GatewayState>,
    query: Result<Query<TokenQuery>, QueryRejection>,
    mut request: Request,
    next: Next,
) -> Result<Response, GateError> {
    let token = query.ok().and_then(|Query(q)| q.token);

    let claims = authorize(&state.tokens, token.as_deref()).inspect_err(|e| {
        debug!(path = %request.uri().path(), error = %e, "Rejected stream handshake");
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
