//! WebSocket stream endpoint
//!
//! `GET /ws/<channel>?token=...` upgrades to a stream of the resolved
//! channel's payloads. The bare `/ws` or `/ws/` prefix streams the default
//! channel.

use crate::auth::Claims;
use crate::server::gate::require_token;
use crate::server::http::GatewayState;
use crate::server::lifecycle::{run_stream, Lifecycle};

use axum::{
    extract::{State, WebSocketUpgrade},
    http::Uri,
    middleware,
    response::IntoResponse,
    routing::get,
    Extension, Router,
};
use tracing::{debug, warn};

/// Path prefix for all stream endpoints
pub const STREAM_PREFIX: &str = "/ws";

/// Stream routes, with the authentication gate in front of every one
pub fn stream_routes(state: GatewayState) -> Router<GatewayState> {
    Router::new()
        .route(STREAM_PREFIX, get(ws_handler))
        .route(&format!("{}/", STREAM_PREFIX), get(ws_handler))
        .route(&format!("{}/{{*channel}}", STREAM_PREFIX), get(ws_handler))
        .route_layer(middleware::from_fn_with_state(state, require_token))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    Extension(claims): Extension<Claims>,
    uri: Uri,
) -> impl IntoResponse {
    // Gate approval puts the connection in Connecting until the upgrade lands
    let lifecycle = Lifecycle::new();

    let path = uri.path().strip_prefix(STREAM_PREFIX).unwrap_or_default();
    let resolution = state.channels.resolve(path);
    debug!(
        username = %claims.username,
        channel = %resolution.channel,
        fallback = resolution.fallback,
        "Stream handshake accepted"
    );

    let connections = state.connections.clone();
    let write_timeout = state.write_timeout;

    ws.on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| {
            run_stream(
                socket,
                lifecycle,
                claims,
                resolution.channel,
                connections,
                write_timeout,
            )
        })
}
