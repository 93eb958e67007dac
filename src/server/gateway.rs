//! Gateway assembly: configuration, router and serve loop

use crate::auth::{CredentialStore, TokenService};
use crate::channels::ChannelRegistry;
use crate::server::connections::ConnectionRegistry;
use crate::server::http::{health_handler, login_handler, GatewayState};
use crate::server::websocket::stream_routes;

use anyhow::{ensure, Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

/// Shortest accepted token signing secret, in bytes
pub const MIN_SECRET_LEN: usize = 32;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Secret for signing tokens
    pub token_secret: Vec<u8>,
    /// Longest a single push may take before the stream is torn down
    pub write_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(bind_addr: SocketAddr, token_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            bind_addr,
            token_secret: token_secret.into(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.token_secret.len() >= MIN_SECRET_LEN,
            "token secret must be at least {} bytes, got {}",
            MIN_SECRET_LEN,
            self.token_secret.len()
        );
        ensure!(!self.write_timeout.is_zero(), "write timeout must be non-zero");
        Ok(())
    }
}

/// The streaming gateway
#[derive(Clone)]
pub struct Gateway {
    config: GatewayConfig,
    state: GatewayState,
}

impl Gateway {
    pub fn new(config: GatewayConfig, credentials: CredentialStore, channels: ChannelRegistry) -> Self {
        let state = GatewayState {
            tokens: Arc::new(TokenService::new(config.token_secret.clone())),
            credentials: Arc::new(credentials),
            channels: Arc::new(channels),
            connections: ConnectionRegistry::new(),
            write_timeout: config.write_timeout,
        };

        Self { config, state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/login", post(login_handler))
            .route("/health", get(health_handler))
            .merge(stream_routes(self.state.clone()))
            .with_state(self.state.clone())
    }

    /// Live stream registry (for introspection)
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.state.connections
    }

    pub fn tokens(&self) -> &TokenService {
        &self.state.tokens
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run_until(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        self.config.validate()?;

        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.bind_addr))?;

        info!(
            addr = %self.config.bind_addr,
            channels = ?self.state.channels.ids(),
            users = self.state.credentials.len(),
            "Vigil gateway listening"
        );

        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    ///
    /// On shutdown every live stream is disarmed, which closes it.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let connections = self.state.connections.clone();
        let shutdown = async move {
            shutdown.await;
            let closed = connections.close_all();
            info!(closed = closed, "Shutting down, closed live streams");
        };

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GatewayConfig::new("127.0.0.1:0".parse().unwrap(), vec![7u8; 32]);

        assert_eq!(config.write_timeout, DEFAULT_WRITE_TIMEOUT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_short_secret() {
        let config = GatewayConfig::new("127.0.0.1:0".parse().unwrap(), "short");

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let config = GatewayConfig::new("127.0.0.1:0".parse().unwrap(), vec![7u8; 32])
            .write_timeout(Duration::ZERO);

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_carries_config_into_state() {
        let config = GatewayConfig::new("127.0.0.1:0".parse().unwrap(), vec![7u8; 32])
            .write_timeout(Duration::from_secs(3));
        let gateway = Gateway::new(config, CredentialStore::default(), ChannelRegistry::standard());

        assert_eq!(gateway.config().write_timeout, Duration::from_secs(3));
        assert_eq!(gateway.config().token_secret, vec![7u8; 32]);
        assert_eq!(gateway.state.write_timeout, gateway.config().write_timeout);

        // Tokens minted by the state's service verify under the configured secret
        let token = gateway
            .tokens()
            .issue(&crate::auth::ClaimsInput::new("u-1", "admin", "admin"))
            .unwrap();
        let same_secret = TokenService::new(gateway.config().token_secret.clone());
        assert_eq!(same_secret.verify(token.as_str()).unwrap().username, "admin");
        assert_eq!(gateway.connections().count(), 0);
    }
}
