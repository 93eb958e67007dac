//! Shared harness: a real gateway on an ephemeral port plus thin clients

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use vigil::auth::CredentialStore;
use vigil::channels::{generators, Channel, ChannelRegistry, GeneratorError};
use vigil::server::{Gateway, GatewayConfig};

pub const SECRET: &[u8] = b"integration-test-secret-0123456789abcdef";

pub const USERS: [(&str, &str, &str, &str); 2] = [
    ("u-1", "admin", "admin-pass", "admin"),
    ("u-2", "analyst", "analyst-pass", "analyst"),
];

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestGateway {
    pub addr: SocketAddr,
    pub gateway: Gateway,
    shutdown: Option<oneshot::Sender<()>>,
    pub server: JoinHandle<anyhow::Result<()>>,
}

impl TestGateway {
    pub async fn spawn(channels: ChannelRegistry) -> Self {
        let credentials = CredentialStore::from_plaintext(USERS).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = GatewayConfig::new(addr, SECRET).write_timeout(Duration::from_secs(2));
        let gateway = Gateway::new(config, credentials, channels);

        let (tx, rx) = oneshot::channel::<()>();
        let server = gateway.clone();
        let handle = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
        });

        Self {
            addr,
            gateway,
            shutdown: Some(tx),
            server: handle,
        }
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    pub fn token_for(&self, username: &str) -> String {
        let (sub, username, _, role) = USERS
            .iter()
            .find(|(_, name, _, _)| *name == username)
            .copied()
            .unwrap();
        self.gateway
            .tokens()
            .issue(&vigil::ClaimsInput::new(sub, username, role))
            .unwrap()
            .into_string()
    }

    pub async fn connect(&self, path: &str, token: Option<&str>) -> Result<WsStream, tungstenite::Error> {
        let url = match token {
            Some(token) => format!("ws://{}{}?token={}", self.addr, path, token),
            None => format!("ws://{}{}", self.addr, path),
        };
        tokio_tungstenite::connect_async(url).await.map(|(ws, _)| ws)
    }

    pub async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("http://{}/login", self.addr))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap()
    }

    /// Wait until the registry holds `expected` live streams
    pub async fn wait_for_connections(&self, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while self.gateway.connections().count() != expected {
            assert!(
                Instant::now() < deadline,
                "expected {} connections, registry has {}",
                expected,
                self.gateway.connections().count()
            );
            sleep(Duration::from_millis(10)).await;
        }
    }
}

/// HTTP status of a rejected handshake
pub fn rejection_status(err: tungstenite::Error) -> u16 {
    match err {
        tungstenite::Error::Http(response) => response.status().as_u16(),
        other => panic!("expected HTTP rejection, got {:?}", other),
    }
}

/// Next JSON text frame, or `None` on timeout, close or error
pub async fn next_json(ws: &mut WsStream, within: Duration) -> Option<Value> {
    loop {
        match timeout(within, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Ok(Some(Ok(Message::Close(_)))) => return None,
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

/// `{"seq": n}` with a counter private to the channel
pub fn counting(id: &str, period: Duration) -> Channel {
    let counter = AtomicUsize::new(0);
    Channel::new(
        id,
        period,
        move |_now: DateTime<Utc>| -> Result<Value, GeneratorError> {
            Ok(json!({ "seq": counter.fetch_add(1, Ordering::SeqCst) }))
        },
    )
    .unwrap()
}

/// Fast channels for lifecycle tests: `fast`, `slow`, `top` and default `idle`
pub fn fast_registry() -> ChannelRegistry {
    ChannelRegistry::builder()
        .channel(counting("fast", Duration::from_millis(100)))
        .channel(counting("slow", Duration::from_millis(300)))
        .channel(Channel::new("top", Duration::from_millis(100), generators::TopVulnerabilities).unwrap())
        .default_channel(counting("idle", Duration::from_millis(150)))
        .build()
        .unwrap()
}
