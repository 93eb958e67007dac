//! Vigil server implementation
//!
//! Login endpoint, authentication gate, stream lifecycle and the registry of
//! live connections.

mod connections;
mod gateway;
pub mod gate;
pub mod http;
pub mod lifecycle;
pub mod websocket;

pub use connections::{CancelSignal, ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use gateway::{Gateway, GatewayConfig, DEFAULT_WRITE_TIMEOUT, MIN_SECRET_LEN};
pub use http::{GatewayState, LoginRequest, LoginResponse};
pub use lifecycle::{CloseReason, ConnectionState, Lifecycle};
pub use websocket::STREAM_PREFIX;
