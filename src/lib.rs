//! Vigil - authenticated real-time feed gateway
//!
//! Clients exchange credentials for a short-lived signed token at `POST /login`,
//! then open WebSocket streams under `/ws/<channel>?token=...`. Each stream
//! receives one JSON payload per tick at the channel's cadence until it closes.

pub mod auth;
pub mod channels;
pub mod server;

pub use auth::{Claims, ClaimsInput, CredentialStore, Identity, TokenService};
pub use channels::{Channel, ChannelRegistry};
pub use server::{Gateway, GatewayConfig};
