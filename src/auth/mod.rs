//! Authentication
//!
//! - [`CredentialStore`]: username -> identity lookup with Argon2 password hashes
//! - [`TokenService`]: stateless HMAC-signed tokens that expire one hour after issue

mod credentials;
mod tokens;

pub use credentials::{hash_password, CredentialError, CredentialStore, Identity};
pub use tokens::{Claims, ClaimsInput, Token, TokenError, TokenService, TOKEN_TTL_SECS};
