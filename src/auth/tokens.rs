//! Signed, time-bounded session tokens
//!
//! Wire format: `<payload>.<signature>` where `payload` is the base64url
//! (no padding) JSON encoding of [`Claims`] and `signature` is the base64url
//! HMAC-SHA256 of the encoded payload under the gateway secret.
//!
//! Tokens are stateless. Nothing is stored at issue time; every verification
//! re-derives validity from the signature and the expiry.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

/// Lifetime of every issued token, in seconds.
pub const TOKEN_TTL_SECS: i64 = 60 * 60;

const SEPARATOR: char = '.';

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("identity is missing a subject, username or role")]
    InvalidIdentity,

    #[error("invalid token signature")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

/// The public subset of an identity that gets embedded in a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsInput {
    pub sub: String,
    pub username: String,
    pub role: String,
}

impl ClaimsInput {
    pub fn new(sub: impl Into<String>, username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            username: username.into(),
            role: role.into(),
        }
    }

    fn is_degenerate(&self) -> bool {
        [&self.sub, &self.username, &self.role]
            .iter()
            .any(|field| field.trim().is_empty())
    }
}

/// Verified token contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity id)
    pub sub: String,
    pub username: String,
    pub role: String,
    /// Issued-at, Unix seconds
    pub iat: i64,
    /// Expiry, Unix seconds. Always `iat + TOKEN_TTL_SECS`.
    pub exp: i64,
}

impl Claims {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// An issued token string
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token([REDACTED])")
    }
}

/// Issues and verifies tokens with a shared signing secret
#[derive(Clone)]
pub struct TokenService {
    secret: Vec<u8>,
}

impl TokenService {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue a token for `input`, valid for [`TOKEN_TTL_SECS`] from now.
    pub fn issue(&self, input: &ClaimsInput) -> Result<Token, TokenError> {
        self.issue_at(input, Utc::now())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(&self, input: &ClaimsInput, now: DateTime<Utc>) -> Result<Token, TokenError> {
        if input.is_degenerate() {
            return Err(TokenError::InvalidIdentity);
        }

        let iat = now.timestamp();
        let claims = Claims {
            sub: input.sub.clone(),
            username: input.username.clone(),
            role: input.role.clone(),
            iat,
            exp: iat + TOKEN_TTL_SECS,
        };

        let payload_json = serde_json::to_vec(&claims).expect("serialize claims");
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json);
        let signature_b64 = URL_SAFE_NO_PAD.encode(self.sign(payload_b64.as_bytes()));

        Ok(Token(format!("{}{}{}", payload_b64, SEPARATOR, signature_b64)))
    }

    /// Verify a token against the current time.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a token as if the current time were `now`.
    ///
    /// The signature is checked before anything in the payload is trusted.
    /// Every structural problem reports as [`TokenError::BadSignature`].
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let (payload_b64, signature_b64) = token
            .split_once(SEPARATOR)
            .ok_or(TokenError::BadSignature)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::BadSignature)?;

        self.mac(payload_b64.as_bytes())
            .verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload_json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::BadSignature)?;
        let claims: Claims =
            serde_json::from_slice(&payload_json).map_err(|_| TokenError::BadSignature)?;

        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(data);
        mac
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.mac(data).finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenService([REDACTED])")
    }
}
