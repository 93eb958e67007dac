//! Credential store
//!
//! Identities are keyed by username and hold an Argon2id PHC hash, never a
//! plaintext password. The store is immutable once built.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::error;

use crate::auth::tokens::ClaimsInput;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("duplicate username '{0}'")]
    DuplicateUsername(String),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("failed to read credentials file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid credentials file: {0}")]
    Format(#[from] serde_json::Error),
}

/// A known identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    /// Argon2 PHC string
    pub password_hash: String,
    pub role: String,
}

impl Identity {
    /// The public claims subset (everything except the hash)
    pub fn claims_input(&self) -> ClaimsInput {
        ClaimsInput::new(&self.id, &self.username, &self.role)
    }
}

/// On-disk layout of a credentials file
#[derive(Debug, Serialize, Deserialize)]
struct CredentialsFile {
    users: Vec<Identity>,
}

/// Read-only username -> identity lookup
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    identities: HashMap<String, Identity>,
}

impl CredentialStore {
    /// Build a store, rejecting duplicate usernames
    pub fn new(identities: impl IntoIterator<Item = Identity>) -> Result<Self, CredentialError> {
        let mut map = HashMap::new();
        for identity in identities {
            if map.contains_key(&identity.username) {
                return Err(CredentialError::DuplicateUsername(identity.username));
            }
            map.insert(identity.username.clone(), identity);
        }

        Ok(Self { identities: map })
    }

    /// Load a JSON credentials file: `{"users": [{id, username, password_hash, role}]}`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let raw = std::fs::read_to_string(path)?;
        let file: CredentialsFile = serde_json::from_str(&raw)?;
        Self::new(file.users)
    }

    /// Build a store from `(id, username, password, role)` tuples, hashing each password
    pub fn from_plaintext<'a>(
        entries: impl IntoIterator<Item = (&'a str, &'a str, &'a str, &'a str)>,
    ) -> Result<Self, CredentialError> {
        let identities = entries
            .into_iter()
            .map(|(id, username, password, role)| {
                Ok(Identity {
                    id: id.to_string(),
                    username: username.to_string(),
                    password_hash: hash_password(password)?,
                    role: role.to_string(),
                })
            })
            .collect::<Result<Vec<_>, CredentialError>>()?;

        Self::new(identities)
    }

    /// Exact username match plus password verification.
    ///
    /// Unknown usernames still pay for a hash verification so the two failure
    /// cases take comparable time.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<&Identity, CredentialError> {
        match self.identities.get(username) {
            Some(identity) if verify_password(&identity.password_hash, password) => Ok(identity),
            Some(_) => Err(CredentialError::InvalidCredentials),
            None => {
                match dummy_hash() {
                    Some(hash) => {
                        verify_password(hash, password);
                    }
                    // Same Argon2 cost as a verification
                    None => {
                        let _ = hash_password(password);
                    }
                }
                Err(CredentialError::InvalidCredentials)
            }
        }
    }

    pub fn get(&self, username: &str) -> Option<&Identity> {
        self.identities.get(username)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

/// Hash a password into an Argon2id PHC string with a random salt
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill(&mut salt_bytes);

    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| CredentialError::Hash(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CredentialError::Hash(e.to_string()))?
        .to_string();

    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| {
            hash_password("vigil-timing-equalizer")
                .inspect_err(|e| error!(error = %e, "Failed to prepare dummy password hash"))
                .ok()
        })
        .as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CredentialStore {
        CredentialStore::from_plaintext([
            ("u-1", "admin", "admin-pass", "admin"),
            ("u-2", "analyst", "analyst-pass", "analyst"),
        ])
        .unwrap()
    }

    #[test]
    fn test_authenticate_success() {
        let store = store();

        let identity = store.authenticate("analyst", "analyst-pass").unwrap();
        assert_eq!(identity.id, "u-2");
        assert_eq!(identity.role, "analyst");
    }

    #[test]
    fn test_authenticate_wrong_password() {
        let store = store();

        assert!(matches!(
            store.authenticate("admin", "analyst-pass"),
            Err(CredentialError::InvalidCredentials)
        ));
        assert!(matches!(
            store.authenticate("admin", ""),
            Err(CredentialError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_authenticate_unknown_user_same_error() {
        let store = store();

        assert!(matches!(
            store.authenticate("nobody", "admin-pass"),
            Err(CredentialError::InvalidCredentials)
        ));
        // Username match is exact
        assert!(matches!(
            store.authenticate("Admin", "admin-pass"),
            Err(CredentialError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();

        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(verify_password(&a, "same"));
        assert!(!verify_password("not-a-phc-string", "same"));
    }

    #[test]
    fn test_duplicate_usernames_rejected() {
        let result = CredentialStore::from_plaintext([
            ("u-1", "admin", "a", "admin"),
            ("u-2", "admin", "b", "viewer"),
        ]);

        assert!(matches!(result, Err(CredentialError::DuplicateUsername(name)) if name == "admin"));
    }

    #[test]
    fn test_load_file() {
        let hash = hash_password("viewer-pass").unwrap();
        let doc = serde_json::json!({
            "users": [
                { "id": "u-9", "username": "viewer", "password_hash": hash, "role": "viewer" }
            ]
        });

        let path = std::env::temp_dir().join(format!("vigil-creds-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, doc.to_string()).unwrap();

        let store = CredentialStore::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(store.len(), 1);
        assert_eq!(store.authenticate("viewer", "viewer-pass").unwrap().id, "u-9");
    }

    #[test]
    fn test_claims_input_excludes_secret() {
        let store = store();
        let input = store.get("admin").unwrap().claims_input();

        assert_eq!(input, ClaimsInput::new("u-1", "admin", "admin"));
    }

    #[test]
    fn test_dummy_hash_is_a_real_phc_string() {
        let hash = dummy_hash().expect("dummy hash should be available");

        // An empty or unparsable hash would make unknown-user rejections instant
        let parsed = PasswordHash::new(hash).unwrap();
        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        assert!(!verify_password(hash, "admin-pass"));
    }
}
