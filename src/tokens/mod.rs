//! Token Manager
//!
//! Issues and revokes opaque bearer tokens for a learner's programmatic
//! access. The plaintext secret is returned exactly once at creation; only
//! its SHA-256 digest is stored, so a lost token can only be replaced, not
//! recovered.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::db::schemas::ExtensionTokenDoc;
use crate::db::TokenStore;
use crate::types::Result;
use crate::vault::crypto::generate_random_bytes;

/// Prefix on issued tokens, so they are recognizable in operator logs
/// without being guessable.
const TOKEN_PREFIX: &str = "cad_";

/// Entropy of the token secret in bytes.
const TOKEN_SECRET_LEN: usize = 32;

/// Service for issuing, revoking, and verifying API tokens.
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Issue a new token. Prior tokens stay valid; use [`rotate`](Self::rotate)
    /// for replace semantics. Returns the plaintext, which is unrecoverable
    /// after this call.
    pub async fn create(&self, username: &str, created_by: &str) -> Result<String> {
        let (plaintext, digest) = generate_token();
        self.store
            .insert(ExtensionTokenDoc::new(
                username.to_string(),
                digest,
                created_by.to_string(),
            ))
            .await?;

        info!(username, created_by, "API token issued");
        Ok(plaintext)
    }

    /// Revoke every active token for the user. Idempotent; returns the
    /// number of tokens revoked.
    pub async fn revoke_all(&self, username: &str) -> Result<u64> {
        let revoked = self.store.revoke_active(username).await?;
        if revoked > 0 {
            info!(username, revoked, "API tokens revoked");
        }
        Ok(revoked)
    }

    /// Issue a new token and revoke the previously active set as one
    /// logical unit, so a verifier never observes zero or two concurrently
    /// valid tokens. Returns the new plaintext.
    pub async fn rotate(&self, username: &str, created_by: &str) -> Result<String> {
        let (plaintext, digest) = generate_token();
        let revoked = self
            .store
            .insert_and_revoke_prior(ExtensionTokenDoc::new(
                username.to_string(),
                digest,
                created_by.to_string(),
            ))
            .await?;

        info!(username, created_by, revoked, "API token rotated");
        Ok(plaintext)
    }

    /// Verify a presented token. Returns the owning username when the
    /// token is active, recording the use; `None` otherwise.
    pub async fn verify(&self, presented: &str) -> Result<Option<String>> {
        let digest = digest_token(presented);
        let Some(row) = self.store.find_active_by_digest(&digest).await? else {
            return Ok(None);
        };

        // The digest lookup is an exact-match index query; re-compare in
        // constant time so the accept path leaks no timing signal.
        if !constant_time_compare(&row.token_digest, &digest) {
            return Ok(None);
        }

        self.store.touch_last_used(&digest).await?;
        Ok(Some(row.username))
    }
}

/// Generate a fresh token secret and its storage digest.
fn generate_token() -> (String, String) {
    let secret: [u8; TOKEN_SECRET_LEN] = generate_random_bytes();
    let plaintext = format!("{TOKEN_PREFIX}{}", hex::encode(secret));
    let digest = digest_token(&plaintext);
    (plaintext, digest)
}

/// SHA-256 digest of a token secret, hex-encoded.
fn digest_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
