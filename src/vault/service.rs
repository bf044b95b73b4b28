//! Credential Vault service
//!
//! At-rest confidentiality for third-party API secrets with non-disruptive
//! key rotation. Plaintext only ever exists in memory inside this module
//! (and the orchestrator's sync path); `meta` exposes bookkeeping without
//! decrypting anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::db::schemas::ExtensionCredentialDoc;
use crate::db::CredentialStore;
use crate::types::{CadenceError, Extension, Result};
use crate::vault::crypto::{decrypt_payload, encrypt_payload, NONCE_LEN};
use crate::vault::keyring::Keyring;

/// Non-secret bookkeeping for a stored credential.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialMeta {
    pub key_version: u32,
    pub updated_at: Option<DateTime<Utc>>,
    pub rotated_at: Option<DateTime<Utc>>,
}

impl CredentialMeta {
    fn from_doc(doc: &ExtensionCredentialDoc) -> Self {
        Self {
            key_version: doc.key_version,
            updated_at: doc.metadata.updated_at.map(|t| t.to_chrono()),
            rotated_at: doc.rotated_at.map(|t| t.to_chrono()),
        }
    }
}

/// Service managing encrypted per-user extension credentials.
pub struct VaultService {
    store: Arc<dyn CredentialStore>,
    keyring: Keyring,
    /// Per-(username, extension) rotation locks. Rotation is a
    /// read-modify-write on the stored ciphertext and must not interleave.
    rotation_locks: DashMap<(String, String), Arc<Mutex<()>>>,
}

impl VaultService {
    pub fn new(store: Arc<dyn CredentialStore>, keyring: Keyring) -> Self {
        Self {
            store,
            keyring,
            rotation_locks: DashMap::new(),
        }
    }

    /// Validate and store a credential payload, encrypted under the
    /// currently active key version. Upserts: at most one live row per
    /// (username, extension).
    pub async fn set(
        &self,
        username: &str,
        extension: Extension,
        payload: &BTreeMap<String, String>,
    ) -> Result<CredentialMeta> {
        for field in extension.required_fields() {
            match payload.get(*field) {
                Some(value) if !value.trim().is_empty() => {}
                _ => {
                    return Err(CadenceError::Validation(format!(
                        "Credential for {extension} is missing required field '{field}'"
                    )))
                }
            }
        }

        let plaintext = Zeroizing::new(serde_json::to_vec(payload).map_err(|e| {
            CadenceError::Internal(format!("Credential payload serialization failed: {e}"))
        })?);

        let version = self.keyring.active_version();
        let (nonce, ciphertext) = encrypt_payload(&plaintext, self.keyring.active_key())?;

        let doc = ExtensionCredentialDoc::new(
            username.to_string(),
            extension.as_str().to_string(),
            BASE64.encode(&ciphertext),
            BASE64.encode(nonce),
            version,
        );
        self.store.upsert(doc).await?;

        info!(username, extension = %extension, key_version = version, "Credential stored");

        // Report what the store actually recorded, not a fabricated view
        let stored = self.find_required(username, extension).await?;
        Ok(CredentialMeta::from_doc(&stored))
    }

    /// Non-secret bookkeeping for operator visibility. Never decrypts.
    pub async fn meta(
        &self,
        username: &str,
        extension: Extension,
    ) -> Result<Option<CredentialMeta>> {
        let doc = self.store.find(username, extension).await?;
        Ok(doc.as_ref().map(CredentialMeta::from_doc))
    }

    /// Delete the credential if present. Idempotent; returns the number of
    /// rows removed.
    pub async fn clear(&self, username: &str, extension: Extension) -> Result<u64> {
        let deleted = self.store.delete(username, extension).await?;
        if deleted > 0 {
            info!(username, extension = %extension, "Credential cleared");
        }
        Ok(deleted)
    }

    /// Decrypt the stored payload for the sync path.
    ///
    /// # Errors
    ///
    /// - [`CadenceError::NotFound`] if no credential exists
    /// - [`CadenceError::Decryption`] if the recorded key version was
    ///   retired or the ciphertext fails authentication
    pub async fn decrypt(
        &self,
        username: &str,
        extension: Extension,
    ) -> Result<BTreeMap<String, String>> {
        let doc = self.find_required(username, extension).await?;
        self.open_payload(&doc)
    }

    /// Re-encrypt the stored payload under the currently active key version
    /// without changing the plaintext. Serialized per (username, extension).
    pub async fn rotate(&self, username: &str, extension: Extension) -> Result<CredentialMeta> {
        let lock = self
            .rotation_locks
            .entry((username.to_string(), extension.as_str().to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let doc = self.find_required(username, extension).await?;
        let old_version = doc.key_version;

        // Fails before any write when the old key is gone (Decryption) or
        // the ciphertext is tampered, leaving the stored row untouched.
        let payload = self.open_payload(&doc)?;

        let plaintext = Zeroizing::new(serde_json::to_vec(&payload).map_err(|e| {
            CadenceError::Internal(format!("Credential payload serialization failed: {e}"))
        })?);

        let version = self.keyring.active_version();
        let (nonce, ciphertext) = encrypt_payload(&plaintext, self.keyring.active_key())?;
        let rotated_at = bson::DateTime::now();

        self.store
            .update_rotation(
                username,
                extension,
                BASE64.encode(&ciphertext),
                BASE64.encode(nonce),
                version,
                rotated_at,
            )
            .await?;

        info!(
            username,
            extension = %extension,
            from_version = old_version,
            to_version = version,
            "Credential rotated"
        );

        Ok(CredentialMeta {
            key_version: version,
            updated_at: doc.metadata.updated_at.map(|t| t.to_chrono()),
            rotated_at: Some(rotated_at.to_chrono()),
        })
    }

    /// Usernames with a stored credential for the extension, sorted.
    pub async fn list_users(&self, extension: Extension) -> Result<Vec<String>> {
        self.store.list_users(extension).await
    }

    async fn find_required(
        &self,
        username: &str,
        extension: Extension,
    ) -> Result<ExtensionCredentialDoc> {
        self.store.find(username, extension).await?.ok_or_else(|| {
            CadenceError::NotFound(format!("No {extension} credential for user '{username}'"))
        })
    }

    fn open_payload(&self, doc: &ExtensionCredentialDoc) -> Result<BTreeMap<String, String>> {
        let key = self.keyring.key(doc.key_version).ok_or_else(|| {
            CadenceError::Decryption(format!(
                "Key version {} was retired without a migration path; operator action required",
                doc.key_version
            ))
        })?;

        let ciphertext = BASE64
            .decode(&doc.ciphertext)
            .map_err(|e| CadenceError::Decryption(format!("Invalid ciphertext encoding: {e}")))?;
        let nonce_bytes = BASE64
            .decode(&doc.nonce)
            .map_err(|e| CadenceError::Decryption(format!("Invalid nonce encoding: {e}")))?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| CadenceError::Decryption("Invalid nonce length".into()))?;

        let plaintext = decrypt_payload(&ciphertext, key, &nonce)?;

        let payload = serde_json::from_slice(&plaintext).map_err(|e| {
            CadenceError::Decryption(format!("Decrypted payload is not valid JSON: {e}"))
        })?;

        debug!(
            username = %doc.username,
            extension = %doc.extension,
            key_version = doc.key_version,
            "Credential decrypted"
        );

        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryCredentialStore;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

    fn ring(versions: &[u32], active: u32) -> Keyring {
        let spec = versions
            .iter()
            .map(|v| format!("{v}:{}", BASE64.encode([*v as u8; 32])))
            .collect::<Vec<_>>()
            .join(",");
        Keyring::parse(&spec, active).unwrap()
    }

    fn habitica_payload() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("task_id".to_string(), "task-123".to_string()),
            ("user_id".to_string(), "user-456".to_string()),
            ("api_token".to_string(), "super-secret".to_string()),
        ])
    }

    fn vault_with(store: Arc<MemoryCredentialStore>, keyring: Keyring) -> VaultService {
        VaultService::new(store, keyring)
    }

    #[tokio::test]
    async fn set_then_decrypt_round_trips() {
        let vault = vault_with(Arc::new(MemoryCredentialStore::new()), ring(&[1], 1));
        let payload = habitica_payload();

        let meta = vault.set("alice", Extension::Habitica, &payload).await.unwrap();
        assert_eq!(meta.key_version, 1);

        let decrypted = vault.decrypt("alice", Extension::Habitica).await.unwrap();
        assert_eq!(decrypted, payload);
    }

    #[tokio::test]
    async fn set_rejects_missing_required_field() {
        let vault = vault_with(Arc::new(MemoryCredentialStore::new()), ring(&[1], 1));
        let mut payload = habitica_payload();
        payload.remove("api_token");

        let err = vault
            .set("alice", Extension::Habitica, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
    }

    #[tokio::test]
    async fn set_rejects_blank_required_field() {
        let vault = vault_with(Arc::new(MemoryCredentialStore::new()), ring(&[1], 1));
        let mut payload = habitica_payload();
        payload.insert("api_token".to_string(), "   ".to_string());

        let err = vault
            .set("alice", Extension::Habitica, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
    }

    #[tokio::test]
    async fn meta_never_exposes_plaintext_fields() {
        let vault = vault_with(Arc::new(MemoryCredentialStore::new()), ring(&[1], 1));
        vault
            .set("alice", Extension::Habitica, &habitica_payload())
            .await
            .unwrap();

        let meta = vault.meta("alice", Extension::Habitica).await.unwrap().unwrap();
        let rendered = serde_json::to_string(&meta).unwrap();
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("task-123"));
        assert_eq!(meta.key_version, 1);
    }

    #[tokio::test]
    async fn meta_for_absent_credential_is_none() {
        let vault = vault_with(Arc::new(MemoryCredentialStore::new()), ring(&[1], 1));
        assert!(vault.meta("ghost", Extension::Habitica).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let vault = vault_with(Arc::new(MemoryCredentialStore::new()), ring(&[1], 1));
        vault
            .set("alice", Extension::Habitica, &habitica_payload())
            .await
            .unwrap();

        assert_eq!(vault.clear("alice", Extension::Habitica).await.unwrap(), 1);
        assert_eq!(vault.clear("alice", Extension::Habitica).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rotate_reencrypts_under_active_version_without_changing_plaintext() {
        let store = Arc::new(MemoryCredentialStore::new());
        let payload = habitica_payload();

        // Stored under v1...
        let vault_v1 = vault_with(Arc::clone(&store), ring(&[1], 1));
        vault_v1
            .set("alice", Extension::Habitica, &payload)
            .await
            .unwrap();

        // ...rotated while both versions are valid and v2 is active
        let vault_v2 = vault_with(Arc::clone(&store), ring(&[1, 2], 2));
        let meta = vault_v2.rotate("alice", Extension::Habitica).await.unwrap();
        assert_eq!(meta.key_version, 2);
        assert!(meta.rotated_at.is_some());

        let decrypted = vault_v2.decrypt("alice", Extension::Habitica).await.unwrap();
        assert_eq!(decrypted, payload);

        // Rotating again changes nothing observable but rotated_at
        vault_v2.rotate("alice", Extension::Habitica).await.unwrap();
        let again = vault_v2.decrypt("alice", Extension::Habitica).await.unwrap();
        assert_eq!(again, payload);
        let meta = vault_v2
            .meta("alice", Extension::Habitica)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.key_version, 2);
    }

    #[tokio::test]
    async fn rotate_missing_credential_is_not_found() {
        let vault = vault_with(Arc::new(MemoryCredentialStore::new()), ring(&[1], 1));
        let err = vault.rotate("ghost", Extension::Habitica).await.unwrap_err();
        assert!(matches!(err, CadenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn rotate_with_retired_key_fails_and_leaves_row_untouched() {
        let store = Arc::new(MemoryCredentialStore::new());

        let vault_v1 = vault_with(Arc::clone(&store), ring(&[1], 1));
        vault_v1
            .set("alice", Extension::Habitica, &habitica_payload())
            .await
            .unwrap();
        let before = store
            .find("alice", Extension::Habitica)
            .await
            .unwrap()
            .unwrap();

        // Ring no longer carries v1: rotation must fail fatally
        let vault_v2 = vault_with(Arc::clone(&store), ring(&[2], 2));
        let err = vault_v2.rotate("alice", Extension::Habitica).await.unwrap_err();
        assert!(matches!(err, CadenceError::Decryption(_)));

        let after = store
            .find("alice", Extension::Habitica)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.ciphertext, before.ciphertext);
        assert_eq!(after.nonce, before.nonce);
        assert_eq!(after.key_version, before.key_version);
        assert!(after.rotated_at.is_none());
    }

    #[tokio::test]
    async fn decrypt_missing_credential_is_not_found() {
        let vault = vault_with(Arc::new(MemoryCredentialStore::new()), ring(&[1], 1));
        let err = vault.decrypt("ghost", Extension::Habitica).await.unwrap_err();
        assert!(matches!(err, CadenceError::NotFound(_)));
    }

    #[tokio::test]
    async fn set_after_rotate_clears_the_rotation_timestamp() {
        let store = Arc::new(MemoryCredentialStore::new());
        let vault = vault_with(Arc::clone(&store), ring(&[1], 1));

        vault
            .set("alice", Extension::Habitica, &habitica_payload())
            .await
            .unwrap();
        vault.rotate("alice", Extension::Habitica).await.unwrap();
        let rotated = vault
            .meta("alice", Extension::Habitica)
            .await
            .unwrap()
            .unwrap();
        assert!(rotated.rotated_at.is_some());

        // A fresh payload has never been rotated
        let returned = vault
            .set("alice", Extension::Habitica, &habitica_payload())
            .await
            .unwrap();
        assert!(returned.rotated_at.is_none());

        let stored = vault
            .meta("alice", Extension::Habitica)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.rotated_at.is_none());
        assert_eq!(stored.key_version, returned.key_version);
        assert_eq!(stored.updated_at, returned.updated_at);
    }

    #[tokio::test]
    async fn meta_never_mutates_the_stored_row() {
        let store = Arc::new(MemoryCredentialStore::new());
        let vault = vault_with(Arc::clone(&store), ring(&[1], 1));
        vault
            .set("alice", Extension::Habitica, &habitica_payload())
            .await
            .unwrap();

        let before = store
            .find("alice", Extension::Habitica)
            .await
            .unwrap()
            .unwrap();

        for _ in 0..3 {
            vault.meta("alice", Extension::Habitica).await.unwrap();
        }

        let after = store
            .find("alice", Extension::Habitica)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.ciphertext, before.ciphertext);
        assert_eq!(after.nonce, before.nonce);
        assert_eq!(after.key_version, before.key_version);
        assert_eq!(after.metadata.created_at, before.metadata.created_at);
        assert_eq!(after.metadata.updated_at, before.metadata.updated_at);
        assert_eq!(after.rotated_at, before.rotated_at);
    }

    /// Store wrapper that records read/write ordering, with a pause after
    /// each read so an unserialized second rotation would interleave.
    struct InterleavingStore {
        inner: MemoryCredentialStore,
        events: std::sync::Mutex<Vec<&'static str>>,
    }

    impl InterleavingStore {
        fn new() -> Self {
            Self {
                inner: MemoryCredentialStore::new(),
                events: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl crate::db::CredentialStore for InterleavingStore {
        async fn upsert(&self, doc: crate::db::schemas::ExtensionCredentialDoc) -> Result<()> {
            self.inner.upsert(doc).await
        }

        async fn find(
            &self,
            username: &str,
            extension: Extension,
        ) -> Result<Option<ExtensionCredentialDoc>> {
            self.events.lock().unwrap().push("read");
            let row = self.inner.find(username, extension).await;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            row
        }

        async fn update_rotation(
            &self,
            username: &str,
            extension: Extension,
            ciphertext: String,
            nonce: String,
            key_version: u32,
            rotated_at: bson::DateTime,
        ) -> Result<()> {
            self.events.lock().unwrap().push("write");
            self.inner
                .update_rotation(username, extension, ciphertext, nonce, key_version, rotated_at)
                .await
        }

        async fn delete(&self, username: &str, extension: Extension) -> Result<u64> {
            self.inner.delete(username, extension).await
        }

        async fn list_users(&self, extension: Extension) -> Result<Vec<String>> {
            self.inner.list_users(extension).await
        }
    }

    #[tokio::test]
    async fn concurrent_rotations_for_one_credential_are_serialized() {
        let store = Arc::new(InterleavingStore::new());
        let vault = VaultService::new(
            Arc::clone(&store) as Arc<dyn crate::db::CredentialStore>,
            ring(&[1], 1),
        );

        vault
            .set("alice", Extension::Habitica, &habitica_payload())
            .await
            .unwrap();
        store.events.lock().unwrap().clear();

        let (a, b) = tokio::join!(
            vault.rotate("alice", Extension::Habitica),
            vault.rotate("alice", Extension::Habitica),
        );
        a.unwrap();
        b.unwrap();

        // Each rotation's read-modify-write completes before the next
        // one's read begins, never read-read-write-write
        let events = store.events.lock().unwrap();
        assert_eq!(events.as_slice(), ["read", "write", "read", "write"]);
    }
}
