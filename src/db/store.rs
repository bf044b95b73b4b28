//! Credential and token storage capability traits
//!
//! The vault and token manager depend only on these traits. Production
//! uses the Mongo-backed implementations; dev mode and tests use the
//! in-memory implementations so the whole sync path runs without a
//! database.

use async_trait::async_trait;
use bson::{doc, Bson, DateTime};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    ExtensionCredentialDoc, ExtensionTokenDoc, CREDENTIAL_COLLECTION, TOKEN_COLLECTION,
};
use crate::types::{Extension, Result};

// =============================================================================
// Traits
// =============================================================================

/// Storage for encrypted extension credentials, one row per
/// (username, extension).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Create or replace the row for (username, extension). Advances
    /// `updated_at`, preserves `created_at` on replace, and clears
    /// `rotated_at` since the new ciphertext has never been rotated.
    async fn upsert(&self, doc: ExtensionCredentialDoc) -> Result<()>;

    async fn find(
        &self,
        username: &str,
        extension: Extension,
    ) -> Result<Option<ExtensionCredentialDoc>>;

    /// Swap in re-encrypted ciphertext after a key rotation. Does not
    /// advance `updated_at` - rotation changes no plaintext.
    async fn update_rotation(
        &self,
        username: &str,
        extension: Extension,
        ciphertext: String,
        nonce: String,
        key_version: u32,
        rotated_at: DateTime,
    ) -> Result<()>;

    /// Delete the row if present; returns the number of rows removed.
    async fn delete(&self, username: &str, extension: Extension) -> Result<u64>;

    /// Every username with a credential row for the extension.
    async fn list_users(&self, extension: Extension) -> Result<Vec<String>>;
}

/// Storage for API token rows.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, doc: ExtensionTokenDoc) -> Result<()>;

    /// Insert a new active token and revoke every other active token for
    /// the same user as one logical unit. Returns the revoked count.
    async fn insert_and_revoke_prior(&self, doc: ExtensionTokenDoc) -> Result<u64>;

    /// Revoke every active token for the user; returns the revoked count.
    async fn revoke_active(&self, username: &str) -> Result<u64>;

    async fn find_active_by_digest(&self, digest: &str) -> Result<Option<ExtensionTokenDoc>>;

    /// Record a successful presentation of the token.
    async fn touch_last_used(&self, digest: &str) -> Result<()>;
}

// =============================================================================
// Mongo-backed implementations
// =============================================================================

pub struct MongoCredentialStore {
    coll: MongoCollection<ExtensionCredentialDoc>,
}

impl MongoCredentialStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            coll: client.collection(CREDENTIAL_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl CredentialStore for MongoCredentialStore {
    async fn upsert(&self, doc: ExtensionCredentialDoc) -> Result<()> {
        let now = DateTime::now();
        self.coll
            .upsert_one(
                doc! { "username": &doc.username, "extension": &doc.extension },
                doc! {
                    "$set": {
                        "ciphertext": &doc.ciphertext,
                        "nonce": &doc.nonce,
                        "key_version": doc.key_version as i64,
                        // Fresh ciphertext: any rotation timestamp described
                        // the replaced payload
                        "rotated_at": Bson::Null,
                        "metadata.updated_at": now,
                    },
                    "$setOnInsert": {
                        "username": &doc.username,
                        "extension": &doc.extension,
                        "metadata.created_at": now,
                    },
                },
            )
            .await?;
        Ok(())
    }

    async fn find(
        &self,
        username: &str,
        extension: Extension,
    ) -> Result<Option<ExtensionCredentialDoc>> {
        self.coll
            .find_one(doc! { "username": username, "extension": extension.as_str() })
            .await
    }

    async fn update_rotation(
        &self,
        username: &str,
        extension: Extension,
        ciphertext: String,
        nonce: String,
        key_version: u32,
        rotated_at: DateTime,
    ) -> Result<()> {
        self.coll
            .update_one(
                doc! { "username": username, "extension": extension.as_str() },
                doc! {
                    "$set": {
                        "ciphertext": ciphertext,
                        "nonce": nonce,
                        "key_version": key_version as i64,
                        "rotated_at": rotated_at,
                    },
                },
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, username: &str, extension: Extension) -> Result<u64> {
        self.coll
            .delete_many(doc! { "username": username, "extension": extension.as_str() })
            .await
    }

    async fn list_users(&self, extension: Extension) -> Result<Vec<String>> {
        let values = self
            .coll
            .distinct("username", doc! { "extension": extension.as_str() })
            .await?;

        let mut users: Vec<String> = values
            .into_iter()
            .filter_map(|v| match v {
                Bson::String(s) => Some(s),
                _ => None,
            })
            .collect();
        users.sort();
        Ok(users)
    }
}

pub struct MongoTokenStore {
    coll: MongoCollection<ExtensionTokenDoc>,
}

impl MongoTokenStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            coll: client.collection(TOKEN_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl TokenStore for MongoTokenStore {
    async fn insert(&self, doc: ExtensionTokenDoc) -> Result<()> {
        self.coll.insert_one(doc).await?;
        Ok(())
    }

    async fn insert_and_revoke_prior(&self, doc: ExtensionTokenDoc) -> Result<u64> {
        let username = doc.username.clone();
        let digest = doc.token_digest.clone();
        self.coll.insert_one(doc).await?;

        // The new plaintext has not been handed to any caller yet, so no
        // verifier can observe two "current" tokens during this step.
        let result = self
            .coll
            .update_many(
                doc! {
                    "username": username,
                    "revoked_at": Bson::Null,
                    "token_digest": { "$ne": digest },
                },
                doc! { "$set": { "revoked_at": DateTime::now() } },
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn revoke_active(&self, username: &str) -> Result<u64> {
        let result = self
            .coll
            .update_many(
                doc! { "username": username, "revoked_at": Bson::Null },
                doc! { "$set": { "revoked_at": DateTime::now() } },
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn find_active_by_digest(&self, digest: &str) -> Result<Option<ExtensionTokenDoc>> {
        self.coll
            .find_one(doc! { "token_digest": digest, "revoked_at": Bson::Null })
            .await
    }

    async fn touch_last_used(&self, digest: &str) -> Result<()> {
        self.coll
            .update_one(
                doc! { "token_digest": digest },
                doc! { "$set": { "last_used_at": DateTime::now() } },
            )
            .await?;
        Ok(())
    }
}

// =============================================================================
// In-memory implementations (dev mode and tests)
// =============================================================================

#[derive(Default)]
pub struct MemoryCredentialStore {
    rows: DashMap<(String, String), ExtensionCredentialDoc>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn upsert(&self, mut doc: ExtensionCredentialDoc) -> Result<()> {
        let key = (doc.username.clone(), doc.extension.clone());
        let now = DateTime::now();
        doc.metadata.updated_at = Some(now);
        doc.metadata.created_at = self
            .rows
            .get(&key)
            .and_then(|existing| existing.metadata.created_at)
            .or(Some(now));
        self.rows.insert(key, doc);
        Ok(())
    }

    async fn find(
        &self,
        username: &str,
        extension: Extension,
    ) -> Result<Option<ExtensionCredentialDoc>> {
        let key = (username.to_string(), extension.as_str().to_string());
        Ok(self.rows.get(&key).map(|r| r.clone()))
    }

    async fn update_rotation(
        &self,
        username: &str,
        extension: Extension,
        ciphertext: String,
        nonce: String,
        key_version: u32,
        rotated_at: DateTime,
    ) -> Result<()> {
        let key = (username.to_string(), extension.as_str().to_string());
        if let Some(mut row) = self.rows.get_mut(&key) {
            row.ciphertext = ciphertext;
            row.nonce = nonce;
            row.key_version = key_version;
            row.rotated_at = Some(rotated_at);
        }
        Ok(())
    }

    async fn delete(&self, username: &str, extension: Extension) -> Result<u64> {
        let key = (username.to_string(), extension.as_str().to_string());
        Ok(self.rows.remove(&key).map(|_| 1).unwrap_or(0))
    }

    async fn list_users(&self, extension: Extension) -> Result<Vec<String>> {
        let mut users: Vec<String> = self
            .rows
            .iter()
            .filter(|entry| entry.key().1 == extension.as_str())
            .map(|entry| entry.key().0.clone())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }
}

#[derive(Default)]
pub struct MemoryTokenStore {
    rows: Mutex<Vec<ExtensionTokenDoc>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/ops helper: every row for a user, newest last.
    pub async fn rows_for(&self, username: &str) -> Vec<ExtensionTokenDoc> {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|t| t.username == username)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert(&self, doc: ExtensionTokenDoc) -> Result<()> {
        self.rows.lock().await.push(doc);
        Ok(())
    }

    async fn insert_and_revoke_prior(&self, doc: ExtensionTokenDoc) -> Result<u64> {
        // Single lock makes the transition atomic for observers.
        let mut rows = self.rows.lock().await;
        let now = DateTime::now();
        let mut revoked = 0;
        for row in rows.iter_mut() {
            if row.username == doc.username && row.is_active() {
                row.revoked_at = Some(now);
                revoked += 1;
            }
        }
        rows.push(doc);
        Ok(revoked)
    }

    async fn revoke_active(&self, username: &str) -> Result<u64> {
        let mut rows = self.rows.lock().await;
        let now = DateTime::now();
        let mut revoked = 0;
        for row in rows.iter_mut() {
            if row.username == username && row.is_active() {
                row.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn find_active_by_digest(&self, digest: &str) -> Result<Option<ExtensionTokenDoc>> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .find(|t| t.token_digest == digest && t.is_active())
            .cloned())
    }

    async fn touch_last_used(&self, digest: &str) -> Result<()> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.iter_mut().find(|t| t.token_digest == digest) {
            row.last_used_at = Some(DateTime::now());
        }
        Ok(())
    }
}
