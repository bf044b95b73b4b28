//! Extension credential document schema
//!
//! One row per (username, extension). The payload is stored only as
//! ChaCha20-Poly1305 ciphertext; `key_version` records which vault key
//! produced it so rotation can decrypt with the old key and re-encrypt
//! under the active one.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for extension credentials
pub const CREDENTIAL_COLLECTION: &str = "extension_credentials";

/// Encrypted third-party credential stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ExtensionCredentialDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning learner
    pub username: String,

    /// Extension kind (e.g. "habitica")
    pub extension: String,

    /// Encrypted payload (base64)
    pub ciphertext: String,

    /// Encryption nonce (base64)
    pub nonce: String,

    /// Vault key version that produced the ciphertext
    pub key_version: u32,

    /// Last time the ciphertext was re-encrypted under a newer key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<DateTime>,
}

impl ExtensionCredentialDoc {
    /// Create a new credential document
    pub fn new(
        username: String,
        extension: String,
        ciphertext: String,
        nonce: String,
        key_version: u32,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            username,
            extension,
            ciphertext,
            nonce,
            key_version,
            rotated_at: None,
        }
    }
}

impl IntoIndexes for ExtensionCredentialDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // One live row per (username, extension)
            (
                doc! { "username": 1, "extension": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("username_extension_unique".to_string())
                        .build(),
                ),
            ),
            // Index on extension for listing a service's connected users
            (
                doc! { "extension": 1 },
                Some(
                    IndexOptions::builder()
                        .name("extension_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ExtensionCredentialDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
