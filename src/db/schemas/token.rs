//! Extension token document schema
//!
//! Bearer tokens for a learner's own programmatic access. Only a SHA-256
//! digest of the secret is stored; the plaintext is shown once at creation
//! and is unrecoverable afterwards.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for extension tokens
pub const TOKEN_COLLECTION: &str = "extension_tokens";

/// API token document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ExtensionTokenDoc {
    /// MongoDB document ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    /// Common metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Owning learner
    pub username: String,

    /// SHA-256 digest of the token secret (hex)
    pub token_digest: String,

    /// Operator or system identity that issued the token (audit trail)
    pub created_by: String,

    /// Set when the token is revoked; null while active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime>,

    /// Last time the token was presented successfully
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime>,
}

impl ExtensionTokenDoc {
    /// Create a new active token document
    pub fn new(username: String, token_digest: String, created_by: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            username,
            token_digest,
            created_by,
            revoked_at: None,
            last_used_at: None,
        }
    }

    /// Whether the token is still active
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

impl IntoIndexes for ExtensionTokenDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on token_digest
            (
                doc! { "token_digest": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("token_digest_unique".to_string())
                        .build(),
                ),
            ),
            // Index on username for listing a learner's tokens
            (
                doc! { "username": 1 },
                Some(
                    IndexOptions::builder()
                        .name("username_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl MutMetadata for ExtensionTokenDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
