//! Credential Vault
//!
//! Encrypts, stores, retrieves, and rotates per-user third-party
//! credentials keyed by (username, extension kind).
//!
//! # Responsibilities
//!
//! - Validate and encrypt credential payloads at `set`
//! - Serve non-secret bookkeeping via `meta`
//! - Re-encrypt under the active key version on `rotate`, serialized per
//!   (username, extension)
//! - Decrypt for the sync path only

pub mod crypto;
pub mod keyring;
pub mod service;

pub use keyring::Keyring;
pub use service::{CredentialMeta, VaultService};
