//! Database schemas for Cadence
//!
//! Defines MongoDB document structures for extension credentials and tokens.

mod credential;
mod metadata;
mod token;

pub use credential::{ExtensionCredentialDoc, CREDENTIAL_COLLECTION};
pub use metadata::Metadata;
pub use token::{ExtensionTokenDoc, TOKEN_COLLECTION};
