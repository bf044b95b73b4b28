//! External service clients
//!
//! Both the review client and the habit client expose the same capability
//! shape: `call(action, params) -> result`. The orchestrator depends only
//! on [`ServiceClient`], so either side can be substituted with a test
//! double, and retry policy stays out of the clients entirely (it belongs
//! to the orchestrator, uniformly).
//!
//! Error classification contract:
//! - connection errors and timeouts -> [`CadenceError::Transport`]
//! - non-2xx or malformed bodies -> [`CadenceError::Protocol`]
//! - well-formed responses carrying an application-level failure ->
//!   [`CadenceError::Remote`] with the service's own message

pub mod anki;
pub mod habitica;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::Result;

/// Capability interface over one external HTTP service.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Service name for log fields and error messages.
    fn name(&self) -> &'static str;

    /// Perform one call. Never retries internally.
    async fn call(&self, action: &str, params: Value) -> Result<Value>;
}

pub use anki::AnkiClient;
pub use habitica::HabiticaClient;
