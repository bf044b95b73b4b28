//! AnkiConnect-compatible review client
//!
//! Thin typed wrapper over the AnkiConnect JSON API: every request is a
//! `POST` of `{action, version, params}` to one endpoint, every response a
//! `{result, error}` envelope.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::clients::ServiceClient;
use crate::types::{CadenceError, Result};

/// AnkiConnect protocol version spoken by this client.
const ANKICONNECT_VERSION: u32 = 6;

/// HTTP client for an AnkiConnect endpoint.
pub struct AnkiClient {
    http: reqwest::Client,
    base_url: String,
}

impl AnkiClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| CadenceError::Internal(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl ServiceClient for AnkiClient {
    fn name(&self) -> &'static str {
        "anki"
    }

    async fn call(&self, action: &str, params: Value) -> Result<Value> {
        debug!(action, "AnkiConnect call");

        let response = self
            .http
            .post(&self.base_url)
            .json(&json!({
                "action": action,
                "version": ANKICONNECT_VERSION,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| CadenceError::Transport(format!("AnkiConnect {action}: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CadenceError::Transport(format!("AnkiConnect {action}: {e}")))?;

        parse_response(action, status, &body)
    }
}

/// Classify one AnkiConnect response per the shared client contract.
fn parse_response(action: &str, status: u16, body: &str) -> Result<Value> {
    if !(200..300).contains(&status) {
        return Err(CadenceError::Protocol {
            status,
            message: format!("AnkiConnect {action} returned HTTP {status}"),
        });
    }

    let envelope: Value = serde_json::from_str(body).map_err(|e| CadenceError::Protocol {
        status,
        message: format!("AnkiConnect {action} returned a malformed body: {e}"),
    })?;

    match envelope.get("error") {
        Some(Value::Null) | None => {}
        Some(err) => {
            let message = err.as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
            return Err(CadenceError::Remote(format!("AnkiConnect {action}: {message}")));
        }
    }

    Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
}
