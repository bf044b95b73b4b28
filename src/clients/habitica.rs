//! Habitica habit-tracking client
//!
//! Scores a learner's habit task up or down through the Habitica v3 REST
//! API, authenticating with the per-user credential pair held in the
//! vault. Credentials travel in headers and are never logged.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::clients::ServiceClient;
use crate::types::{CadenceError, Result};

/// Client identifier sent in the x-client header per Habitica API etiquette.
const CLIENT_ID: &str = "cadence-sync";

/// HTTP client for a Habitica-compatible endpoint.
pub struct HabiticaClient {
    http: reqwest::Client,
    base_url: String,
}

impl HabiticaClient {
    pub fn new(base_url: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| CadenceError::Internal(format!("HTTP client build failed: {e}")))?;

        let base_url = base_url.into();
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ServiceClient for HabiticaClient {
    fn name(&self) -> &'static str {
        "habitica"
    }

    /// Supported actions: `score/up` and `score/down`. Params must carry
    /// the vault credential fields (`task_id`, `user_id`, `api_token`).
    async fn call(&self, action: &str, params: Value) -> Result<Value> {
        let direction = parse_action(action)?;
        let task_id = required_param(&params, "task_id")?;
        let user_id = required_param(&params, "user_id")?;
        let api_token = required_param(&params, "api_token")?;

        debug!(action, "Habitica scoring call");

        let url = format!("{}/api/v3/tasks/{}/score/{}", self.base_url, task_id, direction);

        let response = self
            .http
            .post(&url)
            .header("x-api-user", user_id)
            .header("x-api-key", api_token)
            .header("x-client", CLIENT_ID)
            .send()
            .await
            .map_err(|e| CadenceError::Transport(format!("Habitica {action}: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CadenceError::Transport(format!("Habitica {action}: {e}")))?;

        parse_response(action, status, &body)
    }
}

fn parse_action(action: &str) -> Result<&'static str> {
    match action {
        "score/up" => Ok("up"),
        "score/down" => Ok("down"),
        other => Err(CadenceError::Validation(format!(
            "Unsupported Habitica action '{other}'"
        ))),
    }
}

fn required_param<'a>(params: &'a Value, field: &str) -> Result<&'a str> {
    params
        .get(field)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            CadenceError::Validation(format!("Habitica call is missing param '{field}'"))
        })
}

/// Classify one Habitica response per the shared client contract.
fn parse_response(action: &str, status: u16, body: &str) -> Result<Value> {
    if !(200..300).contains(&status) {
        // Pull the service's own message through when the body allows it
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("Habitica {action} returned HTTP {status}"));
        return Err(CadenceError::Protocol { status, message });
    }

    let envelope: Value = serde_json::from_str(body).map_err(|e| CadenceError::Protocol {
        status,
        message: format!("Habitica {action} returned a malformed body: {e}"),
    })?;

    if envelope.get("success").and_then(Value::as_bool) == Some(false) {
        let message = envelope
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request rejected");
        return Err(CadenceError::Remote(format!("Habitica {action}: {message}")));
    }

    Ok(envelope.get("data").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_scoring_actions_are_supported() {
        assert_eq!(parse_action("score/up").unwrap(), "up");
        assert_eq!(parse_action("score/down").unwrap(), "down");
        assert!(matches!(
            parse_action("tasks/list").unwrap_err(),
            CadenceError::Validation(_)
        ));
    }

    #[test]
    fn missing_credential_param_is_validation_error() {
        let err = required_param(&json!({"task_id": "t1"}), "api_token").unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));

        let err = required_param(&json!({"api_token": ""}), "api_token").unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
    }

    #[test]
    fn success_envelope_yields_data() {
        let body = r#"{"success": true, "data": {"delta": 1.2}}"#;
        let data = parse_response("score/up", 200, body).unwrap();
        assert_eq!(data, json!({"delta": 1.2}));
    }

    #[test]
    fn explicit_failure_is_remote_rejection() {
        let body = r#"{"success": false, "message": "Task not found."}"#;
        let err = parse_response("score/up", 200, body).unwrap_err();
        match err {
            CadenceError::Remote(message) => assert!(message.contains("Task not found")),
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[test]
    fn rate_limit_is_retryable_protocol_error() {
        let body = r#"{"success": false, "message": "Rate limited"}"#;
        let err = parse_response("score/up", 429, body).unwrap_err();
        assert!(matches!(err, CadenceError::Protocol { status: 429, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn auth_rejection_is_fatal() {
        let body = r#"{"success": false, "message": "You must login."}"#;
        let err = parse_response("score/up", 401, body).unwrap_err();
        assert!(matches!(err, CadenceError::Protocol { status: 401, .. }));
        assert!(!err.is_retryable());
    }
}
