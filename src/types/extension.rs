//! Third-party extension kinds
//!
//! An extension is an external gamification/habit service a learner can
//! connect. Each kind names the credential fields it requires; the vault
//! validates those on `set`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::CadenceError;

/// Supported third-party extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    /// Habitica habit tracker (scores a task up/down per review outcome).
    Habitica,
}

impl Extension {
    /// Stable identifier used in storage rows and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Habitica => "habitica",
        }
    }

    /// Credential fields that must be present and non-empty on `set`.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            // task_id: the Habitica habit scored on each sync
            // user_id + api_token: the x-api-user / x-api-key header pair
            Self::Habitica => &["task_id", "user_id", "api_token"],
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Extension {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "habitica" => Ok(Self::Habitica),
            other => Err(CadenceError::Validation(format!(
                "Unknown extension kind: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(Extension::from_str("Habitica").unwrap(), Extension::Habitica);
        assert_eq!(Extension::from_str("habitica").unwrap(), Extension::Habitica);
    }

    #[test]
    fn unknown_kind_is_validation_error() {
        let err = Extension::from_str("beeminder").unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
    }

    #[test]
    fn habitica_requires_scoring_credentials() {
        let fields = Extension::Habitica.required_fields();
        assert!(fields.contains(&"task_id"));
        assert!(fields.contains(&"user_id"));
        assert!(fields.contains(&"api_token"));
    }
}
