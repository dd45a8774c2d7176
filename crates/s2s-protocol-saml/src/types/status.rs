//! Response status.

use serde::{Deserialize, Serialize};

use super::status_codes;

/// SAML Status element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Top-level status code URI.
    pub code: String,

    /// Second-level status code URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_code: Option<String>,

    /// Human readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Status {
    /// Creates a success status.
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: status_codes::SUCCESS.to_string(),
            sub_code: None,
            message: None,
        }
    }

    /// Creates a responder error status.
    #[must_use]
    pub fn responder_error(message: impl Into<String>) -> Self {
        Self {
            code: status_codes::RESPONDER.to_string(),
            sub_code: None,
            message: Some(message.into()),
        }
    }

    /// Returns true if the top-level code is Success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == status_codes::SUCCESS
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}
