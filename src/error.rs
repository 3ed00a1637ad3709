//! Outbound Core Error Types
//!
//! Error definitions for transfer, reconciliation, and notification operations.

use thiserror::Error;

use crate::upstream::ApiErrorBody;

/// Outbound core error
#[derive(Error, Debug)]
pub enum OutboundError {
    /// Upstream or local validation surfaced a blocking issue
    #[error("transfer validation failed: {0}")]
    ValidationRejected(String),

    /// Upstream reported available balance below the requested amount
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: String, requested: String },

    /// Upstream refused the initiate call after all permitted retries
    #[error("failed to initiate transfer with upstream: {0}")]
    InitiationFailed(String),

    /// Upstream API returned a non-success status
    #[error("upstream api error (HTTP {status}): {}", api_error_detail(.parsed, .body))]
    Api {
        status: u16,
        body: String,
        parsed: Option<ApiErrorBody>,
    },

    /// Transport-level failure talking to an external endpoint
    #[error("network error: {0}")]
    Network(String),

    /// Resource does not exist (or is not visible to the caller)
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Uniqueness constraint already satisfied
    #[error("duplicate {0}")]
    Duplicate(&'static str),

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outbound core result type
pub type OutboundResult<T> = Result<T, OutboundError>;

fn api_error_detail<'a>(parsed: &'a Option<ApiErrorBody>, body: &'a str) -> &'a str {
    parsed
        .as_ref()
        .and_then(|p| p.message())
        .filter(|m| !m.is_empty())
        .unwrap_or(body)
}

impl OutboundError {
    /// True for errors the background loops treat as transient: transport
    /// failures and upstream 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            OutboundError::Network(_) => true,
            OutboundError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for OutboundError {
    fn from(e: reqwest::Error) -> Self {
        OutboundError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for OutboundError {
    fn from(e: serde_json::Error) -> Self {
        OutboundError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OutboundError::Network("timeout".to_string()).is_transient());
        assert!(OutboundError::Api {
            status: 503,
            body: String::new(),
            parsed: None,
        }
        .is_transient());
        assert!(!OutboundError::Api {
            status: 404,
            body: String::new(),
            parsed: None,
        }
        .is_transient());
        assert!(!OutboundError::Duplicate("notification").is_transient());
    }

    #[test]
    fn test_api_error_display_prefers_parsed_message() {
        let err = OutboundError::Api {
            status: 422,
            body: "{\"message\":\"bad routing number\"}".to_string(),
            parsed: Some(ApiErrorBody {
                error: None,
                message: Some("bad routing number".to_string()),
                code: Some("NW-422".to_string()),
                details: None,
            }),
        };
        assert_eq!(
            err.to_string(),
            "upstream api error (HTTP 422): bad routing number"
        );
    }
}
