use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Errors that occur while talking to the CRM REST endpoint.
#[derive(Debug, Error)]
pub enum CrmError {
    #[error("crm HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("crm service returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("crm rejected {method}: {message}")]
    Remote { method: String, message: String },
    #[error("failed to decode crm response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("crm request timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid crm endpoint '{0}'")]
    Endpoint(String),
    #[error("crm returned no outcome for {0}")]
    MissingOutcome(String),
}

impl CrmError {
    pub fn status(status: StatusCode, body: String) -> Self {
        CrmError::Status { status, body }
    }

    pub fn remote(method: impl Into<String>, message: impl Into<String>) -> Self {
        CrmError::Remote {
            method: method.into(),
            message: message.into(),
        }
    }
}
