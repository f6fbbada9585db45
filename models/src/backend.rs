//! Failures reported by backend services and their retry classification.
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use uuid::Uuid;

use std::fmt;

// Error codes that signal a condition expected to clear up on its own.
const RATE_LIMIT_CODE: &str = "RequestLimitExceeded";
const INTERNAL_ERROR_CODE: &str = "InternalError";
const RESOURCE_BUSY_CODES: &[&str] = &["ResourceBusy", "ResourceUnavailable.Busy", "FailedOperation.Busy"];

// Error codes that mean the addressed resource does not exist.
const NOT_FOUND_CODE: &str = "ResourceNotFound";
const INVALID_PARAMETER_NOT_FOUND_CODE: &str = "InvalidParameter.NotFound";

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A failure reported by one backend call.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum BackendError {
    #[snafu(display(
        "[{}] {}{}",
        code,
        message,
        request_id.as_ref().map(|id| format!(" (request id {})", id)).unwrap_or_default()
    ))]
    /// The service processed the request and rejected it.
    Service {
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[snafu(display("Unable to reach backend service: {}", message))]
    /// The request never produced a service response.
    Transport { message: String },
}

/// How the executor should treat a failed call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FailureClass {
    /// Rate limiting, transient internal errors, busy resources or transport failures; safe to retry.
    Transient,
    /// The addressed resource does not exist.
    NotFound,
    /// Validation errors, state conflicts and everything else; retrying cannot help.
    Terminal,
}

impl BackendError {
    pub fn service<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        BackendError::Service {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            BackendError::Service { code, .. } => Some(code),
            BackendError::Transport { .. } => None,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            BackendError::Transport { .. } => FailureClass::Transient,
            BackendError::Service { code, .. } => classify_code(code),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == FailureClass::NotFound
    }
}

fn classify_code(code: &str) -> FailureClass {
    let family = code.split('.').next().unwrap_or(code);
    if code == RATE_LIMIT_CODE
        || family == INTERNAL_ERROR_CODE
        || RESOURCE_BUSY_CODES.contains(&code)
    {
        FailureClass::Transient
    } else if family == NOT_FOUND_CODE || code == INVALID_PARAMETER_NOT_FOUND_CODE {
        FailureClass::NotFound
    } else {
        FailureClass::Terminal
    }
}

/// A caller-supplied token that lets the backend deduplicate retried create calls.
///
/// One token is minted per planned create operation and reused for every retry of that operation.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    pub fn generate() -> Self {
        IdempotencyToken(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for IdempotencyToken {
    fn from(token: &str) -> Self {
        IdempotencyToken(token.to_string())
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_classification() {
        let test_cases = vec![
            ("RequestLimitExceeded", FailureClass::Transient),
            ("InternalError", FailureClass::Transient),
            ("InternalError.DbAffectivedRows", FailureClass::Transient),
            ("ResourceUnavailable.Busy", FailureClass::Transient),
            ("ResourceNotFound", FailureClass::NotFound),
            ("ResourceNotFound.ClusterNotFound", FailureClass::NotFound),
            ("InvalidParameter.NotFound", FailureClass::NotFound),
            ("InvalidParameter", FailureClass::Terminal),
            ("ResourceInUse", FailureClass::Terminal),
            ("FailedOperation.ClusterState", FailureClass::Terminal),
            ("UnauthorizedOperation", FailureClass::Terminal),
        ];

        for (code, class) in test_cases {
            assert_eq!(BackendError::service(code, "message").class(), class, "{}", code);
        }

        assert!(BackendError::Transport {
            message: "connection reset".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(IdempotencyToken::generate(), IdempotencyToken::generate());
    }
}
