use ncloud_core::provider::ProviderError;
use std::time::Duration;
use thiserror::Error;

/// Classified failure of one remote call, before it crosses the host boundary.
///
/// `Clone` so that a single-flight cache computation can hand the same error
/// to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("transient failure (status {status:?}): {message}")]
    Transient {
        message: String,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },
    #[error("request failed (status {status:?}): {message}")]
    Permanent {
        message: String,
        status: Option<u16>,
    },
    #[error("credentials rejected: {message}")]
    Unauthorized { message: String },
    #[error("not found: {entity}")]
    NotFound { entity: String },
    #[error("rate limit wait exceeded: {message}")]
    RateLimited { message: String },
    #[error("cancelled")]
    Cancelled,
    #[error("gave up after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
    #[error("authentication required: {message}")]
    AuthenticationRequired { message: String },
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl CallError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            status: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Maps transport failures the way reqwest reports them.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            Self::Transient {
                message: err.to_string(),
                status,
                retry_after: None,
            }
        } else {
            Self::Permanent {
                message: err.to_string(),
                status,
            }
        }
    }
}

impl From<CallError> for ProviderError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Transient { message, .. } | CallError::Permanent { message, .. } => {
                ProviderError::RemoteUnavailable { message }
            }
            CallError::Exhausted { attempts, message } => ProviderError::RemoteUnavailable {
                message: format!("{message} (after {attempts} attempts)"),
            },
            CallError::Unauthorized { message } | CallError::AuthenticationRequired { message } => {
                ProviderError::AuthenticationRequired { message }
            }
            CallError::NotFound { entity } => ProviderError::NotFound { entity },
            CallError::RateLimited { message } => ProviderError::RateLimited { message },
            CallError::Cancelled => ProviderError::Cancelled,
            CallError::InvalidArgument { message } => ProviderError::InvalidArgument { message },
        }
    }
}
