//! Transformation client trait and error taxonomy.
//!
//! A [`TransformClient`] sends one piece of text plus instructions to the
//! external rewriting/summarization service and returns the transformed
//! text or a typed [`TransformError`]. Concrete clients (HTTP, disabled)
//! live in the application crate; tests use scripted fakes.
//!
//! # Retry budget
//!
//! | Error | Retries |
//! |-------|---------|
//! | `RateLimited` | up to `max_retries` |
//! | `Timeout` | up to `max_retries` |
//! | `ServiceError` | at most once |
//! | `InvalidInput` | never |

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ErrorInfo, ErrorKind};

/// One call to the external service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    pub text: String,
    pub instructions: String,
    /// Upper bound on the size of the returned text, in service units.
    pub max_output_size: usize,
}

/// Successful service response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformResponse {
    pub text: String,
}

/// Typed failure from the external service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-suggested wait before the next attempt.
        retry_after: Option<Duration>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("service error: {0}")]
    ServiceError(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl TransformError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformError::RateLimited { .. } => ErrorKind::RateLimited,
            TransformError::InvalidInput(_) => ErrorKind::InvalidInput,
            TransformError::ServiceError(_) => ErrorKind::ServiceError,
            TransformError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// How many retries this failure earns given the configured maximum.
    pub fn retry_budget(&self, max_retries: u32) -> u32 {
        match self {
            TransformError::RateLimited { .. } | TransformError::Timeout(_) => max_retries,
            TransformError::ServiceError(_) => max_retries.min(1),
            TransformError::InvalidInput(_) => 0,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TransformError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<&TransformError> for ErrorInfo {
    fn from(err: &TransformError) -> Self {
        ErrorInfo::new(err.kind(), err.to_string())
    }
}

/// External transformation capability.
///
/// Implementations must be `Send + Sync`; one client is shared by every
/// concurrent segment task.
#[async_trait]
pub trait TransformClient: Send + Sync {
    /// Client identifier for logs (e.g. `"openai:gpt-4o-mini"`).
    fn name(&self) -> &str;

    async fn transform(
        &self,
        request: &TransformRequest,
    ) -> Result<TransformResponse, TransformError>;
}
