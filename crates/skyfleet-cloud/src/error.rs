//! Cloud provider error types

use thiserror::Error;

use crate::retry::Transience;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    /// Lookup found nothing, or found too many candidates for a safe
    /// pick. Both cases share one kind and differ only in message, so
    /// callers treat an ambiguous name exactly like a missing resource.
    #[error("{0}")]
    ResourceDoesNotExist(String),

    /// Provider API call failed. `transient` marks errors worth
    /// retrying (connection resets, timeouts); everything else aborts
    /// a retry loop immediately.
    #[error("API error: {message}")]
    Api { message: String, transient: bool },

    /// A polled precondition does not hold yet. Always retryable.
    #[error("{0}")]
    NotReady(String),

    #[error("gave up waiting for {what}: {message}")]
    ConvergenceTimeout { what: String, message: String },

    #[error("failed to acquire a public address for instance {id}: {message}")]
    AddressTimeout { id: String, message: String },

    #[error("instance {0} has no public address")]
    NoPublicAddress(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),
}

impl CloudError {
    /// Shorthand for a non-transient API error.
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            transient: false,
        }
    }

    /// Shorthand for a transient API error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            transient: true,
        }
    }
}

impl Transience for CloudError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudError::NotReady(_) | CloudError::Api { transient: true, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
