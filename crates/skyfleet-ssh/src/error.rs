//! SSH error types

use skyfleet_cloud::Transience;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    /// The ssh transport itself failed (connection refused, host
    /// unreachable, auth). Retryable: this is "not yet reachable".
    #[error("ssh transport failure on {host}: {message}")]
    Transport { host: String, message: String },

    /// The remote command ran and exited non-zero. Never retried.
    #[error("command '{command}' failed on {host} with status {status}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },

    /// An scp transfer failed.
    #[error("transfer failed on {host}: {message}")]
    Transfer { host: String, message: String },

    /// Reachability polling exhausted its attempt budget.
    #[error("failed to reach {host} over ssh after {attempts} attempts: {message}")]
    FailedToReach {
        host: String,
        attempts: u32,
        message: String,
    },
}

impl Transience for SshError {
    fn is_transient(&self) -> bool {
        matches!(self, SshError::Transport { .. })
    }
}

pub type Result<T> = std::result::Result<T, SshError>;
