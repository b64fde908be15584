//! Error types for the session channel.

use thiserror::Error;

/// Errors raised while opening, driving, or closing a broker session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Raised when the broker process cannot be started.
    #[error("failed to start session broker {program}: {message}")]
    Spawn {
        /// Broker binary that failed to start.
        program: String,
        /// Operating system error text.
        message: String,
    },
    /// Raised when the shell never echoed the handshake marker back.
    #[error("session handshake failed: {message}")]
    Handshake {
        /// Description of what went wrong, including any captured output.
        message: String,
    },
    /// Raised when every connection attempt failed.
    #[error("could not open a session to {instance_id} after {attempts} attempt(s): {message}")]
    Connect {
        /// Target instance.
        instance_id: String,
        /// Number of attempts made, including the first.
        attempts: u32,
        /// Failure reported by the final attempt.
        message: String,
    },
    /// Raised when no end marker was observed within the allowed time.
    #[error("command `{command}` timed out after {timeout_secs}s; output so far: {output:?}")]
    Timeout {
        /// Command that was running.
        command: String,
        /// Configured timeout in seconds.
        timeout_secs: u64,
        /// Output captured before the deadline.
        output: String,
    },
    /// Raised when reading from or writing to the broker fails.
    #[error("session I/O failed while running `{command}`: {message}")]
    Io {
        /// Command that was being sent or collected.
        command: String,
        /// Underlying I/O error text.
        message: String,
    },
    /// Raised when the broker closed its output stream.
    #[error(
        "session broker exited ({status}) while running `{command}`; \
         output so far: {output:?}; stderr: {stderr:?}"
    )]
    BrokerExited {
        /// Command that was running.
        command: String,
        /// Exit status, or `unknown` when it could not be collected.
        status: String,
        /// Output captured before the stream closed.
        output: String,
        /// Standard error captured from the broker.
        stderr: String,
    },
    /// Raised when an operation needs a live session and there is none.
    #[error("session is not connected")]
    NotConnected,
}

impl SessionError {
    /// Returns `true` when the error leaves the session unusable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Io { .. } | Self::BrokerExited { .. }
        )
    }
}
