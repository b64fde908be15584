//! Error types for the file transfer bridge.

use thiserror::Error;

use crate::session::SessionError;
use crate::store::ObjectStoreError;

use super::TransferDirection;

/// Errors raised while moving a file through the object store.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransferError {
    /// Raised when the remote fetch or push command exits unsuccessfully.
    #[error(
        "{direction} between {local_path} and remote {remote_path} failed with return code \
         {return_code}; stdout: {stdout:?}; stderr: {stderr:?}"
    )]
    RemoteCommand {
        /// Direction of the failed transfer.
        direction: TransferDirection,
        /// Local file involved.
        local_path: String,
        /// Remote file involved.
        remote_path: String,
        /// Return code reported by the remote command.
        return_code: i32,
        /// Remote command output.
        stdout: String,
        /// Remote command error output.
        stderr: String,
    },
    /// Raised when reading or writing the local file fails.
    #[error("local file {path} could not be accessed: {message}")]
    LocalIo {
        /// Local path involved.
        path: String,
        /// Underlying error text.
        message: String,
    },
    /// Raised when the object store rejects an operation.
    #[error("object store operation on {key} failed: {source}")]
    Store {
        /// Object key involved.
        key: String,
        /// Store error.
        #[source]
        source: ObjectStoreError,
    },
    /// Raised when the remote command could not be run.
    #[error("transfer command could not run: {0}")]
    Session(#[from] SessionError),
}
