//! Object store collaborators used to stage file transfers.
//!
//! The transfer bridge only needs three operations: store bytes under a key,
//! fetch them back, and mint a presigned URL the remote host can use without
//! credentials. [`ObjectStore`] captures that surface with boxed futures so
//! implementations stay object safe. Each connection owns its store value.

mod cli;
mod directory;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

pub use cli::AwsCliObjectStore;
pub use directory::DirectoryObjectStore;

/// Boxed future returned by [`ObjectStore`] operations.
pub type StoreFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ObjectStoreError>> + Send + 'a>>;

/// Lifetime of presigned URLs handed to the remote host.
pub const PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// HTTP method a presigned URL authorises.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PresignMethod {
    /// Download the object.
    Get,
    /// Upload the object.
    Put,
}

impl PresignMethod {
    /// Name used in log fields and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

/// Minimal object store interface consumed by the transfer bridge.
pub trait ObjectStore: Send + Sync {
    /// Stores `body` under `key` in `bucket`, replacing any existing object.
    fn put<'a>(&'a self, bucket: &'a str, key: &'a str, body: Vec<u8>) -> StoreFuture<'a, ()>;

    /// Fetches the object stored under `key` in `bucket`.
    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Vec<u8>>;

    /// Produces a URL that permits `method` on the object for `expires`.
    fn presign<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        method: PresignMethod,
        expires: Duration,
    ) -> StoreFuture<'a, String>;

    /// CLI program the remote host can run against the bucket when `method`
    /// cannot be presigned by this store. `None` when presigning works.
    fn presign_fallback(&self, _method: PresignMethod) -> Option<&str> {
        None
    }
}

/// `s3://` URL naming `key` in `bucket`.
#[must_use]
pub fn object_url(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

/// Errors raised by object store implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ObjectStoreError {
    /// Raised when the requested object does not exist.
    #[error("object {key} not found in bucket {bucket}")]
    NotFound {
        /// Bucket that was queried.
        bucket: String,
        /// Key that was requested.
        key: String,
    },
    /// Raised when local storage fails.
    #[error("object store I/O failed at {path}: {message}")]
    Io {
        /// Path being accessed.
        path: String,
        /// Underlying error text.
        message: String,
    },
    /// Raised when the store CLI cannot be started.
    #[error("failed to start {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error text.
        message: String,
    },
    /// Raised when the store CLI exits unsuccessfully.
    #[error("`{command}` failed with {status}: {stderr}")]
    CommandFailure {
        /// Full command line that was run.
        command: String,
        /// Exit status description.
        status: String,
        /// Standard error captured from the command.
        stderr: String,
    },
    /// Raised when the store cannot perform the requested operation.
    #[error("object store does not support {operation}")]
    Unsupported {
        /// Operation that was requested.
        operation: String,
    },
}
