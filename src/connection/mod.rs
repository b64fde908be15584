//! Public connection facade consumed by orchestration engines.
//!
//! A [`Connection`] pairs one [`SessionChannel`] with one
//! [`FileTransferBridge`] and exposes the operations an engine needs:
//! connect, execute, put and get files, and close. Operations take
//! `&mut self`, so commands on a connection never interleave. A session that
//! died (timeout or broker exit) is reopened once on the next operation;
//! commands that were interrupted are never re-run.

use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;
use tracing::info;

use crate::config::{ConnectionConfig, DEFAULT_STORE_CLI};
use crate::session::{
    BrokerLauncher, ProcessBrokerLauncher, SessionChannel, SessionError, SessionState,
};
use crate::store::{AwsCliObjectStore, ObjectStore};
use crate::transcript::TranscriptResult;
use crate::transfer::{FileTransferBridge, TransferError, TransferMethod};

/// Errors surfaced by [`Connection`] operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConnectionError {
    /// Raised when an operation runs before `connect` or after `close`.
    #[error("connection is not open; call connect first")]
    NotConnected,
    /// Raised when the session fails to open or a command fails to run.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Raised when a file transfer fails.
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Remote execution connection to a single instance.
pub struct Connection<L = ProcessBrokerLauncher, S = AwsCliObjectStore> {
    channel: SessionChannel<L>,
    bridge: FileTransferBridge<S>,
}

impl Connection<ProcessBrokerLauncher, AwsCliObjectStore> {
    /// Creates a connection that spawns the configured broker and stages
    /// files with the local store CLI.
    ///
    /// The `cli` transfer method names the program used on both hosts;
    /// otherwise the local side runs `aws`.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        let program = match config.transfer_method() {
            TransferMethod::StoreCli { program } => program.clone(),
            TransferMethod::Presigned => String::from(DEFAULT_STORE_CLI),
        };
        let store = AwsCliObjectStore::from_config(program, &config);
        Self::with_parts(config, ProcessBrokerLauncher, store)
    }
}

impl<L, S> Connection<L, S>
where
    L: BrokerLauncher,
    S: ObjectStore,
{
    /// Creates a connection from an explicit launcher and object store.
    #[must_use]
    pub fn with_parts(config: ConnectionConfig, launcher: L, store: S) -> Self {
        let bridge = FileTransferBridge::from_config(store, &config);
        Self {
            channel: SessionChannel::with_launcher(config, launcher),
            bridge,
        }
    }

    /// Overrides the unit of the exponential connect backoff.
    #[must_use]
    pub fn with_retry_backoff(mut self, unit: Duration) -> Self {
        self.channel = self.channel.with_retry_backoff(unit);
        self
    }

    /// Configuration the connection was built with.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        self.channel.config()
    }

    /// Current session state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.channel.state()
    }

    /// Underlying session channel.
    #[must_use]
    pub const fn channel(&self) -> &SessionChannel<L> {
        &self.channel
    }

    /// Underlying transfer bridge.
    #[must_use]
    pub const fn bridge(&self) -> &FileTransferBridge<S> {
        &self.bridge
    }

    /// Opens the session. Does nothing when it is already live.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Session`] once every attempt has failed.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.channel.connect().await?;
        Ok(())
    }

    /// Runs `command` on the remote shell.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] before `connect` or after
    /// `close`, and [`ConnectionError::Session`] when reopening a dead
    /// session fails or the command times out or loses its stream.
    pub async fn execute(&mut self, command: &str) -> Result<TranscriptResult, ConnectionError> {
        self.ensure_live().await?;
        Ok(self.channel.execute(command).await?)
    }

    /// Copies a local file to `remote` on the instance.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] before `connect` or after
    /// `close`, and [`ConnectionError::Transfer`] when the transfer fails.
    pub async fn put_file(
        &mut self,
        local: &Utf8Path,
        remote: &str,
    ) -> Result<TranscriptResult, ConnectionError> {
        self.ensure_live().await?;
        Ok(self.bridge.put_file(&mut self.channel, local, remote).await?)
    }

    /// Copies `remote` on the instance to a local file.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] before `connect` or after
    /// `close`, and [`ConnectionError::Transfer`] when the transfer fails.
    pub async fn get_file(
        &mut self,
        remote: &str,
        local: &Utf8Path,
    ) -> Result<TranscriptResult, ConnectionError> {
        self.ensure_live().await?;
        Ok(self.bridge.get_file(&mut self.channel, remote, local).await?)
    }

    /// Closes the session. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.channel.close().await;
    }

    /// Closes the session and opens a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Session`] when the new session cannot be
    /// opened.
    pub async fn reset(&mut self) -> Result<(), ConnectionError> {
        info!(instance_id = self.config().instance_id(), "resetting connection");
        self.channel.close().await;
        self.connect().await
    }

    async fn ensure_live(&mut self) -> Result<(), ConnectionError> {
        match self.channel.state() {
            SessionState::Disconnected | SessionState::Closed => Err(ConnectionError::NotConnected),
            SessionState::Live | SessionState::Dead => {
                if self.channel.is_usable() {
                    return Ok(());
                }
                info!(
                    instance_id = self.config().instance_id(),
                    "session is no longer usable; reconnecting"
                );
                self.channel.connect().await?;
                Ok(())
            }
        }
    }
}
