//! Shared fixtures for session BDD scenarios.

use std::cell::RefCell;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;
use ssm_conduit::test_support::{LocalShellLauncher, write_fake_store_cli};
use ssm_conduit::{
    Connection, ConnectionConfig, ConnectionError, DirectoryObjectStore, TranscriptResult,
    TransferMethod,
};
use tempfile::TempDir;
use thiserror::Error;
use tokio::runtime::Runtime;

/// Connection wired to a local `sh` and a directory-backed bucket.
pub type LocalConnection = Connection<LocalShellLauncher, DirectoryObjectStore>;

#[derive(Debug, Error)]
pub enum SessionTestError {
    #[error("invalid session fixture: {0}")]
    Fixture(String),
}

/// Scenario state threaded through the steps.
pub struct SessionWorld {
    pub connection: RefCell<Option<LocalConnection>>,
    pub launcher: RefCell<Option<LocalShellLauncher>>,
    pub outcome: RefCell<Option<Result<TranscriptResult, ConnectionError>>>,
    pub local_file: RefCell<Option<Utf8PathBuf>>,
    pub runtime: Runtime,
    pub base: Utf8PathBuf,
    store_cli: Utf8PathBuf,
    _tmp: TempDir,
}

impl SessionWorld {
    fn new() -> Result<Self, SessionTestError> {
        let tmp = TempDir::new().map_err(|err| SessionTestError::Fixture(err.to_string()))?;
        let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).map_err(|path| {
            SessionTestError::Fixture(format!("non UTF-8 temp path: {}", path.display()))
        })?;
        let store_cli = write_fake_store_cli(&base.join("bin"), &base.join("store"))
            .map_err(|err| SessionTestError::Fixture(format!("fake store cli: {err}")))?;
        let runtime = Runtime::new().map_err(|err| SessionTestError::Fixture(err.to_string()))?;
        Ok(Self {
            connection: RefCell::new(None),
            launcher: RefCell::new(None),
            outcome: RefCell::new(None),
            local_file: RefCell::new(None),
            runtime,
            base,
            store_cli,
            _tmp: tmp,
        })
    }

    /// Builds and connects a fresh connection with the given timeout.
    pub fn open(&self, timeout: Duration) -> Result<(), SessionTestError> {
        let config = ConnectionConfig::builder("i-local", "scenario-bucket")
            .broker_path("sh")
            .timeout(timeout)
            .retries(0)
            .transfer_method(TransferMethod::StoreCli {
                program: self.store_cli.to_string(),
            })
            .build()
            .map_err(|err| SessionTestError::Fixture(err.to_string()))?;
        let launcher = LocalShellLauncher::new();
        let mut connection = Connection::with_parts(
            config,
            launcher.clone(),
            DirectoryObjectStore::new(self.base.join("store")),
        );
        self.runtime
            .block_on(connection.connect())
            .map_err(|err| SessionTestError::Fixture(format!("connect: {err}")))?;
        self.connection.replace(Some(connection));
        self.launcher.replace(Some(launcher));
        Ok(())
    }

    /// Runs an operation against the open connection and records its outcome.
    pub fn record<F>(&self, operation: F) -> Result<(), SessionTestError>
    where
        F: AsyncFnOnce(&mut LocalConnection) -> Result<TranscriptResult, ConnectionError>,
    {
        let mut slot = self.connection.borrow_mut();
        let connection = slot
            .as_mut()
            .ok_or_else(|| SessionTestError::Fixture(String::from("no connection opened")))?;
        let outcome = self.runtime.block_on(operation(connection));
        self.outcome.replace(Some(outcome));
        Ok(())
    }

    /// Closes the open connection.
    pub fn close(&self) -> Result<(), SessionTestError> {
        let mut slot = self.connection.borrow_mut();
        let connection = slot
            .as_mut()
            .ok_or_else(|| SessionTestError::Fixture(String::from("no connection opened")))?;
        self.runtime.block_on(connection.close());
        Ok(())
    }

    /// Remote path paired with the scenario's local file.
    pub fn remote_path(&self) -> Utf8PathBuf {
        self.base.join("remote.txt")
    }

    /// Local path the remote file is downloaded to.
    pub fn download_path(&self) -> Utf8PathBuf {
        self.base.join("downloaded.txt")
    }
}

impl Drop for SessionWorld {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.get_mut().take() {
            self.runtime.block_on(connection.close());
        }
    }
}

#[fixture]
pub fn session_world() -> SessionWorld {
    SessionWorld::new().unwrap_or_else(|err| panic!("session world should initialise: {err}"))
}
