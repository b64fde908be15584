//! File transfer through an intermediary object store bucket.
//!
//! The session channel only carries text, so files travel through the bucket
//! named in the connection configuration. Uploads store the local bytes and
//! then ask the remote host to fetch the object; downloads ask the remote host
//! to push the file and then fetch the object locally. The remote half runs as
//! an ordinary command on the session, and any non-zero return code becomes a
//! [`TransferError::RemoteCommand`] carrying both paths and the output.

mod commands;
mod error;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::session::{BrokerLauncher, SessionChannel};
use crate::store::{ObjectStore, PRESIGN_EXPIRY, PresignMethod, object_url};
use crate::transcript::TranscriptResult;

pub use commands::{fetch_command, push_command};
pub use error::TransferError;

/// How the remote host moves objects to and from the bucket.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TransferMethod {
    /// Presigned URLs fetched with `curl` or `Invoke-WebRequest`.
    #[default]
    Presigned,
    /// The object store CLI installed on the remote host.
    StoreCli {
        /// CLI program run remotely, typically `aws`.
        program: String,
    },
}

impl TransferMethod {
    /// Interprets a configuration value (`presigned` or `cli`).
    #[must_use]
    pub fn from_setting(method: &str, program: &str) -> Option<Self> {
        match method.trim().to_ascii_lowercase().as_str() {
            "presigned" | "presign" | "url" => Some(Self::Presigned),
            "cli" | "store-cli" => Some(Self::StoreCli {
                program: program.trim().to_owned(),
            }),
            _ => None,
        }
    }
}

/// Direction of a file transfer relative to the local host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferDirection {
    /// Local file to remote host.
    Upload,
    /// Remote file to local host.
    Download,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Upload => "upload",
            Self::Download => "download",
        })
    }
}

/// Object key for a remote path: backslashes become forward slashes.
#[must_use]
pub fn object_key(remote_path: &str) -> String {
    remote_path.replace('\\', "/")
}

/// Everything needed to move one file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferDescriptor {
    direction: TransferDirection,
    local_path: Utf8PathBuf,
    remote_path: String,
    key: String,
    bucket: String,
}

impl TransferDescriptor {
    /// Describes copying `local_path` to `remote_path`.
    #[must_use]
    pub fn upload(
        local_path: impl Into<Utf8PathBuf>,
        remote_path: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self::new(TransferDirection::Upload, local_path.into(), remote_path.into(), bucket.into())
    }

    /// Describes copying `remote_path` to `local_path`.
    #[must_use]
    pub fn download(
        remote_path: impl Into<String>,
        local_path: impl Into<Utf8PathBuf>,
        bucket: impl Into<String>,
    ) -> Self {
        Self::new(
            TransferDirection::Download,
            local_path.into(),
            remote_path.into(),
            bucket.into(),
        )
    }

    fn new(
        direction: TransferDirection,
        local_path: Utf8PathBuf,
        remote_path: String,
        bucket: String,
    ) -> Self {
        let key = object_key(&remote_path);
        Self {
            direction,
            local_path,
            remote_path,
            key,
            bucket,
        }
    }

    /// Transfer direction.
    #[must_use]
    pub const fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Local file path.
    #[must_use]
    pub fn local_path(&self) -> &Utf8Path {
        &self.local_path
    }

    /// Remote file path, as given.
    #[must_use]
    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// Object key derived from the remote path.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Bucket staging the object.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// `s3://` URL of the staged object.
    #[must_use]
    pub fn object_url(&self) -> String {
        object_url(&self.bucket, &self.key)
    }
}

/// Moves files between the local host and a session's remote host.
#[derive(Clone, Debug)]
pub struct FileTransferBridge<S> {
    store: S,
    bucket: String,
    method: TransferMethod,
}

impl<S> FileTransferBridge<S>
where
    S: ObjectStore,
{
    /// Creates a bridge staging objects in `bucket`.
    #[must_use]
    pub fn new(store: S, bucket: impl Into<String>, method: TransferMethod) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            method,
        }
    }

    /// Creates a bridge using the bucket and transfer method of `config`.
    #[must_use]
    pub fn from_config(store: S, config: &ConnectionConfig) -> Self {
        Self::new(store, config.bucket_name(), config.transfer_method().clone())
    }

    /// Object store used for staging.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Bucket used for staging.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Copies `local` to `remote` on the session's host.
    ///
    /// # Errors
    ///
    /// See [`FileTransferBridge::transfer`].
    pub async fn put_file<L: BrokerLauncher>(
        &self,
        channel: &mut SessionChannel<L>,
        local: &Utf8Path,
        remote: &str,
    ) -> Result<TranscriptResult, TransferError> {
        let descriptor = TransferDescriptor::upload(local, remote, self.bucket.as_str());
        self.transfer(channel, &descriptor).await
    }

    /// Copies `remote` on the session's host to `local`, overwriting it.
    ///
    /// # Errors
    ///
    /// See [`FileTransferBridge::transfer`].
    pub async fn get_file<L: BrokerLauncher>(
        &self,
        channel: &mut SessionChannel<L>,
        remote: &str,
        local: &Utf8Path,
    ) -> Result<TranscriptResult, TransferError> {
        let descriptor = TransferDescriptor::download(remote, local, self.bucket.as_str());
        self.transfer(channel, &descriptor).await
    }

    /// Performs the transfer described by `descriptor`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::LocalIo`] when the local file cannot be read
    /// or written, [`TransferError::Store`] when the object store fails,
    /// [`TransferError::Session`] when the remote command cannot run, and
    /// [`TransferError::RemoteCommand`] when it exits unsuccessfully.
    pub async fn transfer<L: BrokerLauncher>(
        &self,
        channel: &mut SessionChannel<L>,
        descriptor: &TransferDescriptor,
    ) -> Result<TranscriptResult, TransferError> {
        debug!(
            direction = %descriptor.direction(),
            local = %descriptor.local_path(),
            remote = descriptor.remote_path(),
            key = descriptor.key(),
            bucket = descriptor.bucket(),
            "starting transfer"
        );
        let result = match descriptor.direction() {
            TransferDirection::Upload => self.upload(channel, descriptor).await?,
            TransferDirection::Download => self.download(channel, descriptor).await?,
        };
        info!(
            direction = %descriptor.direction(),
            local = %descriptor.local_path(),
            remote = descriptor.remote_path(),
            "transfer complete"
        );
        Ok(result)
    }

    async fn upload<L: BrokerLauncher>(
        &self,
        channel: &mut SessionChannel<L>,
        descriptor: &TransferDescriptor,
    ) -> Result<TranscriptResult, TransferError> {
        let body = read_local(descriptor.local_path())?;
        self.store
            .put(descriptor.bucket(), descriptor.key(), body)
            .await
            .map_err(|source| store_error(descriptor, source))?;

        let method = self.remote_method(PresignMethod::Get);
        let source = self.remote_location(&method, descriptor, PresignMethod::Get).await?;
        let command = fetch_command(
            &method,
            channel.config().shell(),
            &source,
            descriptor.remote_path(),
        );
        let result = channel.execute(&command).await?;
        ensure_success(descriptor, result)
    }

    async fn download<L: BrokerLauncher>(
        &self,
        channel: &mut SessionChannel<L>,
        descriptor: &TransferDescriptor,
    ) -> Result<TranscriptResult, TransferError> {
        let method = self.remote_method(PresignMethod::Put);
        let destination = self.remote_location(&method, descriptor, PresignMethod::Put).await?;
        let command = push_command(
            &method,
            channel.config().shell(),
            descriptor.remote_path(),
            &destination,
        );
        let result = channel.execute(&command).await?;
        let checked = ensure_success(descriptor, result)?;

        let body = self
            .store
            .get(descriptor.bucket(), descriptor.key())
            .await
            .map_err(|source| store_error(descriptor, source))?;
        write_local(descriptor.local_path(), &body)?;
        Ok(checked)
    }

    /// Method the remote half uses for one direction. Presigned transfers
    /// the store cannot sign go through its CLI instead.
    fn remote_method(&self, presign: PresignMethod) -> TransferMethod {
        match (&self.method, self.store.presign_fallback(presign)) {
            (TransferMethod::Presigned, Some(program)) => {
                debug!(
                    method = presign.as_str(),
                    program,
                    "store cannot presign; using its CLI on the remote host"
                );
                TransferMethod::StoreCli {
                    program: program.to_owned(),
                }
            }
            (configured, _) => configured.clone(),
        }
    }

    /// Where the remote command reads or writes the object.
    async fn remote_location(
        &self,
        method: &TransferMethod,
        descriptor: &TransferDescriptor,
        presign: PresignMethod,
    ) -> Result<String, TransferError> {
        match method {
            TransferMethod::Presigned => self
                .store
                .presign(descriptor.bucket(), descriptor.key(), presign, PRESIGN_EXPIRY)
                .await
                .map_err(|source| store_error(descriptor, source)),
            TransferMethod::StoreCli { .. } => Ok(descriptor.object_url()),
        }
    }
}

fn ensure_success(
    descriptor: &TransferDescriptor,
    result: TranscriptResult,
) -> Result<TranscriptResult, TransferError> {
    if result.is_success() {
        return Ok(result);
    }
    Err(TransferError::RemoteCommand {
        direction: descriptor.direction(),
        local_path: descriptor.local_path().to_string(),
        remote_path: descriptor.remote_path().to_owned(),
        return_code: result.return_code,
        stdout: result.stdout,
        stderr: result.stderr,
    })
}

fn store_error(
    descriptor: &TransferDescriptor,
    source: crate::store::ObjectStoreError,
) -> TransferError {
    TransferError::Store {
        key: descriptor.key().to_owned(),
        source,
    }
}

fn split_path(path: &Utf8Path) -> Result<(&Utf8Path, &str), TransferError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| TransferError::LocalIo {
        path: path.to_string(),
        message: String::from("path does not name a file"),
    })?;
    Ok((parent, file_name))
}

fn local_io(path: &Utf8Path, err: &std::io::Error) -> TransferError {
    TransferError::LocalIo {
        path: path.to_string(),
        message: err.to_string(),
    }
}

fn read_local(path: &Utf8Path) -> Result<Vec<u8>, TransferError> {
    let (parent, file_name) = split_path(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| local_io(parent, &err))?;
    dir.read(file_name).map_err(|err| local_io(path, &err))
}

fn write_local(path: &Utf8Path, body: &[u8]) -> Result<(), TransferError> {
    let (parent, file_name) = split_path(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| local_io(parent, &err))?;
    dir.write(file_name, body).map_err(|err| local_io(path, &err))
}
