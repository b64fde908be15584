//! Remote command execution over a session broker.
//!
//! The crate drives an interactive shell on a remote instance through an
//! external session broker process. Each command is framed with unique
//! markers so its output and return code can be recovered from the broker's
//! continuous byte stream, and files travel through an object store bucket
//! because the session carries nothing but text. [`Connection`] is the entry
//! point: connect, execute, put and get files, close.

mod ansi;
pub mod config;
pub mod connection;
pub mod framing;
pub mod session;
pub mod shell;
pub mod store;
pub mod test_support;
pub mod transcript;
pub mod transfer;

pub use config::{ConfigError, ConnectionConfig, ConnectionConfigBuilder, ConnectionSettings};
pub use connection::{Connection, ConnectionError};
pub use framing::CommandEnvelope;
pub use session::{
    BrokerLauncher, BrokerProcess, ProcessBrokerLauncher, SessionChannel, SessionError,
    SessionHandle, SessionState,
};
pub use shell::ShellKind;
pub use store::{
    AwsCliObjectStore, DirectoryObjectStore, ObjectStore, ObjectStoreError, PresignMethod,
};
pub use transcript::{RC_FAILURE, RC_UNPARSEABLE, TranscriptResult};
pub use transfer::{
    FileTransferBridge, TransferDescriptor, TransferDirection, TransferError, TransferMethod,
};
