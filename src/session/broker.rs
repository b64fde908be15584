//! Launching the session broker process.

use std::ffi::OsString;
use std::process::Stdio;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::ConnectionConfig;

use super::SessionError;

/// Writable half of a broker's standard input.
pub type BrokerInput = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable broker output stream.
pub type BrokerOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Streams and process handle of a freshly launched broker.
pub struct BrokerProcess {
    pub(crate) stdin: BrokerInput,
    pub(crate) stdout: BrokerOutput,
    pub(crate) stderr: BrokerOutput,
    pub(crate) child: Option<Child>,
}

impl BrokerProcess {
    /// Assembles a broker from raw streams with no child process to reap.
    #[must_use]
    pub fn from_streams(stdin: BrokerInput, stdout: BrokerOutput, stderr: BrokerOutput) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            child: None,
        }
    }

    /// Takes the piped standard streams of `child`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Spawn`] when any standard stream was not piped.
    pub fn from_child(program: &str, mut child: Child) -> Result<Self, SessionError> {
        let missing = |stream: &str| SessionError::Spawn {
            program: program.to_owned(),
            message: format!("{stream} was not captured"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
        Ok(Self {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            child: Some(child),
        })
    }
}

impl std::fmt::Debug for BrokerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerProcess")
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

/// Starts broker processes for a session channel.
pub trait BrokerLauncher: Send + Sync {
    /// Launches a broker for the configured instance.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Spawn`] when the process cannot be started.
    fn launch(&self, config: &ConnectionConfig) -> Result<BrokerProcess, SessionError>;
}

/// Launcher that spawns the configured broker binary.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessBrokerLauncher;

impl BrokerLauncher for ProcessBrokerLauncher {
    fn launch(&self, config: &ConnectionConfig) -> Result<BrokerProcess, SessionError> {
        let program = config.broker_path();
        let args = broker_args(config)?;
        debug!(program, instance_id = config.instance_id(), "spawning session broker");
        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| SessionError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;
        BrokerProcess::from_child(program, child)
    }
}

#[derive(Serialize)]
struct SessionTarget<'a> {
    #[serde(rename = "Target")]
    target: &'a str,
}

/// Builds the broker argument list:
/// `<target document> <region> StartSession [<profile>] [<endpoint url>]`.
///
/// # Errors
///
/// Returns [`SessionError::Spawn`] when the target document cannot be encoded.
pub fn broker_args(config: &ConnectionConfig) -> Result<Vec<OsString>, SessionError> {
    let document = serde_json::to_string(&SessionTarget {
        target: config.instance_id(),
    })
    .map_err(|err| SessionError::Spawn {
        program: config.broker_path().to_owned(),
        message: format!("could not encode session target: {err}"),
    })?;

    let mut args = vec![
        OsString::from(document),
        OsString::from(config.region()),
        OsString::from("StartSession"),
    ];
    args.extend(config.profile().map(OsString::from));
    args.extend(config.endpoint_url().map(OsString::from));
    Ok(args)
}
