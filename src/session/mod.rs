//! Broker-mediated interactive shell sessions.
//!
//! A [`SessionChannel`] owns at most one [`SessionHandle`], the live broker
//! process standing in for a remote shell. Commands are framed with fresh
//! markers, written to the broker's stdin while its stdout is read
//! concurrently, and the transcript up to the end marker is parsed into a
//! [`TranscriptResult`]. Output that arrives after the end marker stays
//! buffered for the next command. A timed-out or broken session is killed
//! and marked dead; only [`SessionChannel::connect`] brings it back.

mod broker;
mod error;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::framing::{self, CommandEnvelope};
use crate::shell::ShellKind;
use crate::transcript::{self, TranscriptResult};

pub use broker::{
    BrokerInput, BrokerLauncher, BrokerOutput, BrokerProcess, ProcessBrokerLauncher, broker_args,
};
pub use error::SessionError;

/// Longest pause between connection attempts, in backoff units.
const MAX_BACKOFF_UNITS: u32 = 30;

/// Time a broker is given to exit after `exit` before it is killed.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Pause that lets the stderr collector catch up once a command completed.
const STDERR_SETTLE: Duration = Duration::from_millis(20);

/// Lifecycle state of a [`SessionChannel`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SessionState {
    /// No session has been opened yet.
    #[default]
    Disconnected,
    /// A broker is running and has completed the handshake.
    Live,
    /// The broker timed out or exited; the session must be reopened.
    Dead,
    /// The session was closed by its owner.
    Closed,
}

impl SessionState {
    /// Lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Live => "live",
            Self::Dead => "dead",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One live broker process and its I/O buffers.
pub struct SessionHandle {
    stdin: BrokerInput,
    stdout: BrokerOutput,
    child: Option<Child>,
    stderr: Arc<Mutex<String>>,
    stderr_task: JoinHandle<()>,
    pending: Vec<u8>,
    shell: ShellKind,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("pid", &self.process_id())
            .field("shell", &self.shell)
            .field("pending_bytes", &self.pending.len())
            .finish_non_exhaustive()
    }
}

enum StreamError {
    Closed,
    Io(std::io::Error),
}

impl From<std::io::Error> for StreamError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Io(value),
        }
    }
}

enum MarkerScan {
    Found(usize),
    Incomplete(usize),
}

impl SessionHandle {
    fn spawn(process: BrokerProcess, shell: ShellKind) -> Self {
        let stderr = Arc::new(Mutex::new(String::new()));
        let stderr_task = tokio::spawn(collect_stderr(process.stderr, Arc::clone(&stderr)));
        Self {
            stdin: process.stdin,
            stdout: process.stdout,
            child: process.child,
            stderr,
            stderr_task,
            pending: Vec::new(),
            shell,
        }
    }

    /// Operating system identifier of the broker process, when known.
    #[must_use]
    pub fn process_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Shell the session was prepared for.
    #[must_use]
    pub const fn shell(&self) -> ShellKind {
        self.shell
    }

    fn has_exited(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(Some(_))))
    }

    async fn drain_stderr(&self) -> String {
        std::mem::take(&mut *self.stderr.lock().await)
    }

    fn pending_text(&self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }

    async fn exchange(&mut self, payload: &str, marker: &str) -> Result<Vec<u8>, StreamError> {
        exchange(
            &mut self.stdin,
            &mut self.stdout,
            &mut self.pending,
            payload,
            marker,
        )
        .await
    }

    async fn prepare(&mut self) -> Result<(), SessionError> {
        let marker = framing::generate_marker();
        let payload = format!(
            "{}{}",
            framing::preparation(self.shell),
            framing::handshake(&marker)
        );
        match self.exchange(&payload, &marker).await {
            Ok(banner) => {
                debug!(banner = %String::from_utf8_lossy(&banner), "session handshake complete");
                tokio::time::sleep(STDERR_SETTLE).await;
                let noise = self.drain_stderr().await;
                if !noise.is_empty() {
                    debug!(stderr = %noise, "discarded broker stderr from preparation");
                }
                Ok(())
            }
            Err(StreamError::Closed) => {
                let stdout = self.pending_text();
                let stderr = self.drain_stderr().await;
                Err(SessionError::Handshake {
                    message: format!(
                        "broker closed its output before the handshake; \
                         stdout: {stdout:?}; stderr: {stderr:?}"
                    ),
                })
            }
            Err(StreamError::Io(err)) => Err(SessionError::Handshake {
                message: err.to_string(),
            }),
        }
    }

    async fn run(
        &mut self,
        envelope: &CommandEnvelope,
        limit: Duration,
    ) -> Result<TranscriptResult, SessionError> {
        let stale = self.drain_stderr().await;
        if !stale.is_empty() {
            debug!(stderr = %stale, "discarded stale broker stderr");
        }

        let wrapped = envelope.wrap(self.shell);
        debug!(
            command = envelope.command(),
            end_marker = envelope.end_marker(),
            "submitting command"
        );

        let exchanged =
            tokio::time::timeout(limit, self.exchange(&wrapped, envelope.end_marker())).await;
        match exchanged {
            Ok(Ok(raw)) => {
                let text = String::from_utf8_lossy(&raw);
                debug!(transcript = %text, "collected transcript");
                let parsed = transcript::parse(&text, self.shell);
                tokio::time::sleep(STDERR_SETTLE).await;
                let stderr = self.drain_stderr().await;
                Ok(TranscriptResult::from_parsed(parsed, stderr))
            }
            Ok(Err(StreamError::Closed)) => Err(SessionError::BrokerExited {
                command: envelope.command().to_owned(),
                status: self.exit_status().await,
                output: self.pending_text(),
                stderr: self.drain_stderr().await,
            }),
            Ok(Err(StreamError::Io(err))) => Err(SessionError::Io {
                command: envelope.command().to_owned(),
                message: err.to_string(),
            }),
            Err(_elapsed) => Err(SessionError::Timeout {
                command: envelope.command().to_owned(),
                timeout_secs: limit.as_secs(),
                output: self.pending_text(),
            }),
        }
    }

    async fn exit_status(&mut self) -> String {
        let Some(child) = self.child.as_mut() else {
            return String::from("unknown");
        };
        match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
            Ok(Ok(status)) => status.to_string(),
            Ok(Err(err)) => format!("unknown: {err}"),
            Err(_elapsed) => String::from("unknown"),
        }
    }

    async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut()
            && let Err(err) = child.kill().await
        {
            debug!(error = %err, "broker was already gone");
        }
        self.stderr_task.abort();
    }

    async fn shutdown(&mut self) {
        let farewell = async {
            self.stdin.write_all(b"\nexit\n").await?;
            self.stdin.flush().await
        };
        if let Err(err) = farewell.await {
            debug!(error = %err, "could not send exit to broker");
        }
        let exited = match self.child.as_mut() {
            Some(child) => match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(%status, "broker exited");
                    true
                }
                Ok(Err(_)) | Err(_) => false,
            },
            None => true,
        };
        if !exited {
            self.kill().await;
        }
        self.stderr_task.abort();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stderr_task.abort();
    }
}

async fn collect_stderr(stream: BrokerOutput, sink: Arc<Mutex<String>>) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => sink.lock().await.push_str(&String::from_utf8_lossy(&line)),
        }
    }
}

async fn exchange(
    stdin: &mut BrokerInput,
    stdout: &mut BrokerOutput,
    pending: &mut Vec<u8>,
    payload: &str,
    marker: &str,
) -> Result<Vec<u8>, StreamError> {
    let write = async {
        for chunk in framing::write_chunks(payload) {
            stdin.write_all(chunk).await?;
        }
        stdin.flush().await?;
        Ok::<(), StreamError>(())
    };
    let ((), transcript) = tokio::try_join!(write, read_until_marker(stdout, pending, marker))?;
    Ok(transcript)
}

async fn read_until_marker(
    stdout: &mut BrokerOutput,
    pending: &mut Vec<u8>,
    marker: &str,
) -> Result<Vec<u8>, StreamError> {
    let mut scanned = 0;
    loop {
        match scan_for_marker(pending, scanned, marker) {
            MarkerScan::Found(end) => {
                let rest = pending.split_off(end);
                return Ok(std::mem::replace(pending, rest));
            }
            MarkerScan::Incomplete(line_start) => scanned = line_start,
        }
        if stdout.read_buf(pending).await? == 0 {
            return Err(StreamError::Closed);
        }
    }
}

/// Looks for a complete line equal to `marker`, starting at the line that
/// begins at `from`.
fn scan_for_marker(buffer: &[u8], from: usize, marker: &str) -> MarkerScan {
    let mut line_start = from;
    let tail = buffer.get(from..).unwrap_or_default();
    for (offset, byte) in tail.iter().enumerate() {
        if *byte != b'\n' {
            continue;
        }
        let line_end = from + offset;
        let line = buffer.get(line_start..line_end).unwrap_or_default();
        if framing::is_marker_line(&String::from_utf8_lossy(line), marker) {
            return MarkerScan::Found(line_end + 1);
        }
        line_start = line_end + 1;
    }
    MarkerScan::Incomplete(line_start)
}

/// Pause before retry number `retry` (zero-based): `2^retry - 1` units,
/// capped at thirty.
fn backoff_delay(unit: Duration, retry: u32) -> Duration {
    let units = 2_u32
        .saturating_pow(retry)
        .saturating_sub(1)
        .min(MAX_BACKOFF_UNITS);
    unit.saturating_mul(units)
}

/// Owns the broker session for one connection.
pub struct SessionChannel<L = ProcessBrokerLauncher> {
    config: ConnectionConfig,
    launcher: L,
    handle: Option<SessionHandle>,
    state: SessionState,
    retry_unit: Duration,
}

impl SessionChannel<ProcessBrokerLauncher> {
    /// Creates a channel that spawns the configured broker binary.
    #[must_use]
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_launcher(config, ProcessBrokerLauncher)
    }
}

impl<L> SessionChannel<L>
where
    L: BrokerLauncher,
{
    /// Creates a channel that starts brokers through `launcher`.
    #[must_use]
    pub fn with_launcher(config: ConnectionConfig, launcher: L) -> Self {
        Self {
            config,
            launcher,
            handle: None,
            state: SessionState::Disconnected,
            retry_unit: Duration::from_secs(1),
        }
    }

    /// Overrides the unit of the exponential connect backoff.
    #[must_use]
    pub fn with_retry_backoff(mut self, unit: Duration) -> Self {
        self.retry_unit = unit;
        self
    }

    /// Configuration the channel was built with.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Launcher used to start brokers.
    #[must_use]
    pub const fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Current lifecycle state, as of the last operation.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Live session handle, if any.
    #[must_use]
    pub const fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    /// Returns `true` when commands can be sent without reconnecting.
    ///
    /// A broker that exited since the last command turns the session dead.
    pub fn is_usable(&mut self) -> bool {
        self.refresh_state();
        self.state == SessionState::Live
    }

    fn refresh_state(&mut self) {
        if self.state != SessionState::Live {
            return;
        }
        let exited = self.handle.as_mut().is_none_or(SessionHandle::has_exited);
        if exited {
            warn!(
                instance_id = self.config.instance_id(),
                "session broker exited unexpectedly"
            );
            self.handle = None;
            self.state = SessionState::Dead;
        }
    }

    /// Opens the session, retrying failed attempts with exponential backoff.
    ///
    /// Calling this while the session is live does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] carrying the last failure once every
    /// attempt has failed.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.refresh_state();
        if self.state == SessionState::Live && self.handle.is_some() {
            debug!("session already live");
            return Ok(());
        }

        let attempts = self.config.retries().saturating_add(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            if let Some(retry) = attempt.checked_sub(1) {
                let delay = backoff_delay(self.retry_unit, retry);
                warn!(
                    attempt = attempt + 1,
                    attempts,
                    ?delay,
                    "retrying session connection"
                );
                tokio::time::sleep(delay).await;
            }
            match self.open().await {
                Ok(handle) => {
                    info!(
                        instance_id = self.config.instance_id(),
                        pid = ?handle.process_id(),
                        shell = %handle.shell(),
                        "session established"
                    );
                    self.handle = Some(handle);
                    self.state = SessionState::Live;
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt = attempt + 1, error = %err, "session attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(SessionError::Connect {
            instance_id: self.config.instance_id().to_owned(),
            attempts,
            message: last_error.map_or_else(String::new, |err| err.to_string()),
        })
    }

    async fn open(&self) -> Result<SessionHandle, SessionError> {
        let process = self.launcher.launch(&self.config)?;
        let mut handle = SessionHandle::spawn(process, self.config.shell());
        let limit = self.config.timeout();
        match tokio::time::timeout(limit, handle.prepare()).await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(err)) => {
                handle.kill().await;
                Err(err)
            }
            Err(_elapsed) => {
                let output = handle.pending_text();
                handle.kill().await;
                Err(SessionError::Handshake {
                    message: format!(
                        "no handshake within {}s; output so far: {output:?}",
                        limit.as_secs()
                    ),
                })
            }
        }
    }

    /// Runs `command` with the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`SessionChannel::execute_with_timeout`].
    pub async fn execute(&mut self, command: &str) -> Result<TranscriptResult, SessionError> {
        let limit = self.config.timeout();
        self.execute_with_timeout(command, limit).await
    }

    /// Runs `command` and waits up to `limit` for its end marker.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless the session is live,
    /// [`SessionError::Timeout`] when the end marker does not arrive in time,
    /// and [`SessionError::BrokerExited`] or [`SessionError::Io`] when the
    /// stream breaks. Each of the latter three kills the broker and leaves
    /// the session dead.
    pub async fn execute_with_timeout(
        &mut self,
        command: &str,
        limit: Duration,
    ) -> Result<TranscriptResult, SessionError> {
        self.refresh_state();
        if self.state != SessionState::Live {
            return Err(SessionError::NotConnected);
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(SessionError::NotConnected);
        };

        let envelope = CommandEnvelope::new(command);
        match handle.run(&envelope, limit).await {
            Ok(result) => {
                debug!(
                    return_code = result.return_code,
                    stdout_bytes = result.stdout.len(),
                    stderr_bytes = result.stderr.len(),
                    "command finished"
                );
                Ok(result)
            }
            Err(err) => {
                if err.is_fatal() {
                    warn!(error = %err, "session is no longer usable");
                    handle.kill().await;
                    self.handle = None;
                    self.state = SessionState::Dead;
                }
                Err(err)
            }
        }
    }

    /// Ends the session, asking the shell to exit before killing the broker.
    ///
    /// Closing an already closed channel does nothing.
    pub async fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.shutdown().await;
            info!(instance_id = self.config.instance_id(), "session closed");
        }
        self.state = SessionState::Closed;
    }
}
