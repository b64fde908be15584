//! Test support utilities shared across unit and integration tests.
//!
//! A local `sh` process stands in for the remote shell behind the broker, and
//! a small shell script stands in for the object store CLI, so the session
//! channel and transfer bridge can be exercised end to end without network
//! access.

use std::collections::BTreeSet;
use std::env;
use std::ffi::OsString;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tokio::process::Command;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::ConnectionConfig;
use crate::session::{BrokerLauncher, BrokerProcess, SessionError};

/// File name of the script written by [`write_fake_store_cli`].
pub const FAKE_STORE_CLI: &str = "fake-aws";

/// Launcher that runs a local program in place of the session broker.
///
/// Clones share their launch counters, so a test can keep one clone for
/// assertions while the session channel owns another.
#[derive(Clone, Debug)]
pub struct LocalShellLauncher {
    program: String,
    args: Vec<String>,
    launches: Arc<AtomicU32>,
    failures_remaining: Arc<AtomicU32>,
}

impl Default for LocalShellLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalShellLauncher {
    /// Launches `sh`, which reads commands from stdin like a remote shell.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("sh", &[])
    }

    /// Launches an arbitrary program instead of `sh`.
    #[must_use]
    pub fn with_program(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_owned(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            launches: Arc::new(AtomicU32::new(0)),
            failures_remaining: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Makes the next `count` launches fail with a spawn error.
    #[must_use]
    pub fn failing_first(self, count: u32) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Number of launches attempted so far, failed ones included.
    #[must_use]
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl BrokerLauncher for LocalShellLauncher {
    fn launch(&self, _config: &ConnectionConfig) -> Result<BrokerProcess, SessionError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(SessionError::Spawn {
                program: self.program.clone(),
                message: String::from("simulated launch failure"),
            });
        }
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| SessionError::Spawn {
                program: self.program.clone(),
                message: err.to_string(),
            })?;
        BrokerProcess::from_child(&self.program, child)
    }
}

/// Builds a configuration suitable for [`LocalShellLauncher`] sessions.
///
/// # Errors
///
/// Returns the configuration error when the bucket name is blank.
pub fn local_config(
    bucket_name: &str,
    timeout: std::time::Duration,
) -> Result<ConnectionConfig, crate::config::ConfigError> {
    ConnectionConfig::builder("i-local", bucket_name)
        .broker_path("sh")
        .timeout(timeout)
        .retries(0)
        .build()
}

/// Writes an executable script answering `s3 cp` and `s3 presign` against a
/// local directory tree, laid out like [`crate::store::DirectoryObjectStore`].
///
/// # Errors
///
/// Returns any I/O error raised while writing the script or marking it
/// executable.
pub fn write_fake_store_cli(dir: &Utf8Path, store_root: &Utf8Path) -> io::Result<Utf8PathBuf> {
    let root = shell_escape::unix::escape(store_root.as_str().into());
    let script = format!(
        r#"#!/bin/sh
set -eu
root={root}
if [ "$#" -lt 3 ] || [ "$1" != s3 ]; then
    echo "unsupported invocation: $*" >&2
    exit 2
fi
resolve() {{
    case "$1" in
        s3://*) printf '%s/%s' "$root" "${{1#s3://}}" ;;
        *) printf '%s' "$1" ;;
    esac
}}
case "$2" in
    cp)
        src=$(resolve "$3")
        dst=$(resolve "$4")
        case "$4" in s3://*) mkdir -p "$(dirname "$dst")" ;; esac
        if [ "$3" = - ]; then
            cat > "$dst"
        elif [ "$4" = - ]; then
            cat "$src"
        else
            cp "$src" "$dst"
        fi
        ;;
    presign)
        printf 'file://%s\n' "$(resolve "$3")"
        ;;
    *)
        echo "unsupported s3 command: $2" >&2
        exit 2
        ;;
esac
"#
    );

    Dir::create_ambient_dir_all(dir, ambient_authority())?;
    let handle = Dir::open_ambient_dir(dir, ambient_authority())?;
    handle.write(FAKE_STORE_CLI, script)?;
    let path = dir.join(FAKE_STORE_CLI);
    make_executable(&path)?;
    Ok(path)
}

#[cfg(unix)]
fn make_executable(path: &Utf8Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Utf8Path) -> io::Result<()> {
    Ok(())
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    ///
    /// Variables paired with `None` are removed for the guard's lifetime.
    pub async fn apply(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::apply"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe {
                match value {
                    Some(set) => env::set_var(key, set),
                    None => env::remove_var(key),
                }
            }
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
