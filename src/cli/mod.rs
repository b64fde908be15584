//! Command-line interface definitions for the `conduit` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `conduit` binary.
#[derive(Debug, Parser)]
#[command(
    name = "conduit",
    about = "Run commands and move files on a remote instance through a session broker",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Connection overrides applied on top of configuration files and
    /// `CONDUIT_*` environment variables.
    #[command(flatten)]
    pub(crate) connection: ConnectionArgs,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Flags overriding the layered connection settings.
#[derive(Debug, Default, Args)]
pub(crate) struct ConnectionArgs {
    /// Target instance identifier.
    #[arg(long, global = true, value_name = "ID")]
    pub(crate) instance_id: Option<String>,
    /// Region hosting the instance and the transfer bucket.
    #[arg(long, global = true, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Bucket used to stage file transfers.
    #[arg(long = "bucket", global = true, value_name = "BUCKET")]
    pub(crate) bucket_name: Option<String>,
    /// Path to the session broker binary.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) broker_path: Option<String>,
    /// Remote shell: posix or powershell.
    #[arg(long, global = true, value_name = "SHELL")]
    pub(crate) shell: Option<String>,
    /// Seconds allowed for connecting and for each command.
    #[arg(long = "timeout", global = true, value_name = "SECONDS")]
    pub(crate) timeout_secs: Option<u64>,
    /// Connection retries before giving up.
    #[arg(long, global = true, value_name = "COUNT")]
    pub(crate) retries: Option<u32>,
    /// Credentials profile forwarded to the broker.
    #[arg(long, global = true, value_name = "PROFILE")]
    pub(crate) profile: Option<String>,
    /// Service endpoint override forwarded to the broker.
    #[arg(long, global = true, value_name = "URL")]
    pub(crate) endpoint_url: Option<String>,
    /// How the remote host reaches the bucket: presigned or cli.
    #[arg(long, global = true, value_name = "METHOD")]
    pub(crate) transfer_method: Option<String>,
}

/// Operations supported by `conduit`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Run a command on the remote shell and exit with its return code.
    #[command(name = "exec")]
    Exec(ExecCommand),
    /// Copy a local file to the remote host.
    #[command(name = "put")]
    Put(PutCommand),
    /// Copy a remote file to the local host.
    #[command(name = "get")]
    Get(GetCommand),
}

/// Arguments for `conduit exec`.
#[derive(Debug, Args)]
pub(crate) struct ExecCommand {
    /// Command line sent verbatim to the remote shell (use -- to separate
    /// flags).
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub(crate) command: Vec<String>,
}

/// Arguments for `conduit put`.
#[derive(Debug, Args)]
pub(crate) struct PutCommand {
    /// Local file to upload.
    #[arg(value_name = "LOCAL")]
    pub(crate) local: String,
    /// Destination path on the remote host.
    #[arg(value_name = "REMOTE")]
    pub(crate) remote: String,
}

/// Arguments for `conduit get`.
#[derive(Debug, Args)]
pub(crate) struct GetCommand {
    /// Remote file to download.
    #[arg(value_name = "REMOTE")]
    pub(crate) remote: String,
    /// Local destination, overwritten when it exists.
    #[arg(value_name = "LOCAL")]
    pub(crate) local: String,
}
