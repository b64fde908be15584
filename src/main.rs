//! Binary entry point for the `conduit` CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use ssm_conduit::{
    ConfigError, Connection, ConnectionConfig, ConnectionError, ConnectionSettings,
    TranscriptResult,
};

mod cli;

use cli::{Cli, Command, ConnectionArgs};

/// Environment variable holding the log filter directive.
const LOG_ENV: &str = "CONDUIT_LOG";

/// Filter applied when `CONDUIT_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Connection(#[from] ConnectionError),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    if let Command::Exec(exec) = &cli.command {
        validate_command_args(&exec.command)?;
    }
    let config = load_config(&cli.connection)?;
    let mut connection = Connection::new(config);
    connection.connect().await?;
    let outcome = run(&mut connection, cli.command).await;
    connection.close().await;

    let result = outcome?;
    emit(&result)?;
    Ok(exit_code(result.return_code))
}

async fn run(connection: &mut Connection, command: Command) -> Result<TranscriptResult, CliError> {
    let result = match command {
        Command::Exec(exec) => connection.execute(&exec.command.join(" ")).await?,
        Command::Put(put) => {
            let local = Utf8PathBuf::from(put.local);
            connection.put_file(&local, &put.remote).await?
        }
        Command::Get(get) => {
            let local = Utf8PathBuf::from(get.local);
            connection.get_file(&get.remote, &local).await?
        }
    };
    Ok(result)
}

fn load_config(args: &ConnectionArgs) -> Result<ConnectionConfig, CliError> {
    let settings = ConnectionSettings::load_without_cli_args()?;
    Ok(apply_overrides(settings, args).into_config()?)
}

fn apply_overrides(settings: ConnectionSettings, args: &ConnectionArgs) -> ConnectionSettings {
    ConnectionSettings {
        instance_id: args.instance_id.clone().or(settings.instance_id),
        region: args.region.clone().unwrap_or(settings.region),
        bucket_name: args.bucket_name.clone().or(settings.bucket_name),
        broker_path: args.broker_path.clone().unwrap_or(settings.broker_path),
        retries: args.retries.or(settings.retries),
        timeout_secs: args.timeout_secs.unwrap_or(settings.timeout_secs),
        shell: args.shell.clone().unwrap_or(settings.shell),
        profile: args.profile.clone().or(settings.profile),
        endpoint_url: args.endpoint_url.clone().or(settings.endpoint_url),
        transfer_method: args
            .transfer_method
            .clone()
            .unwrap_or(settings.transfer_method),
        store_cli: settings.store_cli,
    }
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    for arg in args {
        if arg
            .chars()
            .any(|ch| ch.is_control() && !matches!(ch, '\n' | '\t'))
        {
            return Err(CliError::InvalidCommand(String::from(
                "command arguments must not contain control characters other than newline and tab",
            )));
        }
    }
    Ok(())
}

fn emit(result: &TranscriptResult) -> io::Result<()> {
    write_stream(io::stdout().lock(), &result.stdout)?;
    write_stream(io::stderr().lock(), &result.stderr)
}

fn write_stream(mut target: impl Write, text: &str) -> io::Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    target.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        target.write_all(b"\n")?;
    }
    target.flush()
}

/// Process exit code for a remote return code; values outside `0..=255`
/// (including the reserved negative codes) map to 1.
fn exit_code(return_code: i32) -> i32 {
    u8::try_from(return_code).map_or(1, i32::from)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            instance_id: Some(String::from("i-from-file")),
            region: String::from("us-east-1"),
            bucket_name: Some(String::from("file-bucket")),
            broker_path: String::from("/usr/local/bin/session-manager-plugin"),
            retries: None,
            timeout_secs: 60,
            shell: String::from("posix"),
            profile: None,
            endpoint_url: None,
            transfer_method: String::from("presigned"),
            store_cli: String::from("aws"),
        }
    }

    #[rstest]
    #[case(0, 0)]
    #[case(3, 3)]
    #[case(255, 255)]
    #[case(256, 1)]
    #[case(-1, 1)]
    #[case(-51, 1)]
    fn exit_codes_fit_the_process_range(#[case] return_code: i32, #[case] expected: i32) {
        assert_eq!(exit_code(return_code), expected);
    }

    #[rstest]
    fn flags_override_loaded_settings() {
        let args = ConnectionArgs {
            instance_id: Some(String::from("i-from-flag")),
            timeout_secs: Some(5),
            shell: Some(String::from("powershell")),
            ..ConnectionArgs::default()
        };
        let merged = apply_overrides(settings(), &args);
        assert_eq!(merged.instance_id.as_deref(), Some("i-from-flag"));
        assert_eq!(merged.bucket_name.as_deref(), Some("file-bucket"));
        assert_eq!(merged.timeout_secs, 5);
        assert_eq!(merged.shell, "powershell");
        assert_eq!(merged.region, "us-east-1");
    }

    #[rstest]
    #[case::plain(&["ls", "-la"], true)]
    #[case::multi_line(&["echo a\necho b"], true)]
    #[case::nul(&["echo \u{0}"], false)]
    #[case::carriage_return(&["echo a\r"], false)]
    fn command_arguments_reject_stray_control_characters(
        #[case] args: &[&str],
        #[case] accepted: bool,
    ) {
        let owned: Vec<String> = args.iter().map(|arg| (*arg).to_owned()).collect();
        assert_eq!(validate_command_args(&owned).is_ok(), accepted);
    }

    #[rstest]
    fn streams_gain_a_trailing_newline() {
        let mut buffer = Vec::new();
        write_stream(&mut buffer, "hello").unwrap_or_else(|err| panic!("write: {err}"));
        assert_eq!(buffer, b"hello\n");

        let mut untouched = Vec::new();
        write_stream(&mut untouched, "").unwrap_or_else(|err| panic!("write: {err}"));
        assert!(untouched.is_empty());
    }
}
