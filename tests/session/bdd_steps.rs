//! BDD step definitions for the connection facade.

use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use ssm_conduit::{ConnectionError, SessionError, TranscriptResult};

use super::test_helpers::{SessionTestError, SessionWorld};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] SessionTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn last_result(session_world: &SessionWorld) -> Result<TranscriptResult, StepError> {
    match session_world.outcome.borrow().as_ref() {
        Some(Ok(result)) => Ok(result.clone()),
        Some(Err(err)) => Err(StepError::Assertion(format!(
            "expected a command result, got error: {err}"
        ))),
        None => Err(StepError::Assertion(String::from("no command was run"))),
    }
}

fn last_error(session_world: &SessionWorld) -> Result<ConnectionError, StepError> {
    match session_world.outcome.borrow().as_ref() {
        Some(Err(err)) => Ok(err.clone()),
        Some(Ok(result)) => Err(StepError::Assertion(format!(
            "expected an error, got result {result:?}"
        ))),
        None => Err(StepError::Assertion(String::from("no command was run"))),
    }
}

#[given("a live connection to a local shell")]
fn live_connection(session_world: &SessionWorld) -> Result<(), StepError> {
    Ok(session_world.open(Duration::from_secs(10))?)
}

#[given("a live connection with a \"{secs}\" second timeout")]
fn live_connection_with_timeout(session_world: &SessionWorld, secs: u64) -> Result<(), StepError> {
    Ok(session_world.open(Duration::from_secs(secs))?)
}

#[given("a local file containing \"{contents}\"")]
fn local_file(session_world: &SessionWorld, contents: String) -> Result<(), StepError> {
    let path = session_world.base.join("upload.txt");
    std::fs::write(&path, contents).map_err(|err| StepError::Assertion(err.to_string()))?;
    session_world.local_file.replace(Some(path));
    Ok(())
}

#[when("I run \"{command}\"")]
fn run_command(session_world: &SessionWorld, command: String) -> Result<(), StepError> {
    Ok(session_world.record(async |connection| connection.execute(&command).await)?)
}

#[when("I close the connection")]
fn close_connection(session_world: &SessionWorld) -> Result<(), StepError> {
    Ok(session_world.close()?)
}

#[when("I upload the file to the remote host")]
fn upload_file(session_world: &SessionWorld) -> Result<(), StepError> {
    let local = session_world
        .local_file
        .borrow()
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("no local file prepared")))?;
    let remote = session_world.remote_path();
    session_world
        .record(async |connection| connection.put_file(&local, remote.as_str()).await)?;
    last_result(session_world).map(drop)
}

#[when("I download the remote file")]
fn download_file(session_world: &SessionWorld) -> Result<(), StepError> {
    let remote = session_world.remote_path();
    let local = session_world.download_path();
    session_world
        .record(async |connection| connection.get_file(remote.as_str(), &local).await)?;
    last_result(session_world).map(drop)
}

#[then("the command prints \"{expected}\"")]
fn command_prints(session_world: &SessionWorld, expected: String) -> Result<(), StepError> {
    let result = last_result(session_world)?;
    if result.stdout == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected stdout {expected:?}, got {:?}",
            result.stdout
        )))
    }
}

#[then("the command reports \"{expected}\" on stderr")]
fn command_reports_stderr(session_world: &SessionWorld, expected: String) -> Result<(), StepError> {
    let result = last_result(session_world)?;
    if result.stderr.contains(&expected) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected stderr to contain {expected:?}, got {:?}",
            result.stderr
        )))
    }
}

#[then("the return code is \"{code}\"")]
fn return_code_is(session_world: &SessionWorld, code: i32) -> Result<(), StepError> {
    let result = last_result(session_world)?;
    if result.return_code == code {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected return code {code}, got {}",
            result.return_code
        )))
    }
}

#[then("the command fails with a timeout")]
fn command_times_out(session_world: &SessionWorld) -> Result<(), StepError> {
    match last_error(session_world)? {
        ConnectionError::Session(SessionError::Timeout { .. }) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a timeout, got {other}"
        ))),
    }
}

#[then("the command is rejected as not connected")]
fn command_rejected(session_world: &SessionWorld) -> Result<(), StepError> {
    match last_error(session_world)? {
        ConnectionError::NotConnected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected NotConnected, got {other}"
        ))),
    }
}

#[then("the broker was launched \"{count}\" times")]
fn broker_launches(session_world: &SessionWorld, count: u32) -> Result<(), StepError> {
    let launches = session_world
        .launcher
        .borrow()
        .as_ref()
        .map(ssm_conduit::test_support::LocalShellLauncher::launches)
        .ok_or_else(|| StepError::Assertion(String::from("no launcher recorded")))?;
    if launches == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} broker launches, got {launches}"
        )))
    }
}

#[then("the downloaded file contains \"{expected}\"")]
fn downloaded_contents(session_world: &SessionWorld, expected: String) -> Result<(), StepError> {
    let path = session_world.download_path();
    let contents =
        std::fs::read_to_string(&path).map_err(|err| StepError::Assertion(err.to_string()))?;
    if contents == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?} in {path}, got {contents:?}"
        )))
    }
}
