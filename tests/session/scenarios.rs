//! BDD scenarios for remote command execution.

use rstest_bdd_macros::scenario;

use super::test_helpers::{SessionWorld, session_world};

#[scenario(
    path = "tests/features/session.feature",
    name = "Capture the output of a command"
)]
fn scenario_capture_output(session_world: SessionWorld) {
    drop(session_world);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Propagate non-zero return codes"
)]
fn scenario_return_codes(session_world: SessionWorld) {
    drop(session_world);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Keep shell state between commands"
)]
fn scenario_shell_state(session_world: SessionWorld) {
    drop(session_world);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Reopen the session after a timeout"
)]
fn scenario_timeout_recovery(session_world: SessionWorld) {
    drop(session_world);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Reject commands after close"
)]
fn scenario_closed_connection(session_world: SessionWorld) {
    drop(session_world);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Move a file through the bucket"
)]
fn scenario_file_round_trip(session_world: SessionWorld) {
    drop(session_world);
}
