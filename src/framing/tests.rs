//! Tests for marker generation and command wrapping.

use std::collections::HashSet;

use rstest::rstest;

use super::*;

#[rstest]
fn markers_are_unique_and_alphanumeric() {
    let markers: HashSet<String> = (0..256).map(|_| generate_marker()).collect();
    assert_eq!(markers.len(), 256);
    for marker in &markers {
        assert!(marker.starts_with(MARKER_PREFIX));
        assert!(marker.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}

#[rstest]
fn envelopes_never_share_markers() {
    let first = CommandEnvelope::new("true");
    let second = CommandEnvelope::new("true");
    assert_ne!(first.start_marker(), first.end_marker());
    assert_ne!(first.end_marker(), second.end_marker());
    assert_ne!(first.start_marker(), second.start_marker());
}

#[rstest]
fn posix_wrap_prints_status_then_markers() {
    let wrapped = wrap("ls /tmp", "START", "END", ShellKind::Posix);
    assert_eq!(
        wrapped,
        "ls /tmp\nprintf '\\n%s\\n' \"$?\"\necho START\necho END\n"
    );
}

#[rstest]
fn powershell_wrap_prints_boolean_status_before_markers() {
    let wrapped = wrap("Get-ChildItem", "START", "END", ShellKind::PowerShell);
    assert_eq!(wrapped, "Get-ChildItem\necho $?\necho START\necho END\n");
    let status = wrapped.find("$?").expect("status statement present");
    let start = wrapped.find("echo START").expect("start marker present");
    assert!(status < start);
}

#[rstest]
fn envelope_wrap_uses_its_own_markers() {
    let envelope = CommandEnvelope::with_markers("uptime", "S1", "E1");
    let wrapped = envelope.wrap(ShellKind::Posix);
    assert!(wrapped.starts_with("uptime\n"));
    assert!(wrapped.ends_with("echo S1\necho E1\n"));
    assert_eq!(envelope.command(), "uptime");
}

#[rstest]
fn multi_line_commands_keep_their_lines() {
    let wrapped = wrap("echo one\necho two", "S", "E", ShellKind::Posix);
    assert!(wrapped.starts_with("echo one\necho two\nprintf"));
}

#[rstest]
#[case(ShellKind::Posix, "stty -echo")]
#[case(ShellKind::PowerShell, "function prompt")]
fn preparation_is_shell_specific(#[case] shell: ShellKind, #[case] expected: &str) {
    assert!(preparation(shell).contains(expected));
    assert!(preparation(shell).ends_with('\n'));
}

#[rstest]
fn chunks_cover_the_whole_command() {
    let command = "x".repeat(WRITE_CHUNK_SIZE * 2 + 10);
    let chunks: Vec<&[u8]> = write_chunks(&command).collect();
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|chunk| chunk.len() <= WRITE_CHUNK_SIZE));
    assert_eq!(chunks.concat(), command.as_bytes());
}

#[rstest]
#[case("MARK", true)]
#[case("MARK\r", true)]
#[case("  MARK  ", true)]
#[case("\u{1b}[0mMARK\u{1b}[0m", true)]
#[case("echo MARK", false)]
#[case("MARKER", false)]
#[case("xMARK", false)]
#[case("", false)]
fn marker_lines_must_match_exactly(#[case] line: &str, #[case] expected: bool) {
    assert_eq!(is_marker_line(line, "MARK"), expected);
}
