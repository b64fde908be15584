//! Conversion of raw shell transcripts into structured command results.
//!
//! A transcript is everything the broker printed for one command, up to and
//! including the end marker line. It carries the command's own output, the
//! status line added by the framer and the marker echoes, plus whatever
//! terminal noise the remote shell adds. Parsing never fails: when the status
//! cannot be located the result carries [`RC_UNPARSEABLE`] and a best-effort
//! stdout so callers can still inspect what the command printed.

use tracing::warn;

use crate::shell::ShellKind;

/// Return code reported when the remote shell explicitly signalled failure.
pub const RC_FAILURE: i32 = -1;

/// Return code reported when the transcript's status could not be determined.
pub const RC_UNPARSEABLE: i32 = -51;

/// Lines appended by the POSIX framer: status, start marker, end marker.
const POSIX_TRAILER_LINES: usize = 3;

/// Trailing positions scanned for a PowerShell boolean status.
const POWERSHELL_STATUS_POSITIONS: usize = 3;

/// Status and cleaned output recovered from a transcript.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedTranscript {
    /// Command return code, or one of the reserved negative codes.
    pub return_code: i32,
    /// Command output with framing lines removed.
    pub stdout: String,
}

impl ParsedTranscript {
    /// Returns `true` when the status could not be located.
    #[must_use]
    pub const fn is_ambiguous(&self) -> bool {
        self.return_code == RC_UNPARSEABLE
    }
}

/// Outcome of a remote command as handed back to callers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TranscriptResult {
    /// Command return code, or one of the reserved negative codes.
    pub return_code: i32,
    /// Cleaned standard output.
    pub stdout: String,
    /// Standard error captured from the broker while the command ran.
    pub stderr: String,
}

impl TranscriptResult {
    /// Combines a parsed transcript with the stderr captured alongside it.
    #[must_use]
    pub fn from_parsed(parsed: ParsedTranscript, stderr: String) -> Self {
        Self {
            return_code: parsed.return_code,
            stdout: parsed.stdout,
            stderr,
        }
    }

    /// Returns `true` when the command reported success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.return_code == 0
    }
}

/// Removes ANSI sequences and normalises line endings to `\n`.
#[must_use]
pub fn normalise(raw: &str) -> String {
    crate::ansi::strip(raw)
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

/// Parses a raw transcript produced by a command framed for `shell`.
#[must_use]
pub fn parse(raw: &str, shell: ShellKind) -> ParsedTranscript {
    let normalised = normalise(raw);
    let lines: Vec<&str> = normalised.lines().collect();

    let parsed = match lines.as_slice() {
        [] => unparseable(String::new()),
        [only] => ParsedTranscript {
            return_code: status_token(only, shell).unwrap_or(RC_UNPARSEABLE),
            stdout: String::new(),
        },
        _ => match shell {
            ShellKind::Posix => parse_posix(&lines),
            ShellKind::PowerShell => parse_powershell(&lines, &normalised),
        },
    };

    if parsed.is_ambiguous() {
        warn!(
            shell = %shell,
            lines = lines.len(),
            "could not locate command status in transcript"
        );
    }
    parsed
}

fn parse_posix(lines: &[&str]) -> ParsedTranscript {
    let Some(status_index) = lines.len().checked_sub(POSIX_TRAILER_LINES) else {
        return unparseable(String::new());
    };
    let (output, trailer) = lines.split_at(status_index);

    // The framer prints a newline ahead of the status, which leaves one blank
    // line behind whenever the command's own output ended with a newline.
    let kept = match output.split_last() {
        Some((last, rest)) if last.is_empty() => rest,
        _ => output,
    };
    let stdout = kept.join("\n");

    match trailer
        .first()
        .and_then(|line| status_token(line, ShellKind::Posix))
    {
        Some(return_code) => ParsedTranscript {
            return_code,
            stdout,
        },
        None => unparseable(stdout),
    }
}

fn parse_powershell(lines: &[&str], normalised: &str) -> ParsedTranscript {
    // The boolean normally sits third from the end (before both marker
    // echoes), but shifts by one when the marker lines are trimmed or the
    // command emitted a trailing blank line. Everything from the matched line
    // on is dropped rather than a fixed two lines, since the wrapper echoes a
    // start marker as well as the end marker.
    for offset in 1..=POWERSHELL_STATUS_POSITIONS {
        let Some(index) = lines.len().checked_sub(offset) else {
            break;
        };
        let status = lines
            .get(index)
            .and_then(|line| status_token(line, ShellKind::PowerShell));
        if let Some(return_code) = status {
            let stdout = lines
                .get(..index)
                .map(|kept| kept.join("\n"))
                .unwrap_or_default();
            return ParsedTranscript {
                return_code,
                stdout,
            };
        }
    }

    unparseable(normalised.trim_end_matches('\n').to_owned())
}

fn status_token(line: &str, shell: ShellKind) -> Option<i32> {
    let token = line.trim();
    match shell {
        ShellKind::Posix => token.parse().ok(),
        ShellKind::PowerShell => match token {
            "True" => Some(0),
            "False" => Some(RC_FAILURE),
            _ => None,
        },
    }
}

const fn unparseable(stdout: String) -> ParsedTranscript {
    ParsedTranscript {
        return_code: RC_UNPARSEABLE,
        stdout,
    }
}
