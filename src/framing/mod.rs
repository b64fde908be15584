//! Marker framing for commands injected into an interactive remote shell.
//!
//! The broker exposes nothing more than a continuous byte stream, so each
//! command is wrapped with shell statements that print its status followed by
//! two freshly generated markers. The session reads until the end marker shows
//! up as a complete line, and the transcript parser recovers the status from
//! the lines the framer appended.

use uuid::Uuid;

use crate::shell::ShellKind;

/// Prefix applied to every generated marker so it is a valid bare shell word.
pub const MARKER_PREFIX: &str = "CONDUIT";

/// Maximum number of bytes written to the broker in a single write call.
pub const WRITE_CHUNK_SIZE: usize = 1024;

/// Generates an opaque, single-use marker.
///
/// Markers are alphanumeric so they survive both shells without quoting and
/// cannot be confused with anything a command would print by accident.
#[must_use]
pub fn generate_marker() -> String {
    format!("{MARKER_PREFIX}{}", Uuid::new_v4().simple())
}

/// A command paired with the markers that delimit its output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandEnvelope {
    command: String,
    start_marker: String,
    end_marker: String,
}

impl CommandEnvelope {
    /// Wraps `command` with a fresh pair of markers.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            start_marker: generate_marker(),
            end_marker: generate_marker(),
        }
    }

    /// Builds an envelope with explicit markers.
    #[must_use]
    pub fn with_markers(
        command: impl Into<String>,
        start_marker: impl Into<String>,
        end_marker: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            start_marker: start_marker.into(),
            end_marker: end_marker.into(),
        }
    }

    /// Original command text.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Marker echoed after the command status.
    #[must_use]
    pub fn start_marker(&self) -> &str {
        &self.start_marker
    }

    /// Marker that terminates the command's transcript.
    #[must_use]
    pub fn end_marker(&self) -> &str {
        &self.end_marker
    }

    /// Renders the text written to the broker for `shell`.
    #[must_use]
    pub fn wrap(&self, shell: ShellKind) -> String {
        wrap(&self.command, &self.start_marker, &self.end_marker, shell)
    }
}

/// Wraps `command` so its status and output boundaries can be recovered.
///
/// POSIX shells print `$?` on a line of its own (preceded by a newline so
/// output lacking a trailing newline cannot swallow it). PowerShell prints
/// `$?`, which renders as `True` or `False`. Both then echo the start and end
/// markers, each statement on its own line so execution order is fixed.
#[must_use]
pub fn wrap(command: &str, start_marker: &str, end_marker: &str, shell: ShellKind) -> String {
    match shell {
        ShellKind::Posix => format!(
            "{command}\nprintf '\\n%s\\n' \"$?\"\necho {start_marker}\necho {end_marker}\n"
        ),
        ShellKind::PowerShell => {
            format!("{command}\necho $?\necho {start_marker}\necho {end_marker}\n")
        }
    }
}

/// One-time terminal preparation sent straight after the broker starts.
///
/// POSIX shells stop echoing input and drop their prompts; PowerShell
/// replaces its prompt function with one that prints nothing.
#[must_use]
pub const fn preparation(shell: ShellKind) -> &'static str {
    match shell {
        ShellKind::Posix => "stty -echo\nPS1=''\nPS2=''\n",
        ShellKind::PowerShell => "function prompt { '' }\n",
    }
}

/// Statement that echoes `marker`, used to confirm the shell is responsive.
#[must_use]
pub fn handshake(marker: &str) -> String {
    format!("echo {marker}\n")
}

/// Splits a wrapped command into the chunks written to the broker.
pub fn write_chunks(wrapped: &str) -> impl Iterator<Item = &[u8]> {
    wrapped.as_bytes().chunks(WRITE_CHUNK_SIZE)
}

/// Returns `true` when `line` consists solely of `marker`.
///
/// Terminal decoration (carriage returns, ANSI sequences, surrounding
/// whitespace) is ignored; anything else on the line means it is not a marker
/// line. An echoed `echo <marker>` statement therefore never matches.
#[must_use]
pub fn is_marker_line(line: &str, marker: &str) -> bool {
    crate::ansi::strip(line).trim() == marker
}

#[cfg(test)]
mod tests;
