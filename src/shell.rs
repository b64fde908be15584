//! Remote shell variants understood by the framer and the transcript parser.
//!
//! The broker always lands in an interactive shell on the remote instance.
//! Which shell it is decides how commands are wrapped and how their status is
//! read back, so the variant is carried as plain data rather than encoded in a
//! type hierarchy.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Interactive shell running at the far end of the broker session.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ShellKind {
    /// A POSIX `sh`-compatible shell (Linux instances).
    #[default]
    Posix,
    /// Windows PowerShell (Windows instances).
    PowerShell,
}

impl ShellKind {
    /// Connection attempts retried by default for this shell.
    #[must_use]
    pub const fn default_retries(self) -> u32 {
        match self {
            Self::Posix => 3,
            Self::PowerShell => 0,
        }
    }

    /// Canonical lowercase name used in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Posix => "posix",
            Self::PowerShell => "powershell",
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a shell name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown shell kind {0:?}: expected one of posix, sh, bash, powershell, pwsh")]
pub struct ShellKindParseError(pub String);

impl FromStr for ShellKind {
    type Err = ShellKindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "posix" | "sh" | "bash" => Ok(Self::Posix),
            "powershell" | "pwsh" => Ok(Self::PowerShell),
            _ => Err(ShellKindParseError(value.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("posix", ShellKind::Posix)]
    #[case("SH", ShellKind::Posix)]
    #[case(" bash ", ShellKind::Posix)]
    #[case("PowerShell", ShellKind::PowerShell)]
    #[case("pwsh", ShellKind::PowerShell)]
    fn parses_known_shell_names(#[case] raw: &str, #[case] expected: ShellKind) {
        let parsed: ShellKind = raw
            .parse()
            .unwrap_or_else(|err| panic!("{raw} should parse: {err}"));
        assert_eq!(parsed, expected);
    }

    #[rstest]
    fn rejects_unknown_shell_names() {
        let err = "cmd.exe"
            .parse::<ShellKind>()
            .expect_err("cmd.exe is not supported");
        assert!(err.to_string().contains("cmd.exe"));
    }

    #[rstest]
    fn default_retries_depend_on_shell() {
        assert_eq!(ShellKind::Posix.default_retries(), 3);
        assert_eq!(ShellKind::PowerShell.default_retries(), 0);
    }
}
