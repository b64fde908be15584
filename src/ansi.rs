//! Removal of terminal control sequences from broker output.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// CSI sequences, introduced either by `ESC [` or the single-byte `0x9b`.
const ANSI_ESCAPE_PATTERN: &str = r"(?:\x{9b}|\x1b\[)[0-?]*[ -/]*[@-~]";

static ANSI_ESCAPE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(ANSI_ESCAPE_PATTERN).ok());

/// Strips ANSI control sequences, leaving all other characters untouched.
pub(crate) fn strip(text: &str) -> Cow<'_, str> {
    match ANSI_ESCAPE.as_ref() {
        Some(pattern) => pattern.replace_all(text, ""),
        None => Cow::Borrowed(text),
    }
}
