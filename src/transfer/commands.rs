//! Remote-side commands that move a file between the host and the bucket.

use std::borrow::Cow;

use shell_escape::unix::escape;

use crate::shell::ShellKind;

use super::TransferMethod;

/// Command that downloads `source` (a presigned URL or `s3://` URL) into
/// `remote_path` on the remote host.
#[must_use]
pub fn fetch_command(
    method: &TransferMethod,
    shell: ShellKind,
    source: &str,
    remote_path: &str,
) -> String {
    match (method, shell) {
        (TransferMethod::Presigned, ShellKind::Posix) => format!(
            "curl --silent --show-error --fail --output {} {}",
            posix_quote(remote_path),
            posix_quote(source)
        ),
        (TransferMethod::Presigned, ShellKind::PowerShell) => format!(
            "Invoke-WebRequest -Uri {} -OutFile {} -UseBasicParsing",
            powershell_quote(source),
            powershell_quote(remote_path)
        ),
        (TransferMethod::StoreCli { program }, ShellKind::Posix) => format!(
            "{} s3 cp {} {}",
            posix_quote(program),
            posix_quote(source),
            posix_quote(remote_path)
        ),
        (TransferMethod::StoreCli { program }, ShellKind::PowerShell) => format!(
            "& {} s3 cp {} {}",
            powershell_quote(program),
            powershell_quote(source),
            powershell_quote(remote_path)
        ),
    }
}

/// Command that uploads `remote_path` from the remote host to `destination`
/// (a presigned URL or `s3://` URL).
#[must_use]
pub fn push_command(
    method: &TransferMethod,
    shell: ShellKind,
    remote_path: &str,
    destination: &str,
) -> String {
    match (method, shell) {
        (TransferMethod::Presigned, ShellKind::Posix) => format!(
            "curl --silent --show-error --fail --request PUT --upload-file {} {}",
            posix_quote(remote_path),
            posix_quote(destination)
        ),
        (TransferMethod::Presigned, ShellKind::PowerShell) => format!(
            "Invoke-WebRequest -Method PUT -InFile {} -Uri {} -UseBasicParsing",
            powershell_quote(remote_path),
            powershell_quote(destination)
        ),
        (TransferMethod::StoreCli { program }, ShellKind::Posix) => format!(
            "{} s3 cp {} {}",
            posix_quote(program),
            posix_quote(remote_path),
            posix_quote(destination)
        ),
        (TransferMethod::StoreCli { program }, ShellKind::PowerShell) => format!(
            "& {} s3 cp {} {}",
            powershell_quote(program),
            powershell_quote(remote_path),
            powershell_quote(destination)
        ),
    }
}

fn posix_quote(value: &str) -> Cow<'_, str> {
    escape(value.into())
}

/// Single-quoted PowerShell literal; embedded quotes are doubled.
fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
