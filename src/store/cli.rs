//! Object store driven through the `aws` command line tool.

use std::ffi::OsString;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::ConnectionConfig;

use super::{ObjectStore, ObjectStoreError, PresignMethod, StoreFuture, object_url};

/// [`ObjectStore`] that shells out to `aws s3` on the local host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AwsCliObjectStore {
    program: String,
    region: Option<String>,
    profile: Option<String>,
    endpoint_url: Option<String>,
}

impl AwsCliObjectStore {
    /// Creates a store that runs `program` with no extra options.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            region: None,
            profile: None,
            endpoint_url: None,
        }
    }

    /// Creates a store targeting the region, profile, and endpoint of a
    /// connection.
    #[must_use]
    pub fn from_config(program: impl Into<String>, config: &ConnectionConfig) -> Self {
        Self {
            program: program.into(),
            region: Some(config.region().to_owned()),
            profile: config.profile().map(str::to_owned),
            endpoint_url: config.endpoint_url().map(str::to_owned),
        }
    }

    /// Program invoked for every operation.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn args(&self, operation: &[&str]) -> Vec<OsString> {
        let mut args: Vec<OsString> = operation.iter().map(OsString::from).collect();
        let options = [
            ("--region", self.region.as_deref()),
            ("--profile", self.profile.as_deref()),
            ("--endpoint-url", self.endpoint_url.as_deref()),
        ];
        for (flag, value) in options {
            if let Some(present) = value {
                args.push(OsString::from(flag));
                args.push(OsString::from(present));
            }
        }
        args
    }

    fn render(&self, args: &[OsString]) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(args.iter().map(|arg| arg.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    async fn run(
        &self,
        args: Vec<OsString>,
        input: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, ObjectStoreError> {
        let command_line = self.render(&args);
        debug!(command = %command_line, "running object store command");
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ObjectStoreError::Spawn {
                program: self.program.clone(),
                message: err.to_string(),
            })?;

        if let Some(body) = input
            && let Some(mut stdin) = child.stdin.take()
        {
            let written = async {
                stdin.write_all(&body).await?;
                stdin.shutdown().await
            };
            written.await.map_err(|err| ObjectStoreError::Io {
                path: command_line.clone(),
                message: err.to_string(),
            })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|err| ObjectStoreError::Io {
                path: command_line.clone(),
                message: err.to_string(),
            })?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        Err(ObjectStoreError::CommandFailure {
            command: command_line,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl ObjectStore for AwsCliObjectStore {
    fn put<'a>(&'a self, bucket: &'a str, key: &'a str, body: Vec<u8>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let url = object_url(bucket, key);
            self.run(self.args(&["s3", "cp", "-", url.as_str()]), Some(body))
                .await
                .map(|_| ())
        })
    }

    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let url = object_url(bucket, key);
            self.run(self.args(&["s3", "cp", url.as_str(), "-"]), None).await
        })
    }

    fn presign<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        method: PresignMethod,
        expires: Duration,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            if method == PresignMethod::Put {
                return Err(ObjectStoreError::Unsupported {
                    operation: String::from("presigned PUT URLs via the aws CLI"),
                });
            }
            let url = object_url(bucket, key);
            let secs = expires.as_secs().to_string();
            let stdout = self
                .run(
                    self.args(&["s3", "presign", url.as_str(), "--expires-in", secs.as_str()]),
                    None,
                )
                .await?;
            Ok(String::from_utf8_lossy(&stdout).trim().to_owned())
        })
    }

    fn presign_fallback(&self, method: PresignMethod) -> Option<&str> {
        (method == PresignMethod::Put).then_some(self.program.as_str())
    }
}
