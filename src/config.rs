//! Connection configuration.
//!
//! [`ConnectionSettings`] is the layered form loaded via `ortho-config`
//! (defaults, `conduit.toml`, `CONDUIT_*` environment variables). It is
//! validated and frozen into a [`ConnectionConfig`], the immutable record each
//! connection is built from. Orchestrators that already hold the values can
//! skip the loader and use [`ConnectionConfig::builder`] directly.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::shell::{ShellKind, ShellKindParseError};
use crate::transfer::TransferMethod;

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Location of the session broker binary when none is configured.
pub const DEFAULT_BROKER_PATH: &str = "/usr/local/bin/session-manager-plugin";

/// Seconds allowed for a connection attempt or a single command.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Object store CLI used on the remote host by the `cli` transfer method.
pub const DEFAULT_STORE_CLI: &str = "aws";

/// Layered connection settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CONDUIT",
    discovery(
        app_name = "conduit",
        env_var = "CONDUIT_CONFIG_PATH",
        config_file_name = "conduit.toml",
        dotfile_name = ".conduit.toml",
        project_file_name = "conduit.toml"
    )
)]
pub struct ConnectionSettings {
    /// Identifier of the target instance.
    pub instance_id: Option<String>,
    /// Region hosting the instance and the bucket.
    #[ortho_config(default = DEFAULT_REGION.to_owned())]
    pub region: String,
    /// Bucket used to stage file transfers.
    pub bucket_name: Option<String>,
    /// Path to the session broker binary.
    #[ortho_config(default = DEFAULT_BROKER_PATH.to_owned())]
    pub broker_path: String,
    /// Connection retries; defaults depend on the shell.
    pub retries: Option<u32>,
    /// Seconds allowed for connecting and for each command.
    #[ortho_config(default = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
    /// Remote shell: `posix` or `powershell`.
    #[ortho_config(default = "posix".to_owned())]
    pub shell: String,
    /// Credentials profile forwarded to the broker.
    pub profile: Option<String>,
    /// Service endpoint override forwarded to the broker.
    pub endpoint_url: Option<String>,
    /// How the remote side moves objects: `presigned` or `cli`.
    #[ortho_config(default = "presigned".to_owned())]
    pub transfer_method: String,
    /// Object store CLI invoked remotely when `transfer_method` is `cli`.
    #[ortho_config(default = DEFAULT_STORE_CLI.to_owned())]
    pub store_cli: String,
}

/// Metadata for a configuration field, used to generate actionable errors.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ConnectionSettings {
    /// Loads settings from defaults, configuration files, and environment
    /// variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("conduit")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads settings using the process arguments as the CLI layer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and TOML key that supply the missing value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            self.instance_id.as_deref().unwrap_or_default(),
            &FieldMetadata::new("instance ID", "CONDUIT_INSTANCE_ID", "instance_id"),
        )?;
        require_field(
            &self.region,
            &FieldMetadata::new("region", "CONDUIT_REGION", "region"),
        )?;
        require_field(
            self.bucket_name.as_deref().unwrap_or_default(),
            &FieldMetadata::new("transfer bucket", "CONDUIT_BUCKET_NAME", "bucket_name"),
        )?;
        require_field(
            &self.broker_path,
            &FieldMetadata::new("session broker path", "CONDUIT_BROKER_PATH", "broker_path"),
        )?;
        Ok(())
    }

    /// Validates the settings and freezes them into a [`ConnectionConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required value is missing or a value
    /// cannot be interpreted.
    pub fn into_config(self) -> Result<ConnectionConfig, ConfigError> {
        self.validate()?;
        let shell: ShellKind = self
            .shell
            .parse()
            .map_err(|err: ShellKindParseError| ConfigError::InvalidValue {
                field: String::from("shell"),
                message: err.to_string(),
            })?;
        let transfer_method = TransferMethod::from_setting(&self.transfer_method, &self.store_cli)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: String::from("transfer_method"),
                message: format!(
                    "unknown transfer method {:?}: expected presigned or cli",
                    self.transfer_method
                ),
            })?;

        let mut builder = ConnectionConfig::builder(
            self.instance_id.unwrap_or_default(),
            self.bucket_name.unwrap_or_default(),
        )
        .region(self.region)
        .broker_path(self.broker_path)
        .timeout(Duration::from_secs(self.timeout_secs))
        .shell(shell)
        .profile(self.profile)
        .endpoint_url(self.endpoint_url)
        .transfer_method(transfer_method);
        if let Some(retries) = self.retries {
            builder = builder.retries(retries);
        }
        builder.build()
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to conduit.toml",
            metadata.description, metadata.env_var, metadata.toml_key
        )));
    }
    Ok(())
}

/// Immutable per-connection configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionConfig {
    instance_id: String,
    region: String,
    bucket_name: String,
    broker_path: String,
    retries: u32,
    timeout: Duration,
    shell: ShellKind,
    profile: Option<String>,
    endpoint_url: Option<String>,
    transfer_method: TransferMethod,
}

impl ConnectionConfig {
    /// Starts a builder for the given instance and transfer bucket.
    #[must_use]
    pub fn builder(
        instance_id: impl Into<String>,
        bucket_name: impl Into<String>,
    ) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new(instance_id, bucket_name)
    }

    /// Identifier of the target instance.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Region hosting the instance.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Bucket used to stage file transfers, taken verbatim from configuration.
    #[must_use]
    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// Path to the session broker binary.
    #[must_use]
    pub fn broker_path(&self) -> &str {
        &self.broker_path
    }

    /// Number of times a failed connection attempt is retried.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Time allowed for a connection attempt or a single command.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Remote shell variant.
    #[must_use]
    pub const fn shell(&self) -> ShellKind {
        self.shell
    }

    /// Credentials profile forwarded to the broker, if any.
    #[must_use]
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// Endpoint override forwarded to the broker, if any.
    #[must_use]
    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    /// How the remote side moves objects to and from the bucket.
    #[must_use]
    pub const fn transfer_method(&self) -> &TransferMethod {
        &self.transfer_method
    }
}

/// Builder for [`ConnectionConfig`] that trims and validates on build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionConfigBuilder {
    instance_id: String,
    region: String,
    bucket_name: String,
    broker_path: String,
    retries: Option<u32>,
    timeout: Duration,
    shell: ShellKind,
    profile: Option<String>,
    endpoint_url: Option<String>,
    transfer_method: TransferMethod,
}

impl ConnectionConfigBuilder {
    /// Creates a builder populated with defaults.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, bucket_name: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            region: DEFAULT_REGION.to_owned(),
            bucket_name: bucket_name.into(),
            broker_path: DEFAULT_BROKER_PATH.to_owned(),
            retries: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            shell: ShellKind::default(),
            profile: None,
            endpoint_url: None,
            transfer_method: TransferMethod::default(),
        }
    }

    /// Sets the region.
    #[must_use]
    pub fn region(mut self, value: impl Into<String>) -> Self {
        self.region = value.into();
        self
    }

    /// Sets the broker binary path.
    #[must_use]
    pub fn broker_path(mut self, value: impl Into<String>) -> Self {
        self.broker_path = value.into();
        self
    }

    /// Overrides the shell-dependent retry default.
    #[must_use]
    pub const fn retries(mut self, value: u32) -> Self {
        self.retries = Some(value);
        self
    }

    /// Sets the connect and command timeout.
    #[must_use]
    pub const fn timeout(mut self, value: Duration) -> Self {
        self.timeout = value;
        self
    }

    /// Sets the remote shell variant.
    #[must_use]
    pub const fn shell(mut self, value: ShellKind) -> Self {
        self.shell = value;
        self
    }

    /// Sets the credentials profile forwarded to the broker.
    #[must_use]
    pub fn profile(mut self, value: Option<String>) -> Self {
        self.profile = value;
        self
    }

    /// Sets the endpoint override forwarded to the broker.
    #[must_use]
    pub fn endpoint_url(mut self, value: Option<String>) -> Self {
        self.endpoint_url = value;
        self
    }

    /// Sets the remote transfer method.
    #[must_use]
    pub fn transfer_method(mut self, value: TransferMethod) -> Self {
        self.transfer_method = value;
        self
    }

    /// Builds the configuration, trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required value is blank,
    /// or [`ConfigError::InvalidValue`] when the timeout is zero.
    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        let config = ConnectionConfig {
            instance_id: self.instance_id.trim().to_owned(),
            region: self.region.trim().to_owned(),
            bucket_name: self.bucket_name.trim().to_owned(),
            broker_path: self.broker_path.trim().to_owned(),
            retries: self.retries.unwrap_or_else(|| self.shell.default_retries()),
            timeout: self.timeout,
            shell: self.shell,
            profile: trimmed_optional(self.profile),
            endpoint_url: trimmed_optional(self.endpoint_url),
            transfer_method: self.transfer_method,
        };

        for (value, field) in [
            (&config.instance_id, "instance_id"),
            (&config.region, "region"),
            (&config.bucket_name, "bucket_name"),
            (&config.broker_path, "broker_path"),
        ] {
            if value.is_empty() {
                return Err(ConfigError::MissingField(field.to_owned()));
            }
        }
        if config.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: String::from("timeout"),
                message: String::from("timeout must be greater than zero"),
            });
        }
        if let TransferMethod::StoreCli { program } = &config.transfer_method
            && program.trim().is_empty()
        {
            return Err(ConfigError::MissingField(String::from("store_cli")));
        }
        Ok(config)
    }
}

fn trimmed_optional(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_owned())
        .filter(|trimmed| !trimmed.is_empty())
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A configuration value could not be interpreted.
    #[error("invalid {field}: {message}")]
    InvalidValue {
        /// Offending field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            instance_id: Some(String::from("i-0123456789abcdef0")),
            region: String::from(DEFAULT_REGION),
            bucket_name: Some(String::from("transfer-bucket")),
            broker_path: String::from(DEFAULT_BROKER_PATH),
            retries: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            shell: String::from("posix"),
            profile: None,
            endpoint_url: None,
            transfer_method: String::from("presigned"),
            store_cli: String::from(DEFAULT_STORE_CLI),
        }
    }

    #[rstest]
    fn settings_freeze_into_config(settings: ConnectionSettings) {
        let config = settings
            .into_config()
            .unwrap_or_else(|err| panic!("valid settings: {err}"));
        assert_eq!(config.instance_id(), "i-0123456789abcdef0");
        assert_eq!(config.region(), DEFAULT_REGION);
        assert_eq!(config.bucket_name(), "transfer-bucket");
        assert_eq!(config.retries(), 3);
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.shell(), ShellKind::Posix);
        assert_eq!(config.transfer_method(), &TransferMethod::Presigned);
    }

    #[rstest]
    fn powershell_defaults_to_no_retries(settings: ConnectionSettings) {
        let config = ConnectionSettings {
            shell: String::from("powershell"),
            ..settings
        }
        .into_config()
        .unwrap_or_else(|err| panic!("valid settings: {err}"));
        assert_eq!(config.retries(), 0);
    }

    #[rstest]
    fn explicit_retries_override_shell_default(settings: ConnectionSettings) {
        let config = ConnectionSettings {
            retries: Some(7),
            ..settings
        }
        .into_config()
        .unwrap_or_else(|err| panic!("valid settings: {err}"));
        assert_eq!(config.retries(), 7);
    }

    #[rstest]
    #[case::instance("instance_id", "CONDUIT_INSTANCE_ID")]
    #[case::bucket("bucket_name", "CONDUIT_BUCKET_NAME")]
    #[case::broker("broker_path", "CONDUIT_BROKER_PATH")]
    fn missing_fields_produce_actionable_errors(
        settings: ConnectionSettings,
        #[case] field: &str,
        #[case] env_var: &str,
    ) {
        let mut broken = settings;
        match field {
            "instance_id" => broken.instance_id = Some(String::from("  ")),
            "bucket_name" => broken.bucket_name = None,
            _ => broken.broker_path = String::new(),
        }
        let err = broken.validate().expect_err("blank field should fail");
        let message = err.to_string();
        assert!(message.contains(env_var), "{message}");
        assert!(message.contains(field), "{message}");
        assert!(message.contains("conduit.toml"), "{message}");
    }

    #[rstest]
    fn unknown_shell_is_rejected(settings: ConnectionSettings) {
        let err = ConnectionSettings {
            shell: String::from("fish"),
            ..settings
        }
        .into_config()
        .expect_err("fish is not supported");
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "shell"));
    }

    #[rstest]
    fn cli_transfer_method_uses_store_cli(settings: ConnectionSettings) {
        let config = ConnectionSettings {
            transfer_method: String::from("cli"),
            store_cli: String::from("/opt/aws/bin/aws"),
            ..settings
        }
        .into_config()
        .unwrap_or_else(|err| panic!("valid settings: {err}"));
        assert_eq!(
            config.transfer_method(),
            &TransferMethod::StoreCli {
                program: String::from("/opt/aws/bin/aws")
            }
        );
    }

    #[rstest]
    fn builder_trims_and_rejects_zero_timeout() {
        let config = ConnectionConfig::builder("  i-1  ", " bucket ")
            .profile(Some(String::from("   ")))
            .build()
            .unwrap_or_else(|err| panic!("valid builder: {err}"));
        assert_eq!(config.instance_id(), "i-1");
        assert_eq!(config.bucket_name(), "bucket");
        assert_eq!(config.profile(), None);

        let err = ConnectionConfig::builder("i-1", "bucket")
            .timeout(Duration::ZERO)
            .build()
            .expect_err("zero timeout is invalid");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
