//! Configuration snapshot for directory connections.
//!
//! A [`DirectoryConfig`] is handed to a connection once and never mutated
//! afterwards. It can be deserialized from whatever the application uses to
//! store settings; the bind password is kept in a [`SecretString`] and is never
//! serialized back out.

use crate::Error;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Default plain LDAP port.
pub const DEFAULT_PORT: u16 = 389;
/// Default page size for paged searches.
pub const DEFAULT_PAGE_SIZE: u32 = 1000;
/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default operation timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Transport encryption requested for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EncryptionMode {
    /// Plain text transport.
    #[default]
    None,
    /// Plain transport upgraded in-band with the StartTLS extended operation.
    StartTls,
    /// TLS from the first byte (`ldaps://`).
    Ldaps,
}

impl EncryptionMode {
    /// Returns the canonical lowercase name of the mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::StartTls => "starttls",
            Self::Ldaps => "ldaps",
        }
    }

    /// Returns true if the mode requires TLS material to be prepared.
    #[must_use]
    pub const fn uses_tls(&self) -> bool {
        matches!(self, Self::StartTls | Self::Ldaps)
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "starttls" => Ok(Self::StartTls),
            "ldaps" => Ok(Self::Ldaps),
            other => Err(Error::ConfigError(format!(
                "unknown encryption mode `{other}` (expected none, starttls or ldaps)"
            ))),
        }
    }
}

impl TryFrom<String> for EncryptionMode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EncryptionMode> for String {
    fn from(mode: EncryptionMode) -> Self {
        mode.as_str().to_string()
    }
}

/// Configuration for connecting to a directory server.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct DirectoryConfig {
    /// Server hostname or address
    #[validate(length(min = 1))]
    pub hostname: String,

    /// Server port
    #[validate(range(min = 1))]
    #[serde(default = "default_port")]
    pub port: u16,

    /// DN used for the session bind (empty for anonymous)
    #[serde(default)]
    pub bind_dn: String,

    /// Password used for the session bind
    #[serde(
        default = "empty_secret",
        deserialize_with = "deserialize_secret",
        skip_serializing
    )]
    pub bind_password: SecretString,

    /// Root DN used when a query does not name a base
    #[serde(default)]
    pub root_dn: String,

    /// Requested transport encryption
    #[serde(default)]
    pub encryption: EncryptionMode,

    /// Whether to verify the server certificate
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,

    /// Optional path to a PEM CA bundle used to verify the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Attempt StartTLS even when the server does not announce it, and fail if it is refused
    #[serde(default)]
    pub force_starttls: bool,

    /// Connection timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Operation timeout in seconds
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Default page size for paged searches
    #[validate(range(min = 1, max = 2_147_483_647))]
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Let the server sort results when it announces the sort control
    #[serde(default)]
    pub server_side_sort: bool,
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_tls_verify() -> bool {
    true
}

const fn default_connection_timeout_secs() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

const fn default_operation_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

const fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl DirectoryConfig {
    /// Creates a configuration for an anonymous, unencrypted connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the hostname is empty or does not form a valid URL.
    pub fn new(hostname: impl Into<String>, root_dn: impl Into<String>) -> Result<Self, Error> {
        let config = Self {
            hostname: hostname.into(),
            port: default_port(),
            bind_dn: String::new(),
            bind_password: empty_secret(),
            root_dn: root_dn.into(),
            encryption: EncryptionMode::None,
            tls_verify: default_tls_verify(),
            tls_ca_cert: None,
            force_starttls: false,
            connection_timeout_secs: default_connection_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            page_size: default_page_size(),
            server_side_sort: false,
        };
        config.check()?;
        Ok(config)
    }

    /// Validates field ranges and the derived URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] describing the first problem found.
    pub fn check(&self) -> Result<(), Error> {
        self.validate()?;
        self.url()?;
        Ok(())
    }

    /// Sets the credentials used for the session bind.
    #[must_use]
    pub fn with_credentials(
        mut self,
        bind_dn: impl Into<String>,
        bind_password: impl Into<String>,
    ) -> Self {
        self.bind_dn = bind_dn.into();
        self.bind_password = SecretString::from(bind_password.into());
        self
    }

    /// Overrides the server port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the transport encryption mode.
    #[must_use]
    pub const fn with_encryption(mut self, encryption: EncryptionMode) -> Self {
        self.encryption = encryption;
        self
    }

    /// Enables or disables server certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets a PEM CA bundle used to verify the server certificate.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Requires StartTLS even when the server does not announce it.
    #[must_use]
    pub const fn with_force_starttls(mut self, force: bool) -> Self {
        self.force_starttls = force;
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Overrides the operation timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Overrides the default page size for paged searches.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Opts in to server-side sorting when the server announces the sort control.
    #[must_use]
    pub const fn with_server_side_sort(mut self, enabled: bool) -> Self {
        self.server_side_sort = enabled;
        self
    }

    /// Returns the bind DN.
    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// Returns the bind password.
    #[must_use]
    pub fn bind_password(&self) -> &str {
        self.bind_password.expose_secret()
    }

    /// Returns the root DN.
    #[must_use]
    pub fn root_dn(&self) -> &str {
        &self.root_dn
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the operation timeout duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Builds the server URL; the scheme is `ldaps` only for [`EncryptionMode::Ldaps`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the hostname does not form a valid URL.
    pub fn url(&self) -> Result<Url, Error> {
        let scheme = match self.encryption {
            EncryptionMode::Ldaps => "ldaps",
            EncryptionMode::None | EncryptionMode::StartTls => "ldap",
        };
        let url = Url::parse(&format!("{scheme}://{}:{}", self.hostname, self.port))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(Error::ConfigError(format!(
                "hostname `{}` is not a valid host",
                self.hostname
            )));
        }
        Ok(url)
    }
}
