//! Error types for directory operations.
//!
//! Callers branch on the variant: a transport that cannot be established, a
//! rejected bind, a failed protocol operation or a misuse of the query API each
//! surface as their own variant. Server diagnostics are carried verbatim; bind
//! credentials never are.

use thiserror::Error;

/// LDAP result code for `noSuchObject`.
pub const RESULT_NO_SUCH_OBJECT: u32 = 32;
/// LDAP result code for `invalidCredentials`.
pub const RESULT_INVALID_CREDENTIALS: u32 = 49;

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The transport could not be opened or mandatory TLS negotiation failed
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Binding with the configured credentials was rejected
    #[error("Bind failed: {0}")]
    BindError(String),

    /// A search, add, modify, rename or delete operation failed
    #[error("Protocol error (code {code}): {message}")]
    ProtocolError {
        /// LDAP result code reported by the server (0 for client-side failures)
        code: u32,
        /// Diagnostic message
        message: String,
    },

    /// The caller asked for something the API cannot do
    #[error("Usage error: {0}")]
    UsageError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Malformed distinguished name
    #[error("Invalid distinguished name: {0}")]
    InvalidDn(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a protocol error that did not originate from a server result code.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            code: 0,
            message: message.into(),
        }
    }

    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionError(_) => "CONNECTION_ERROR",
            Self::BindError(_) => "BIND_ERROR",
            Self::ProtocolError { .. } => "PROTOCOL_ERROR",
            Self::UsageError(_) => "USAGE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::InvalidDn(_) => "INVALID_DN",
        }
    }

    /// Returns the LDAP result code carried by a protocol error.
    #[must_use]
    pub const fn result_code(&self) -> Option<u32> {
        match self {
            Self::ProtocolError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the server reported that the target entry does not exist.
    #[must_use]
    pub const fn is_no_such_object(&self) -> bool {
        matches!(self.result_code(), Some(RESULT_NO_SUCH_OBJECT))
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError(_) | Self::ConfigError(_) | Self::ProtocolError { .. }
        )
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::ConfigError(format!("invalid directory URL: {err}"))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ConfigError(err.to_string())
    }
}
