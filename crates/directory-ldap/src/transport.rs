//! Transport seam between the session logic and the wire.
//!
//! [`LdapConnector`] opens handles and [`LdapSession`] performs one request at
//! a time on a handle. Result codes are returned as data so the session can
//! tell "no such object" or "invalid credentials" apart from other failures;
//! only transport-level problems surface as errors. The production
//! implementation wraps `ldap3`.

use crate::normalize::RawEntry;
use crate::query::SearchScope;
use crate::Result;
use async_trait::async_trait;
use directory_core::{DirectoryConfig, Error};
use ldap3::controls::{Control, RawControl};
use ldap3::{LdapConnAsync, LdapConnSettings, Mod, Scope, SearchEntry, SearchOptions};
use native_tls::{Certificate, TlsConnector};
use std::collections::HashSet;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Result codes a search may end with while still carrying entries.
const RESULT_SUCCESS: u32 = 0;
const RESULT_SIZE_LIMIT_EXCEEDED: u32 = 4;
const RESULT_ADMIN_LIMIT_EXCEEDED: u32 = 11;

/// Everything needed to open a transport handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// `ldap://` or `ldaps://` URL.
    pub url: String,
    /// Upgrade the plaintext connection with StartTLS after connecting.
    pub starttls: bool,
    /// Verify the server certificate.
    pub tls_verify: bool,
    /// PEM bundle trusted in addition to the platform store.
    pub tls_ca_cert: Option<PathBuf>,
    /// Connect timeout.
    pub connection_timeout: Duration,
    /// Per-request timeout.
    pub operation_timeout: Duration,
}

impl TransportSettings {
    /// Derives transport settings from the configuration. StartTLS starts
    /// disabled; it is enabled after capability discovery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if no URL can be formed.
    pub fn from_config(config: &DirectoryConfig) -> Result<Self> {
        Ok(Self {
            url: config.url()?.to_string(),
            starttls: false,
            tls_verify: config.tls_verify,
            tls_ca_cert: config.tls_ca_cert.clone(),
            connection_timeout: config.connection_timeout(),
            operation_timeout: config.operation_timeout(),
        })
    }

    /// Returns a copy with StartTLS switched on or off.
    #[must_use]
    pub fn with_starttls(mut self, starttls: bool) -> Self {
        self.starttls = starttls;
        self
    }

    /// Returns true if the handle will be encrypted.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.starttls || self.url.starts_with("ldaps://")
    }

    fn ldap_settings(&self) -> Result<LdapConnSettings> {
        let mut settings = LdapConnSettings::new()
            .set_conn_timeout(self.connection_timeout)
            .set_starttls(self.starttls);

        if !self.tls_verify {
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|err| {
                    Error::ConfigError(format!("failed to construct TLS connector: {err}"))
                })?;
            settings = settings.set_connector(connector).set_no_tls_verify(true);
        } else if let Some(cert_path) = &self.tls_ca_cert {
            let pem = fs::read(cert_path).map_err(|err| {
                Error::ConfigError(format!(
                    "failed to read CA certificate {}: {err}",
                    cert_path.display()
                ))
            })?;
            let certificate = Certificate::from_pem(&pem)
                .map_err(|err| Error::ConfigError(format!("invalid CA certificate: {err}")))?;
            let connector = TlsConnector::builder()
                .add_root_certificate(certificate)
                .build()
                .map_err(|err| {
                    Error::ConfigError(format!("failed to load CA certificate: {err}"))
                })?;
            settings = settings.set_connector(connector);
        }

        Ok(settings)
    }
}

/// A request control sent with an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestControl {
    /// Control type OID.
    pub oid: String,
    /// Criticality flag.
    pub critical: bool,
    /// BER encoded control value.
    pub value: Option<Vec<u8>>,
}

impl RequestControl {
    /// Creates a non-critical control.
    #[must_use]
    pub fn new(oid: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            oid: oid.into(),
            critical: false,
            value: Some(value),
        }
    }
}

impl From<RequestControl> for RawControl {
    fn from(control: RequestControl) -> Self {
        RawControl {
            ctype: control.oid,
            crit: control.critical,
            val: control.value,
        }
    }
}

impl From<RawControl> for RequestControl {
    fn from(control: RawControl) -> Self {
        Self {
            oid: control.ctype,
            critical: control.crit,
            value: control.val,
        }
    }
}

/// A control returned with a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseControl {
    /// Control type OID.
    pub oid: String,
    /// BER encoded control value.
    pub value: Option<Vec<u8>>,
}

impl From<Control> for ResponseControl {
    fn from(Control(_, raw): Control) -> Self {
        Self {
            oid: raw.ctype,
            value: raw.val,
        }
    }
}

/// Result code and diagnostic of a completed operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationResult {
    /// LDAP result code.
    pub code: u32,
    /// Server diagnostic message.
    pub message: String,
}

impl OperationResult {
    /// A successful result.
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    /// A result with the given code and diagnostic.
    #[must_use]
    pub fn with_code(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns true for result code 0.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == RESULT_SUCCESS
    }

    /// Returns true for results whose entries are usable (success, size or admin limit).
    #[must_use]
    pub const fn returns_entries(&self) -> bool {
        matches!(
            self.code,
            RESULT_SUCCESS | RESULT_SIZE_LIMIT_EXCEEDED | RESULT_ADMIN_LIMIT_EXCEEDED
        )
    }

    /// Returns true for result code 32.
    #[must_use]
    pub const fn is_no_such_object(&self) -> bool {
        self.code == directory_core::error::RESULT_NO_SUCH_OBJECT
    }

    /// Returns true for result code 49.
    #[must_use]
    pub const fn is_invalid_credentials(&self) -> bool {
        self.code == directory_core::error::RESULT_INVALID_CREDENTIALS
    }

    /// Returns true for the size and admin limit codes.
    #[must_use]
    pub const fn is_limit_exceeded(&self) -> bool {
        matches!(
            self.code,
            RESULT_SIZE_LIMIT_EXCEEDED | RESULT_ADMIN_LIMIT_EXCEEDED
        )
    }

    /// Converts a non-zero code into [`Error::ProtocolError`] prefixed with `context`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolError`] unless the code is 0.
    pub fn into_result(self, context: &str) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        Err(Error::ProtocolError {
            code: self.code,
            message: if self.message.is_empty() {
                format!("{context}: result code {}", self.code)
            } else {
                format!("{context}: {}", self.message)
            },
        })
    }
}

/// A search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base DN.
    pub base: String,
    /// Search scope.
    pub scope: SearchScope,
    /// RFC 4515 filter.
    pub filter: String,
    /// Attributes to return; empty returns all user attributes.
    pub attributes: Vec<String>,
    /// Server-side size limit (0 = none).
    pub size_limit: i32,
    /// Request controls.
    pub controls: Vec<RequestControl>,
}

impl SearchRequest {
    /// Creates a request without size limit or controls.
    #[must_use]
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
            size_limit: 0,
            controls: Vec::new(),
        }
    }

    /// Sets the attributes to return.
    #[must_use]
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }
}

/// Entries, result and controls of a completed search.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchResponse {
    /// Entries in server order.
    pub entries: Vec<RawEntry>,
    /// Final result.
    pub result: OperationResult,
    /// Response controls.
    pub controls: Vec<ResponseControl>,
}

/// LDAP modification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryModification {
    /// Add attribute values.
    Add {
        /// Attribute to modify.
        attribute: String,
        /// Values to add.
        values: Vec<String>,
    },
    /// Delete attribute values.
    Delete {
        /// Attribute to modify.
        attribute: String,
        /// Values to delete (empty removes attribute).
        values: Vec<String>,
    },
    /// Replace attribute values.
    Replace {
        /// Attribute to modify.
        attribute: String,
        /// Replacement values (empty removes attribute).
        values: Vec<String>,
    },
}

impl From<&DirectoryModification> for Mod<String> {
    fn from(modification: &DirectoryModification) -> Self {
        let set = |values: &[String]| values.iter().cloned().collect::<HashSet<_>>();
        match modification {
            DirectoryModification::Add { attribute, values } => {
                Mod::Add(attribute.clone(), set(values))
            }
            DirectoryModification::Delete { attribute, values } => {
                Mod::Delete(attribute.clone(), set(values))
            }
            DirectoryModification::Replace { attribute, values } => {
                Mod::Replace(attribute.clone(), set(values))
            }
        }
    }
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// One open transport handle. Requests are strictly sequential.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LdapSession: Send {
    /// Simple bind.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<OperationResult>;
    /// Search.
    async fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse>;
    /// Add an entry.
    async fn add(
        &mut self,
        dn: &str,
        attributes: &[(String, Vec<String>)],
    ) -> Result<OperationResult>;
    /// Modify an entry.
    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[DirectoryModification],
    ) -> Result<OperationResult>;
    /// Rename an entry below `new_parent`, deleting the old RDN.
    async fn rename(&mut self, dn: &str, new_rdn: &str, new_parent: &str)
        -> Result<OperationResult>;
    /// Delete a leaf entry.
    async fn delete(&mut self, dn: &str) -> Result<OperationResult>;
    /// Unbind and close.
    async fn unbind(&mut self) -> Result<()>;
}

/// Opens transport handles.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LdapConnector: Send + Sync {
    /// Opens a new handle.
    async fn connect(&self, settings: &TransportSettings) -> Result<Box<dyn LdapSession>>;
}

/// Connector backed by `ldap3`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealLdapConnector;

impl RealLdapConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LdapConnector for RealLdapConnector {
    async fn connect(&self, settings: &TransportSettings) -> Result<Box<dyn LdapSession>> {
        let ldap_settings = settings.ldap_settings()?;
        debug!(url = %settings.url, starttls = settings.starttls, "opening directory connection");
        let (conn, ldap) = LdapConnAsync::with_settings(ldap_settings, &settings.url)
            .await
            .map_err(|err| {
                Error::ConnectionError(format!("could not connect to {}: {err}", settings.url))
            })?;
        ldap3::drive!(conn);
        Ok(Box::new(RealLdapSession {
            inner: ldap,
            operation_timeout: settings.operation_timeout,
        }))
    }
}

struct RealLdapSession {
    inner: ldap3::Ldap,
    operation_timeout: Duration,
}

async fn timed<F, T>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = ldap3::result::Result<T>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| {
            Error::protocol(format!(
                "directory {operation} timed out after {}ms",
                limit.as_millis()
            ))
        })?
        .map_err(|err| Error::protocol(format!("directory {operation} failed: {err}")))
}

fn operation_result(result: ldap3::LdapResult) -> OperationResult {
    OperationResult::with_code(result.rc, result.text)
}

fn raw_entry(entry: SearchEntry) -> RawEntry {
    let mut attributes: Vec<(String, Vec<String>)> = entry.attrs.into_iter().collect();
    attributes.extend(entry.bin_attrs.into_iter().map(|(name, values)| {
        let values = values
            .iter()
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .collect();
        (name, values)
    }));
    RawEntry {
        dn: entry.dn,
        attributes,
    }
}

#[async_trait]
impl LdapSession for RealLdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<OperationResult> {
        let result = timed(
            self.operation_timeout,
            "bind",
            self.inner.simple_bind(dn, password),
        )
        .await?;
        Ok(operation_result(result))
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<SearchResponse> {
        let controls: Vec<RawControl> = request.controls.iter().cloned().map(Into::into).collect();
        let options = SearchOptions::new().sizelimit(request.size_limit);

        let ldap = &mut self.inner;
        if !controls.is_empty() {
            ldap.with_controls(controls);
        }
        ldap.with_search_options(options);
        let search = ldap.search(
            &request.base,
            request.scope.into(),
            &request.filter,
            request.attributes.clone(),
        );
        let ldap3::SearchResult(entries, result) =
            timed(self.operation_timeout, "search", search).await?;

        let controls = result.ctrls.iter().cloned().map(ResponseControl::from).collect();
        Ok(SearchResponse {
            entries: entries
                .into_iter()
                .map(SearchEntry::construct)
                .map(raw_entry)
                .collect(),
            result: operation_result(result),
            controls,
        })
    }

    async fn add(
        &mut self,
        dn: &str,
        attributes: &[(String, Vec<String>)],
    ) -> Result<OperationResult> {
        let attributes = attributes
            .iter()
            .map(|(name, values)| (name.clone(), values.iter().cloned().collect::<HashSet<_>>()))
            .collect::<Vec<_>>();
        let result = timed(self.operation_timeout, "add", self.inner.add(dn, attributes)).await?;
        Ok(operation_result(result))
    }

    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[DirectoryModification],
    ) -> Result<OperationResult> {
        let mods = modifications.iter().map(Mod::from).collect::<Vec<_>>();
        let result = timed(self.operation_timeout, "modify", self.inner.modify(dn, mods)).await?;
        Ok(operation_result(result))
    }

    async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: &str,
    ) -> Result<OperationResult> {
        let result = timed(
            self.operation_timeout,
            "rename",
            self.inner.modifydn(dn, new_rdn, true, Some(new_parent)),
        )
        .await?;
        Ok(operation_result(result))
    }

    async fn delete(&mut self, dn: &str) -> Result<OperationResult> {
        let result = timed(self.operation_timeout, "delete", self.inner.delete(dn)).await?;
        Ok(operation_result(result))
    }

    async fn unbind(&mut self) -> Result<()> {
        timed(self.operation_timeout, "unbind", self.inner.unbind()).await
    }
}
