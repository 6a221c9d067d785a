//! Server capability discovery from the root DSE.

use crate::normalize::{normalize_attributes, AttributeValue, RawEntry, Row};
use crate::query::FieldMap;

/// Attributes requested from the root DSE.
pub const ROOT_DSE_ATTRIBUTES: &[&str] = &[
    "namingContexts",
    "vendorName",
    "vendorVersion",
    "supportedSaslMechanisms",
    "dnsHostName",
    "schemaNamingContext",
    "supportedLDAPVersion",
    "supportedCapabilities",
    "supportedControl",
    "supportedExtension",
    "defaultNamingContext",
    "+",
];

/// Paged results control (RFC 2696).
pub const OID_PAGED_RESULTS: &str = "1.2.840.113556.1.4.319";
/// Server-side sort request control (RFC 2891).
pub const OID_SORT_REQUEST: &str = "1.2.840.113556.1.4.473";
/// Server-side sort response control (RFC 2891).
pub const OID_SORT_RESPONSE: &str = "1.2.840.113556.1.4.474";
/// StartTLS extended operation (RFC 4511).
pub const OID_STARTTLS: &str = "1.3.6.1.4.1.1466.20037";
/// Active Directory.
pub const OID_AD: &str = "1.2.840.113556.1.4.800";
/// Active Directory Lightweight Directory Services (ADAM).
pub const OID_AD_LDS: &str = "1.2.840.113556.1.4.1851";
/// Active Directory 2003 functional level.
pub const OID_AD_2003: &str = "1.2.840.113556.1.4.1670";
/// Active Directory 2008 functional level.
pub const OID_AD_2008: &str = "1.2.840.113556.1.4.1935";
/// Active Directory 2008 R2 functional level.
pub const OID_AD_2008_R2: &str = "1.2.840.113556.1.4.2080";
/// Active Directory 2012 functional level.
pub const OID_AD_2012: &str = "1.2.840.113556.1.4.2237";

const AD_LEVELS: &[(&str, &str)] = &[
    (OID_AD_2012, "2012"),
    (OID_AD_2008_R2, "2008 R2"),
    (OID_AD_2008, "2008"),
    (OID_AD_2003, "2003"),
];

/// What the connected server announced about itself.
///
/// Built once per connection. When discovery fails the default descriptor is
/// used, which announces nothing, so optional features stay disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    ldap_versions: Vec<u32>,
    controls: Vec<String>,
    extensions: Vec<String>,
    capabilities: Vec<String>,
    sasl_mechanisms: Vec<String>,
    naming_contexts: Vec<String>,
    default_naming_context: Option<String>,
    vendor_name: Option<String>,
    vendor_version: Option<String>,
    dns_host_name: Option<String>,
}

impl Capabilities {
    /// Builds a descriptor from the root DSE entry.
    #[must_use]
    pub fn from_root_dse(entry: &RawEntry) -> Self {
        let fields = FieldMap::from_names(
            ROOT_DSE_ATTRIBUTES
                .iter()
                .filter(|name| **name != "+")
                .copied(),
        );
        let row = normalize_attributes(entry, &fields);

        Self {
            ldap_versions: values(&row, "supportedLDAPVersion")
                .into_iter()
                .filter_map(|value| value.trim().parse().ok())
                .collect(),
            controls: values(&row, "supportedControl"),
            extensions: values(&row, "supportedExtension"),
            capabilities: values(&row, "supportedCapabilities"),
            sasl_mechanisms: values(&row, "supportedSaslMechanisms"),
            naming_contexts: values(&row, "namingContexts"),
            default_naming_context: single(&row, "defaultNamingContext"),
            vendor_name: single(&row, "vendorName"),
            vendor_version: single(&row, "vendorVersion"),
            dns_host_name: single(&row, "dnsHostName"),
        }
    }

    /// Returns true if LDAPv3 was announced.
    #[must_use]
    pub fn supports_v3(&self) -> bool {
        self.ldap_versions.contains(&3)
    }

    /// Returns true if LDAPv2 was announced.
    #[must_use]
    pub fn supports_v2(&self) -> bool {
        self.ldap_versions.contains(&2)
    }

    /// Returns true if the paged results control was announced.
    #[must_use]
    pub fn supports_paging(&self) -> bool {
        self.has_oid(OID_PAGED_RESULTS)
    }

    /// Returns true if the StartTLS extended operation was announced.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.has_oid(OID_STARTTLS)
    }

    /// Returns true if the server-side sort control was announced.
    #[must_use]
    pub fn supports_sort_control(&self) -> bool {
        self.has_oid(OID_SORT_REQUEST)
    }

    /// Returns true if `oid` appears among controls, extensions or capabilities.
    #[must_use]
    pub fn has_oid(&self, oid: &str) -> bool {
        [&self.controls, &self.extensions, &self.capabilities]
            .into_iter()
            .flatten()
            .any(|announced| announced.trim() == oid)
    }

    /// Returns true for Active Directory and AD LDS servers.
    #[must_use]
    pub fn is_active_directory(&self) -> bool {
        self.has_oid(OID_AD) || self.has_oid(OID_AD_LDS)
    }

    /// Highest announced Active Directory functional level, e.g. `"2008 R2"`.
    #[must_use]
    pub fn active_directory_version(&self) -> Option<&'static str> {
        if !self.is_active_directory() {
            return None;
        }
        AD_LEVELS
            .iter()
            .find(|(oid, _)| self.has_oid(oid))
            .map(|(_, level)| *level)
    }

    /// Announced LDAP protocol versions.
    #[must_use]
    pub fn ldap_versions(&self) -> &[u32] {
        &self.ldap_versions
    }

    /// Vendor name, if announced.
    #[must_use]
    pub fn vendor(&self) -> Option<&str> {
        self.vendor_name.as_deref()
    }

    /// Vendor version, if announced.
    #[must_use]
    pub fn vendor_version(&self) -> Option<&str> {
        self.vendor_version.as_deref()
    }

    /// DNS host name, if announced (Active Directory).
    #[must_use]
    pub fn dns_host_name(&self) -> Option<&str> {
        self.dns_host_name.as_deref()
    }

    /// Naming contexts held by the server.
    #[must_use]
    pub fn naming_contexts(&self) -> &[String] {
        &self.naming_contexts
    }

    /// Default naming context, falling back to the first naming context.
    #[must_use]
    pub fn default_naming_context(&self) -> Option<&str> {
        self.default_naming_context
            .as_deref()
            .or_else(|| self.naming_contexts.first().map(String::as_str))
    }

    /// Supported SASL mechanisms.
    #[must_use]
    pub fn sasl_mechanisms(&self) -> &[String] {
        &self.sasl_mechanisms
    }
}

fn values(row: &Row, key: &str) -> Vec<String> {
    row.get_ignore_case(key)
        .map(AttributeValue::values)
        .unwrap_or_default()
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn single(row: &Row, key: &str) -> Option<String> {
    row.get_ignore_case(key)
        .and_then(AttributeValue::first)
        .map(str::to_owned)
}
