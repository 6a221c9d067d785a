//! LDAP v3 directory client.
//!
//! A [`Connection`] opens its handle lazily, discovers what the server
//! supports, binds the configured credentials once and then runs [`Query`]
//! values as paged or unpaged searches. Results come back as a [`ResultSet`]
//! of normalized [`Row`]s keyed by DN. Entries can be added, modified, moved
//! and deleted, including whole subtrees.
//!
//! ```no_run
//! use directory_core::DirectoryConfig;
//! use directory_ldap::{Connection, SortDirection};
//!
//! # async fn run() -> directory_ldap::Result<()> {
//! let config = DirectoryConfig::new("ldap.example.com", "dc=example,dc=com")?
//!     .with_credentials("cn=reader,dc=example,dc=com", "secret");
//! let mut connection = Connection::new(config);
//!
//! let query = connection
//!     .select()
//!     .object_class("person")
//!     .column("uid")
//!     .column_as("cn", "name")
//!     .order_by("name", SortDirection::Ascending)
//!     .limit(20, 0);
//! for (dn, row) in connection.fetch_all(&query, None).await? {
//!     println!("{dn}: {:?}", row.get("name"));
//! }
//! connection.close().await
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod asn1;
mod capabilities;
mod connection;
mod dn;
mod normalize;
mod paging;
mod query;
mod sort_control;
mod transport;

pub use capabilities::{
    Capabilities, OID_AD, OID_AD_2003, OID_AD_2008, OID_AD_2008_R2, OID_AD_2012, OID_AD_LDS,
    OID_PAGED_RESULTS, OID_SORT_REQUEST, OID_SORT_RESPONSE, OID_STARTTLS, ROOT_DSE_ATTRIBUTES,
};
pub use connection::Connection;
pub use dn::{DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use normalize::{normalize_attributes, AttributeValue, RawEntry, ResultSet, Row};
pub use paging::{PagedResultsControl, PagedSearch};
pub use query::{
    escape_filter_value, FieldMap, Filter, Query, SearchScope, SortDirection, SortRule,
};
pub use sort_control::{decode_sort_rules, encode_sort_rules, sort_request_control, MAX_SORT_RULES};
pub use transport::{
    DirectoryModification, LdapConnector, LdapSession, OperationResult, RealLdapConnector,
    RequestControl, ResponseControl, SearchRequest, SearchResponse, TransportSettings,
};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = directory_core::Result<T>;
