//! Paged search (RFC 2696).
//!
//! ```text
//! realSearchControlValue ::= SEQUENCE {
//!     size    INTEGER (0..maxInt),
//!     cookie  OCTET STRING }
//! ```
//!
//! Controls are attached per request, so a finished loop leaves no paging
//! state on the handle. A loop that stops before the server runs out of pages
//! sends one more request with size 0 and the last cookie so the server can
//! release the result set.

use crate::asn1;
use crate::capabilities::OID_PAGED_RESULTS;
use crate::normalize::{normalize_attributes, ResultSet};
use crate::query::FieldMap;
use crate::transport::{LdapSession, RequestControl, ResponseControl, SearchRequest};
use crate::Result;
use directory_core::Error;
use ldap3::controls::{PagedResults, RawControl};
use tracing::{debug, warn};

/// Value of the paged results control.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PagedResultsControl {
    /// Requested page size, or the server's size estimate in responses.
    pub size: i32,
    /// Opaque continuation cookie; empty on the first and after the last page.
    pub cookie: Vec<u8>,
}

impl PagedResultsControl {
    /// Creates a control value.
    #[must_use]
    pub fn new(size: i32, cookie: Vec<u8>) -> Self {
        Self { size, cookie }
    }

    /// BER encodes the control value.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        RawControl::from(self.to_ldap3()).val.unwrap_or_default()
    }

    /// Decodes a control value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolError`] for malformed input.
    pub fn decode(value: &[u8]) -> Result<Self> {
        let mut items = asn1::decode(value)
            .and_then(asn1::sequence)
            .ok_or_else(malformed)?
            .into_iter();
        let size = items.next().and_then(asn1::integer).ok_or_else(malformed)?;
        let cookie = items.next().and_then(asn1::octet_string).ok_or_else(malformed)?;
        if items.next().is_some() {
            return Err(malformed());
        }
        Ok(Self { size, cookie })
    }

    fn to_ldap3(&self) -> PagedResults {
        PagedResults {
            size: self.size,
            cookie: self.cookie.clone(),
        }
    }

    /// Wraps the value in a non-critical request control.
    #[must_use]
    pub fn into_request_control(self) -> RequestControl {
        RawControl::from(self.to_ldap3()).into()
    }

    /// Finds and decodes the paged results control among response controls.
    ///
    /// `None` if the server did not return one.
    #[must_use]
    pub fn from_response(controls: &[ResponseControl]) -> Option<Result<Self>> {
        let control = controls.iter().find(|control| control.oid == OID_PAGED_RESULTS)?;
        Some(match &control.value {
            Some(value) => Self::decode(value),
            None => Err(Error::protocol("paged results control without a value")),
        })
    }
}

fn malformed() -> Error {
    Error::protocol("malformed paged results control value")
}

/// One paged search: a request repeated with continuation cookies.
#[derive(Debug, Clone)]
pub struct PagedSearch<'a> {
    request: SearchRequest,
    page_size: i32,
    fields: &'a FieldMap,
    stop_after: Option<usize>,
}

impl<'a> PagedSearch<'a> {
    /// Creates a paged search normalizing entries with `fields`.
    #[must_use]
    pub fn new(request: SearchRequest, page_size: u32, fields: &'a FieldMap) -> Self {
        Self {
            request,
            page_size: i32::try_from(page_size.max(1)).unwrap_or(i32::MAX),
            fields,
            stop_after: None,
        }
    }

    /// Stops requesting pages once `rows` rows were collected.
    #[must_use]
    pub fn stop_after(mut self, rows: Option<usize>) -> Self {
        self.stop_after = rows.filter(|rows| *rows > 0);
        self
    }

    fn page_request(&self, size: i32, cookie: &[u8]) -> SearchRequest {
        let mut request = self.request.clone();
        request
            .controls
            .push(PagedResultsControl::new(size, cookie.to_vec()).into_request_control());
        request
    }

    /// Runs the page loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolError`] when a page fails with anything other
    /// than `noSuchObject`, or the transport error of a failed request.
    pub async fn execute(&self, session: &mut dyn LdapSession) -> Result<ResultSet> {
        let mut rows = ResultSet::new();
        let mut cookie: Vec<u8> = Vec::new();
        let mut pages = 0usize;

        loop {
            let request = self.page_request(self.page_size, &cookie);
            let response = match session.search(&request).await {
                Ok(response) => response,
                Err(err) => {
                    self.abandon(session, &cookie).await;
                    return Err(err);
                }
            };
            pages += 1;

            if response.result.is_no_such_object() {
                debug!(base = %self.request.base, "paged search base does not exist");
                cookie.clear();
                break;
            }
            if !response.result.returns_entries() {
                self.abandon(session, &cookie).await;
                return Err(Error::ProtocolError {
                    code: response.result.code,
                    message: format!(
                        "paged search of `{}` with filter `{}` failed: {}",
                        self.request.base, self.request.filter, response.result.message
                    ),
                });
            }

            let next = match PagedResultsControl::from_response(&response.controls) {
                Some(Ok(control)) => Some(control.cookie),
                Some(Err(err)) => {
                    warn!(error = %err, "undecodable paged results response control");
                    None
                }
                None => {
                    debug!(page = pages, "server returned no paged results control");
                    None
                }
            };

            if response.entries.is_empty() {
                if response.result.is_limit_exceeded() {
                    warn!(
                        code = response.result.code,
                        message = %response.result.message,
                        "paged search stopped by a server limit"
                    );
                } else {
                    debug!(page = pages, "paged search returned an empty page");
                }
                cookie = next.unwrap_or_default();
                break;
            }

            for entry in &response.entries {
                rows.insert(entry.dn.clone(), normalize_attributes(entry, self.fields));
            }

            cookie = next.unwrap_or_default();
            if cookie.is_empty() {
                break;
            }
            if self.stop_after.is_some_and(|stop| rows.len() >= stop) {
                debug!(rows = rows.len(), "enough rows collected, stopping paged search");
                break;
            }
        }

        self.abandon(session, &cookie).await;
        debug!(pages, rows = rows.len(), "paged search finished");
        Ok(rows)
    }

    async fn abandon(&self, session: &mut dyn LdapSession, cookie: &[u8]) {
        if cookie.is_empty() {
            return;
        }
        let request = self.page_request(0, cookie);
        match session.search(&request).await {
            Ok(response) if !response.result.returns_entries() => {
                debug!(code = response.result.code, "server rejected paged search abandon");
            }
            Ok(_) => {}
            Err(err) => debug!(error = %err, "paged search abandon failed"),
        }
    }
}
