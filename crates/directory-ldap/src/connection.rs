//! Directory connection: lifecycle, discovery, bind, queries and mutations.

use crate::capabilities::{Capabilities, ROOT_DSE_ATTRIBUTES};
use crate::dn::DistinguishedName;
use crate::normalize::{normalize_attributes, AttributeValue, ResultSet, Row};
use crate::paging::PagedSearch;
use crate::query::{compare_rows, FieldMap, Query, SearchScope, SortRule};
use crate::sort_control::sort_request_control;
use crate::transport::{
    DirectoryModification, LdapConnector, LdapSession, RealLdapConnector, SearchRequest,
    TransportSettings,
};
use crate::Result;
use directory_core::error::RESULT_NO_SUCH_OBJECT;
use directory_core::{DirectoryConfig, EncryptionMode, Error};
use std::mem;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attribute list that asks the server for no attributes at all (RFC 4511).
const NO_ATTRIBUTES: &str = "1.1";

/// An open handle with everything learned while opening it.
struct Established {
    session: Box<dyn LdapSession>,
    capabilities: Capabilities,
    discovery_succeeded: bool,
    transport: TransportSettings,
}

enum SessionState {
    Unconnected,
    Ready(Box<Established>),
    Bound(Box<Established>),
}

/// A connection to one directory server.
///
/// The handle is opened lazily by the first operation that needs it, and the
/// configured credentials are bound at most once per handle. Every operation
/// takes `&mut self`, so requests on one connection never overlap.
pub struct Connection {
    config: Arc<DirectoryConfig>,
    connector: Box<dyn LdapConnector>,
    state: SessionState,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            SessionState::Unconnected => "unconnected",
            SessionState::Ready(_) => "ready",
            SessionState::Bound(_) => "bound",
        };
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a connection that uses the `ldap3` transport.
    #[must_use]
    pub fn new(config: DirectoryConfig) -> Self {
        Self::with_connector(config, Box::new(RealLdapConnector::new()))
    }

    /// Creates a connection over a custom transport.
    #[must_use]
    pub fn with_connector(config: DirectoryConfig, connector: Box<dyn LdapConnector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            state: SessionState::Unconnected,
        }
    }

    /// Configuration this connection was created with.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Capabilities of the connected server; `None` before [`Connection::connect`].
    #[must_use]
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.established().map(|established| &established.capabilities)
    }

    /// Returns true if the root DSE could be read on the current handle.
    #[must_use]
    pub fn discovery_succeeded(&self) -> bool {
        self.established()
            .is_some_and(|established| established.discovery_succeeded)
    }

    /// Returns true once a handle is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.established().is_some()
    }

    /// Returns true once the configured credentials were bound.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        matches!(self.state, SessionState::Bound(_))
    }

    fn established(&self) -> Option<&Established> {
        match &self.state {
            SessionState::Unconnected => None,
            SessionState::Ready(established) | SessionState::Bound(established) => {
                Some(&**established)
            }
        }
    }

    /// Opens the handle, negotiates encryption and discovers capabilities.
    ///
    /// Does nothing if a handle is already open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionError`] if the server is unreachable or a
    /// required StartTLS upgrade is impossible, and [`Error::ConfigError`] for
    /// unusable TLS material.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let established = self.establish().await?;
        self.state = SessionState::Ready(Box::new(established));
        Ok(())
    }

    async fn establish(&self) -> Result<Established> {
        let mut transport = TransportSettings::from_config(&self.config)?;
        let mut session = self.open(&transport).await?;
        let (capabilities, discovery_succeeded) = discover(&mut *session).await;

        if self.config.encryption == EncryptionMode::StartTls {
            if capabilities.supports_starttls() {
                release(session).await;
                transport = transport.with_starttls(true);
                session = self.connector.connect(&transport).await.map_err(|err| {
                    Error::ConnectionError(format!(
                        "StartTLS negotiation with {} failed: {err}",
                        transport.url
                    ))
                })?;
                debug!(url = %transport.url, "connection upgraded with StartTLS");
            } else if self.config.force_starttls {
                release(session).await;
                return Err(Error::ConnectionError(format!(
                    "{} does not announce StartTLS and StartTLS is required",
                    transport.url
                )));
            } else {
                warn!(
                    url = %transport.url,
                    "server does not announce StartTLS, continuing without encryption"
                );
            }
        }

        if !capabilities.supports_v3() {
            warn!(
                url = %transport.url,
                versions = ?capabilities.ldap_versions(),
                "server does not announce LDAPv3, using it anyway"
            );
        }

        info!(
            url = %transport.url,
            encrypted = transport.is_encrypted(),
            vendor = capabilities.vendor().unwrap_or("unknown"),
            paging = capabilities.supports_paging(),
            active_directory = capabilities.is_active_directory(),
            "connected to directory server"
        );

        Ok(Established {
            session,
            capabilities,
            discovery_succeeded,
            transport,
        })
    }

    async fn open(&self, transport: &TransportSettings) -> Result<Box<dyn LdapSession>> {
        self.connector
            .connect(transport)
            .await
            .map_err(|err| match err {
                Error::ConnectionError(_) | Error::ConfigError(_) => err,
                other => Error::ConnectionError(format!(
                    "could not connect to {}: {other}",
                    transport.url
                )),
            })
    }

    /// Binds the configured credentials, connecting first if needed.
    ///
    /// Does nothing if the handle is already bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BindError`] with the server diagnostic when the bind is
    /// rejected, or the error of [`Connection::connect`].
    pub async fn bind(&mut self) -> Result<()> {
        self.connect().await?;
        match mem::replace(&mut self.state, SessionState::Unconnected) {
            SessionState::Ready(mut established) => {
                let outcome = bind_configured(&mut *established.session, &self.config).await;
                self.state = if outcome.is_ok() {
                    SessionState::Bound(established)
                } else {
                    SessionState::Ready(established)
                };
                outcome
            }
            state => {
                self.state = state;
                Ok(())
            }
        }
    }

    async fn bound(&mut self) -> Result<&mut Established> {
        self.bind().await?;
        match &mut self.state {
            SessionState::Bound(established) => Ok(&mut **established),
            _ => Err(Error::ConnectionError(
                "directory connection is not bound".to_string(),
            )),
        }
    }

    /// Checks whether `dn` and `password` are valid credentials.
    ///
    /// The check binds on a separate handle opened with the same transport
    /// settings, so this connection's own bind is unaffected.
    ///
    /// # Errors
    ///
    /// Returns `Ok(false)` only for invalid credentials; every other failure,
    /// including an unreachable server, is [`Error::ProtocolError`].
    pub async fn test_credentials(&mut self, dn: &str, password: &str) -> Result<bool> {
        self.connect()
            .await
            .map_err(|err| Error::protocol(format!("credential check failed: {err}")))?;
        let transport = self
            .established()
            .map(|established| established.transport.clone())
            .ok_or_else(|| Error::protocol("credential check failed: not connected"))?;

        let mut session = self
            .connector
            .connect(&transport)
            .await
            .map_err(|err| Error::protocol(format!("credential check failed: {err}")))?;
        let outcome = session.simple_bind(dn, password).await;
        release(session).await;

        let result = outcome.map_err(|err| {
            Error::protocol(format!("credential check for `{dn}` failed: {err}"))
        })?;
        if result.is_success() {
            return Ok(true);
        }
        if result.is_invalid_credentials() {
            debug!(dn, "credential check rejected");
            return Ok(false);
        }
        Err(Error::ProtocolError {
            code: result.code,
            message: format!("credential check for `{dn}` failed: {}", result.message),
        })
    }

    /// Starts a new query.
    #[must_use]
    pub fn select(&self) -> Query {
        Query::new()
    }

    /// Runs `query` and returns its rows keyed by DN.
    ///
    /// `fields` overrides the query's projection; an empty override requests
    /// no attributes at all. Rows come back in server order unless the query is
    /// ordered, and limit and offset are applied last. Sort attributes outside
    /// the projection are fetched for sorting and left out of the rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolError`] if the search fails for any reason other
    /// than a missing base, [`Error::UsageError`] for unencodable sort rules,
    /// or the errors of [`Connection::bind`].
    pub async fn fetch_all(
        &mut self,
        query: &Query,
        fields: Option<&FieldMap>,
    ) -> Result<ResultSet> {
        let config = Arc::clone(&self.config);
        let (fields, no_attributes) = match fields {
            Some(fields) => (fields.clone(), fields.is_empty()),
            None => (query.fields().clone(), false),
        };
        let order = sort_rules(query, &fields);

        let established = self.bound().await?;
        let capabilities = &established.capabilities;
        let server_sort =
            config.server_side_sort && query.has_order() && capabilities.supports_sort_control();

        let mut search_fields = fields.clone();
        let mut sort_only: Vec<String> = Vec::new();
        // an empty projection without override already returns every attribute
        if query.has_order() && !server_sort && (no_attributes || !fields.is_empty()) {
            for rule in &order {
                if search_fields.alias_for(&rule.attribute).is_none() {
                    search_fields.insert(rule.attribute.clone(), None::<String>);
                    sort_only.push(rule.attribute.clone());
                }
            }
        }
        let attributes = if no_attributes && search_fields.is_empty() {
            vec![NO_ATTRIBUTES.to_string()]
        } else {
            search_fields.names()
        };

        let mut request = SearchRequest::new(
            query.base_dn().unwrap_or(config.root_dn()),
            query.search_scope(),
            query.filter_string(),
        )
        .with_attributes(attributes);
        if server_sort {
            request.controls.push(sort_request_control(&order)?);
        }
        let wanted = query.has_limit().then(|| query.offset() + query.limit_count());

        let rows = if query.uses_paged_results() && capabilities.supports_paging() {
            let page_size = query.page_size_override().unwrap_or(config.page_size);
            // with a client-side sort every matching row is needed
            let stop_after = wanted.filter(|_| server_sort || !query.has_order());
            PagedSearch::new(request, page_size, &search_fields)
                .stop_after(stop_after)
                .execute(&mut *established.session)
                .await?
        } else {
            if server_sort {
                if let Some(wanted) = wanted {
                    request.size_limit = i32::try_from(wanted).unwrap_or(i32::MAX);
                }
            }
            search_unpaged(&mut *established.session, &request, &search_fields).await?
        };

        let client_order: Vec<SortRule> = if server_sort {
            Vec::new()
        } else {
            order
                .iter()
                .map(|rule| {
                    let key = search_fields
                        .alias_for(&rule.attribute)
                        .unwrap_or(&rule.attribute);
                    SortRule::new(key, rule.direction)
                })
                .collect()
        };
        Ok(finish(query, rows, &client_order, &sort_only))
    }

    /// Runs `query` without paging and returns its first row.
    ///
    /// # Errors
    ///
    /// See [`Connection::fetch_all`].
    pub async fn fetch_row(&mut self, query: &Query) -> Result<Option<Row>> {
        let query = query.clone().limit(1, query.offset()).paged(false);
        let rows = self.fetch_all(&query, None).await?;
        Ok(rows.into_iter().next().map(|(_, row)| row))
    }

    /// Returns the first field of the first row, or `None` if absent.
    ///
    /// # Errors
    ///
    /// See [`Connection::fetch_all`].
    pub async fn fetch_one(&mut self, query: &Query) -> Result<Option<AttributeValue>> {
        Ok(self
            .fetch_row(query)
            .await?
            .and_then(|row| row.first().cloned())
            .filter(|value| !value.is_null()))
    }

    /// Returns the non-null values of the first field, in row order.
    ///
    /// Fields come from `fields` when given, otherwise from the query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UsageError`] if no field is requested, otherwise see
    /// [`Connection::fetch_all`].
    pub async fn fetch_column(
        &mut self,
        query: &Query,
        fields: Option<&FieldMap>,
    ) -> Result<Vec<AttributeValue>> {
        let fields = fields.unwrap_or(query.fields());
        if fields.is_empty() {
            return Err(Error::UsageError(
                "fetch_column needs at least one requested field".to_string(),
            ));
        }
        let fields = fields.take(1);
        let rows = self.fetch_all(query, Some(&fields)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(_, row)| row.first().cloned())
            .filter(|value| !value.is_null())
            .collect())
    }

    /// Maps the first field to the second, keyed by the first value of the
    /// first field. Rows without a key are skipped; a repeated key keeps its
    /// first position and the last value.
    ///
    /// Fields come from `fields` when given, otherwise from the query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UsageError`] if fewer than two fields are requested,
    /// otherwise see [`Connection::fetch_all`].
    pub async fn fetch_pairs(
        &mut self,
        query: &Query,
        fields: Option<&FieldMap>,
    ) -> Result<Vec<(String, AttributeValue)>> {
        let fields = fields.unwrap_or(query.fields());
        if fields.len() < 2 {
            return Err(Error::UsageError(
                "fetch_pairs needs at least two requested fields".to_string(),
            ));
        }
        let fields = fields.take(2);
        let rows = self.fetch_all(query, Some(&fields)).await?;

        let mut pairs: Vec<(String, AttributeValue)> = Vec::with_capacity(rows.len());
        for (_, row) in rows {
            let mut values = row.iter().map(|(_, value)| value);
            let (Some(key), Some(value)) = (values.next(), values.next()) else {
                continue;
            };
            let Some(key) = key.first() else {
                continue;
            };
            match pairs.iter_mut().find(|(existing, _)| existing == key) {
                Some(pair) => pair.1 = value.clone(),
                None => pairs.push((key.to_string(), value.clone())),
            }
        }
        Ok(pairs)
    }

    /// Counts the entries matching `query`, ignoring its limit and offset.
    ///
    /// # Errors
    ///
    /// See [`Connection::fetch_all`].
    pub async fn count(&mut self, query: &Query) -> Result<usize> {
        let config = Arc::clone(&self.config);
        let request = SearchRequest::new(
            query.base_dn().unwrap_or(config.root_dn()),
            query.search_scope(),
            query.filter_string(),
        )
        .with_attributes([NO_ATTRIBUTES]);

        let established = self.bound().await?;
        let rows = search_unpaged(&mut *established.session, &request, &FieldMap::new()).await?;
        Ok(rows.len())
    }

    /// Returns the DN of the single entry matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolError`] if more than one entry matches,
    /// otherwise see [`Connection::fetch_all`].
    pub async fn fetch_dn(&mut self, query: &Query) -> Result<Option<String>> {
        let query = query.clone().limit(0, 0);
        let rows = self.fetch_all(&query, Some(&FieldMap::new())).await?;
        if rows.len() > 1 {
            return Err(Error::protocol(format!(
                "expected at most one entry for filter `{}`, found {}",
                query.filter_string(),
                rows.len()
            )));
        }
        Ok(rows.into_iter().next().map(|(dn, _)| dn))
    }

    /// Returns true if an entry exists at `dn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDn`] for a malformed name and
    /// [`Error::ProtocolError`] if the read fails for another reason than a
    /// missing entry.
    pub async fn has_dn(&mut self, dn: &str) -> Result<bool> {
        let dn = DistinguishedName::parse(dn)?;
        let request = SearchRequest::new(dn.as_str(), SearchScope::Base, "(objectClass=*)")
            .with_attributes(["objectClass"]);
        let established = self.bound().await?;
        let response = established.session.search(&request).await?;
        if response.result.is_no_such_object() {
            return Ok(false);
        }
        response
            .result
            .into_result(&format!("read of `{dn}`"))
            .map(|()| !response.entries.is_empty())
    }

    /// Adds an entry. Attributes without values are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDn`] for a malformed name and
    /// [`Error::ProtocolError`] if the server rejects the entry.
    pub async fn add_entry(&mut self, dn: &str, attributes: &[(String, Vec<String>)]) -> Result<()> {
        let dn = DistinguishedName::parse(dn)?;
        let attributes: Vec<(String, Vec<String>)> = attributes
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .cloned()
            .collect();
        let established = self.bound().await?;
        established
            .session
            .add(dn.as_str(), &attributes)
            .await?
            .into_result(&format!("add of `{dn}`"))?;
        debug!(dn = %dn, "entry added");
        Ok(())
    }

    /// Replaces the values of each given attribute; an empty value list removes
    /// the attribute.
    ///
    /// # Errors
    ///
    /// See [`Connection::apply_modifications`].
    pub async fn modify_entry(
        &mut self,
        dn: &str,
        attributes: &[(String, Vec<String>)],
    ) -> Result<()> {
        let modifications: Vec<DirectoryModification> = attributes
            .iter()
            .map(|(attribute, values)| DirectoryModification::Replace {
                attribute: attribute.clone(),
                values: values.clone(),
            })
            .collect();
        self.apply_modifications(dn, &modifications).await
    }

    /// Applies value-level modifications to an entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDn`] for a malformed name and
    /// [`Error::ProtocolError`] if the server rejects the change.
    pub async fn apply_modifications(
        &mut self,
        dn: &str,
        modifications: &[DirectoryModification],
    ) -> Result<()> {
        let dn = DistinguishedName::parse(dn)?;
        if modifications.is_empty() {
            return Ok(());
        }
        let established = self.bound().await?;
        established
            .session
            .modify(dn.as_str(), modifications)
            .await?
            .into_result(&format!("modify of `{dn}`"))?;
        debug!(dn = %dn, changes = modifications.len(), "entry modified");
        Ok(())
    }

    /// Renames `dn` to `new_rdn` below `new_parent`, dropping the old RDN
    /// value. Returns the new name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UsageError`] if `new_rdn` is not a single RDN or the
    /// target lies below `dn`, [`Error::InvalidDn`] for malformed names and
    /// [`Error::ProtocolError`] if the server rejects the move.
    pub async fn move_entry(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: &str,
    ) -> Result<DistinguishedName> {
        let current = DistinguishedName::parse(dn)?;
        let rdn = DistinguishedName::parse(new_rdn)?;
        if rdn.depth() != 1 {
            return Err(Error::UsageError(format!(
                "`{new_rdn}` is not a single relative distinguished name"
            )));
        }
        let parent = DistinguishedName::parse(new_parent)?;
        let target = rdn.join(&parent);
        if target.matches(&current) {
            return Ok(target);
        }
        if target.is_descendant_of(&current) {
            return Err(Error::UsageError(format!(
                "cannot move `{current}` below itself to `{target}`"
            )));
        }

        let established = self.bound().await?;
        established
            .session
            .rename(current.as_str(), &target.rdn(), parent.as_str())
            .await?
            .into_result(&format!("move of `{current}` to `{target}`"))?;
        debug!(from = %current, to = %target, "entry moved");
        Ok(target)
    }

    /// Moves `dn` to the full name `new_dn`; see [`Connection::move_entry`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UsageError`] if `new_dn` has no parent, otherwise see
    /// [`Connection::move_entry`].
    pub async fn move_to(&mut self, dn: &str, new_dn: &str) -> Result<DistinguishedName> {
        let target = DistinguishedName::parse(new_dn)?;
        let parent = target.parent().ok_or_else(|| {
            Error::UsageError(format!("target `{target}` has no parent entry"))
        })?;
        self.move_entry(dn, &target.rdn(), parent.as_str()).await
    }

    /// Deletes a leaf entry. Returns `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDn`] for a malformed name and
    /// [`Error::ProtocolError`] for any other failure, e.g. when the entry
    /// still has children.
    pub async fn delete_dn(&mut self, dn: &str) -> Result<bool> {
        let dn = DistinguishedName::parse(dn)?;
        self.delete_parsed(dn.as_str()).await
    }

    async fn delete_parsed(&mut self, dn: &str) -> Result<bool> {
        let established = self.bound().await?;
        let result = established.session.delete(dn).await?;
        if result.is_no_such_object() {
            return Ok(false);
        }
        result.into_result(&format!("delete of `{dn}`"))?;
        debug!(dn, "entry deleted");
        Ok(true)
    }

    /// Deletes an entry and everything below it, children first.
    ///
    /// Stops at the first failure; entries deleted before it stay deleted and
    /// the entry itself is kept. Returns `false` if `dn` does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDn`] for a malformed name and
    /// [`Error::ProtocolError`] if listing or deleting any entry fails,
    /// including a child that no longer exists when its turn comes.
    pub async fn delete_recursively(&mut self, dn: &str) -> Result<bool> {
        let root = DistinguishedName::parse(dn)?;
        let mut pending: Vec<(String, bool)> = vec![(root.as_str().to_string(), false)];
        let mut deleted = 0usize;

        while let Some((current, expanded)) = pending.pop() {
            if !expanded {
                let children = self.child_dns(&current).await?;
                pending.push((current, true));
                pending.extend(children.into_iter().map(|child| (child, false)));
                continue;
            }

            let is_root = pending.is_empty();
            if self.delete_parsed(&current).await? {
                deleted += 1;
            } else if is_root {
                return Ok(false);
            } else {
                return Err(Error::ProtocolError {
                    code: RESULT_NO_SUCH_OBJECT,
                    message: format!(
                        "recursive delete of `{root}` failed: `{current}` could not be deleted"
                    ),
                });
            }
        }

        info!(dn = %root, deleted, "subtree deleted");
        Ok(true)
    }

    async fn child_dns(&mut self, dn: &str) -> Result<Vec<String>> {
        let query = self.select().base(dn).scope(SearchScope::OneLevel);
        let rows = self.fetch_all(&query, Some(&FieldMap::new())).await?;
        Ok(rows.into_iter().map(|(child, _)| child).collect())
    }

    /// Unbinds and releases the handle. The next operation reconnects.
    ///
    /// # Errors
    ///
    /// Returns the transport error of the unbind; the handle is released
    /// regardless.
    pub async fn close(&mut self) -> Result<()> {
        match mem::replace(&mut self.state, SessionState::Unconnected) {
            SessionState::Unconnected => Ok(()),
            SessionState::Ready(mut established) | SessionState::Bound(mut established) => {
                debug!(url = %established.transport.url, "closing directory connection");
                established.session.unbind().await
            }
        }
    }
}

/// Sort rules by attribute name: aliases of `fields` first, then the query's.
fn sort_rules(query: &Query, fields: &FieldMap) -> Vec<SortRule> {
    query
        .order()
        .iter()
        .map(|rule| {
            let attribute = fields
                .iter()
                .find(|(_, alias)| alias.eq_ignore_ascii_case(&rule.attribute))
                .map_or_else(|| query.sort_attribute(rule), |(name, _)| name);
            SortRule::new(attribute, rule.direction)
        })
        .collect()
}

fn finish(
    query: &Query,
    mut rows: ResultSet,
    client_order: &[SortRule],
    sort_only: &[String],
) -> ResultSet {
    if !client_order.is_empty() {
        rows.sort_by(|left, right| compare_rows(client_order, left, right));
    }
    rows.slice(query.offset(), query.limit_count());
    if !sort_only.is_empty() {
        for row in rows.rows_mut() {
            for key in sort_only {
                row.remove(key);
            }
        }
    }
    rows
}

async fn search_unpaged(
    session: &mut dyn LdapSession,
    request: &SearchRequest,
    fields: &FieldMap,
) -> Result<ResultSet> {
    let response = session.search(request).await?;
    if response.result.is_no_such_object() {
        debug!(base = %request.base, "search base does not exist");
        return Ok(ResultSet::new());
    }
    if !response.result.returns_entries() {
        return Err(Error::ProtocolError {
            code: response.result.code,
            message: format!(
                "search of `{}` with filter `{}` failed: {}",
                request.base, request.filter, response.result.message
            ),
        });
    }
    if response.result.is_limit_exceeded() {
        warn!(
            code = response.result.code,
            entries = response.entries.len(),
            "search truncated by a server limit"
        );
    }

    let mut rows = ResultSet::new();
    for entry in &response.entries {
        rows.insert(entry.dn.clone(), normalize_attributes(entry, fields));
    }
    Ok(rows)
}

async fn discover(session: &mut dyn LdapSession) -> (Capabilities, bool) {
    let request = SearchRequest::new("", SearchScope::Base, "(objectClass=*)")
        .with_attributes(ROOT_DSE_ATTRIBUTES.iter().copied());
    match session.search(&request).await {
        Ok(response) if response.result.is_success() => match response.entries.first() {
            Some(entry) => (Capabilities::from_root_dse(entry), true),
            None => {
                warn!("root DSE search returned no entry, assuming no optional capabilities");
                (Capabilities::default(), false)
            }
        },
        Ok(response) => {
            warn!(
                code = response.result.code,
                message = %response.result.message,
                "root DSE search failed, assuming no optional capabilities"
            );
            (Capabilities::default(), false)
        }
        Err(err) => {
            warn!(error = %err, "root DSE search failed, assuming no optional capabilities");
            (Capabilities::default(), false)
        }
    }
}

async fn bind_configured(session: &mut dyn LdapSession, config: &DirectoryConfig) -> Result<()> {
    let dn = config.bind_dn();
    let result = session
        .simple_bind(dn, config.bind_password())
        .await
        .map_err(|err| Error::BindError(format!("bind as `{dn}` failed: {err}")))?;
    if !result.is_success() {
        return Err(Error::BindError(format!(
            "bind as `{dn}` rejected (code {}): {}",
            result.code, result.message
        )));
    }
    debug!(dn, "bound to directory server");
    Ok(())
}

async fn release(mut session: Box<dyn LdapSession>) {
    if let Err(err) = session.unbind().await {
        debug!(error = %err, "unbind failed while releasing a handle");
    }
}
