//! End-to-end behaviour of `Connection` against an in-memory directory.

use async_trait::async_trait;
use directory_core::{DirectoryConfig, Error};
use directory_ldap::{
    AttributeValue, Connection, DirectoryModification, DistinguishedName, FieldMap, LdapConnector,
    LdapSession, OperationResult, PagedResultsControl, RawEntry, ResponseControl, SearchRequest,
    SearchResponse, SearchScope, SortDirection, TransportSettings, OID_PAGED_RESULTS,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

const ROOT: &str = "dc=example,dc=com";
const PEOPLE: &str = "ou=people,dc=example,dc=com";
const PAGE: u32 = 3;

#[derive(Default)]
struct DirectoryState {
    entries: BTreeMap<String, RawEntry>,
    cursors: HashMap<Vec<u8>, Vec<String>>,
    next_cursor: usize,
    /// `(size, cookie)` of every paged request, in order.
    paged_requests: Vec<(i32, Vec<u8>)>,
    deleted: Vec<String>,
    refuse_delete: HashSet<String>,
    /// Entries removed by someone else just before this client deletes them.
    vanish_on_delete: HashSet<String>,
}

fn key(dn: &str) -> String {
    DistinguishedName::parse(dn)
        .map(|dn| dn.as_str().to_ascii_lowercase())
        .unwrap_or_else(|_| dn.to_ascii_lowercase())
}

impl DirectoryState {
    fn insert(&mut self, entry: RawEntry) {
        self.entries.insert(key(&entry.dn), entry);
    }

    fn in_scope(&self, base: &DistinguishedName, scope: SearchScope) -> Vec<RawEntry> {
        self.entries
            .values()
            .filter(|entry| {
                let Ok(dn) = DistinguishedName::parse(&entry.dn) else {
                    return false;
                };
                match scope {
                    SearchScope::Base => dn.matches(base),
                    SearchScope::OneLevel => dn.parent().is_some_and(|parent| parent.matches(base)),
                    SearchScope::Subtree => dn.matches(base) || dn.is_descendant_of(base),
                }
            })
            .cloned()
            .collect()
    }

    fn has_children(&self, dn: &str) -> bool {
        DistinguishedName::parse(dn)
            .map(|dn| !self.in_scope(&dn, SearchScope::OneLevel).is_empty())
            .unwrap_or(false)
    }
}

fn matches_filter(entry: &RawEntry, filter: &str) -> bool {
    let inner = filter.trim_start_matches('(').trim_end_matches(')');
    let Some((attribute, value)) = inner.split_once('=') else {
        return false;
    };
    let Some(values) = entry.values(attribute) else {
        return false;
    };
    value == "*" || values.iter().any(|candidate| candidate.eq_ignore_ascii_case(value))
}

fn project(entry: &RawEntry, attributes: &[String]) -> RawEntry {
    if attributes.is_empty() {
        return entry.clone();
    }
    let mut projected = RawEntry::new(entry.dn.clone());
    for (name, values) in &entry.attributes {
        if attributes.iter().any(|wanted| wanted.eq_ignore_ascii_case(name)) {
            projected = projected.with_attribute(name.clone(), values.clone());
        }
    }
    projected
}

fn code(code: u32) -> OperationResult {
    OperationResult::with_code(code, "")
}

#[derive(Clone)]
struct InMemoryConnector {
    state: Arc<Mutex<DirectoryState>>,
    paging: bool,
}

#[async_trait]
impl LdapConnector for InMemoryConnector {
    async fn connect(&self, _settings: &TransportSettings) -> directory_ldap::Result<Box<dyn LdapSession>> {
        Ok(Box::new(InMemorySession {
            state: Arc::clone(&self.state),
            paging: self.paging,
        }))
    }
}

struct InMemorySession {
    state: Arc<Mutex<DirectoryState>>,
    paging: bool,
}

impl InMemorySession {
    fn root_dse(&self) -> SearchResponse {
        let mut entry = RawEntry::new("")
            .with_attribute("supportedLDAPVersion", ["3"])
            .with_attribute("namingContexts", [ROOT]);
        if self.paging {
            entry = entry.with_attribute("supportedControl", [OID_PAGED_RESULTS]);
        }
        SearchResponse {
            entries: vec![entry],
            ..SearchResponse::default()
        }
    }
}

#[async_trait]
impl LdapSession for InMemorySession {
    async fn simple_bind(&mut self, _dn: &str, _password: &str) -> directory_ldap::Result<OperationResult> {
        Ok(OperationResult::success())
    }

    async fn search(&mut self, request: &SearchRequest) -> directory_ldap::Result<SearchResponse> {
        if request.base.is_empty() {
            return Ok(self.root_dse());
        }
        let mut state = self.state.lock().unwrap();
        let base = DistinguishedName::parse(&request.base)?;
        if !state.entries.contains_key(&key(&request.base)) {
            return Ok(SearchResponse {
                result: code(32),
                ..SearchResponse::default()
            });
        }

        let matching: Vec<RawEntry> = state
            .in_scope(&base, request.scope)
            .into_iter()
            .filter(|entry| matches_filter(entry, &request.filter))
            .map(|entry| project(&entry, &request.attributes))
            .collect();

        let paged = request
            .controls
            .iter()
            .find(|control| control.oid == OID_PAGED_RESULTS)
            .map(|control| PagedResultsControl::decode(control.value.as_deref().unwrap_or_default()))
            .transpose()?;
        let Some(paged) = paged else {
            return Ok(SearchResponse {
                entries: matching,
                ..SearchResponse::default()
            });
        };
        state.paged_requests.push((paged.size, paged.cookie.clone()));

        let mut remaining: Vec<String> = if paged.cookie.is_empty() {
            matching.iter().map(|entry| entry.dn.clone()).collect()
        } else {
            match state.cursors.remove(&paged.cookie) {
                Some(remaining) => remaining,
                None => {
                    return Ok(SearchResponse {
                        result: OperationResult::with_code(53, "unknown cookie"),
                        ..SearchResponse::default()
                    })
                }
            }
        };

        let size = usize::try_from(paged.size).unwrap_or(0);
        if size == 0 {
            return Ok(SearchResponse::default());
        }
        let page: Vec<String> = remaining.drain(..size.min(remaining.len())).collect();
        let cookie = if remaining.is_empty() {
            Vec::new()
        } else {
            state.next_cursor += 1;
            let cookie = format!("cursor-{}", state.next_cursor).into_bytes();
            state.cursors.insert(cookie.clone(), remaining);
            cookie
        };

        let entries = page
            .iter()
            .filter_map(|dn| matching.iter().find(|entry| &entry.dn == dn).cloned())
            .collect();
        Ok(SearchResponse {
            entries,
            result: OperationResult::success(),
            controls: vec![ResponseControl {
                oid: OID_PAGED_RESULTS.to_string(),
                value: Some(PagedResultsControl::new(0, cookie).encode()),
            }],
        })
    }

    async fn add(
        &mut self,
        dn: &str,
        attributes: &[(String, Vec<String>)],
    ) -> directory_ldap::Result<OperationResult> {
        let mut state = self.state.lock().unwrap();
        if state.entries.contains_key(&key(dn)) {
            return Ok(code(68));
        }
        let mut entry = RawEntry::new(dn);
        for (name, values) in attributes {
            entry = entry.with_attribute(name.clone(), values.clone());
        }
        state.insert(entry);
        Ok(OperationResult::success())
    }

    async fn modify(
        &mut self,
        dn: &str,
        modifications: &[DirectoryModification],
    ) -> directory_ldap::Result<OperationResult> {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.entries.get_mut(&key(dn)) else {
            return Ok(code(32));
        };
        for modification in modifications {
            if let DirectoryModification::Replace { attribute, values } = modification {
                entry
                    .attributes
                    .retain(|(name, _)| !name.eq_ignore_ascii_case(attribute));
                if !values.is_empty() {
                    entry.attributes.push((attribute.clone(), values.clone()));
                }
            }
        }
        Ok(OperationResult::success())
    }

    async fn rename(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_parent: &str,
    ) -> directory_ldap::Result<OperationResult> {
        let mut state = self.state.lock().unwrap();
        if state.has_children(dn) {
            return Ok(code(66));
        }
        let Some(mut entry) = state.entries.remove(&key(dn)) else {
            return Ok(code(32));
        };
        entry.dn = format!("{new_rdn},{new_parent}");
        state.insert(entry);
        Ok(OperationResult::success())
    }

    async fn delete(&mut self, dn: &str) -> directory_ldap::Result<OperationResult> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_delete.contains(&key(dn)) {
            return Ok(OperationResult::with_code(50, "insufficient access"));
        }
        if state.vanish_on_delete.remove(&key(dn)) {
            state.entries.remove(&key(dn));
            return Ok(code(32));
        }
        if state.has_children(dn) {
            return Ok(code(66));
        }
        if state.entries.remove(&key(dn)).is_none() {
            return Ok(code(32));
        }
        state.deleted.push(key(dn));
        Ok(OperationResult::success())
    }

    async fn unbind(&mut self) -> directory_ldap::Result<()> {
        Ok(())
    }
}

fn directory(people: usize) -> Arc<Mutex<DirectoryState>> {
    let mut state = DirectoryState::default();
    state.insert(RawEntry::new(ROOT).with_attribute("objectClass", ["domain"]));
    state.insert(
        RawEntry::new(PEOPLE).with_attribute("objectClass", ["organizationalUnit"]),
    );
    for index in 0..people {
        state.insert(
            RawEntry::new(format!("uid=user{index:02},{PEOPLE}"))
                .with_attribute("objectClass", ["person"])
                .with_attribute("uid", [format!("user{index:02}")])
                .with_attribute("sn", [format!("Surname{}", people - index)])
                .with_attribute("mail", [format!("user{index:02}@example.com")]),
        );
    }
    Arc::new(Mutex::new(state))
}

fn connection(state: &Arc<Mutex<DirectoryState>>, paging: bool) -> Connection {
    let config = DirectoryConfig::new("ldap.example.com", ROOT)
        .unwrap()
        .with_credentials("cn=admin,dc=example,dc=com", "secret")
        .with_page_size(PAGE);
    Connection::with_connector(
        config,
        Box::new(InMemoryConnector {
            state: Arc::clone(state),
            paging,
        }),
    )
}

#[tokio::test]
async fn paged_and_unpaged_results_agree() {
    let page = PAGE as usize;
    for people in [0, 1, page - 1, page, page + 1, 2 * page + 1] {
        let state = directory(people);
        let mut connection = connection(&state, true);
        let query = connection
            .select()
            .object_class("person")
            .base(PEOPLE)
            .column("uid")
            .column_as("mail", "email");

        let paged = connection.fetch_all(&query, None).await.unwrap();
        let unpaged = connection
            .fetch_all(&query.clone().paged(false), None)
            .await
            .unwrap();

        assert_eq!(paged, unpaged, "{people} entries");
        assert_eq!(paged.len(), people);

        let state = state.lock().unwrap();
        let expected_pages = people.div_ceil(page).max(1);
        assert_eq!(state.paged_requests.len(), expected_pages, "{people} entries");
        assert!(state.paged_requests.iter().all(|(size, _)| *size == PAGE as i32));
        assert!(state.cursors.is_empty(), "no cursor left open");
    }
}

#[tokio::test]
async fn limit_stops_paging_early_and_abandons_the_cursor() {
    let state = directory(10);
    let mut connection = connection(&state, true);
    let query = connection
        .select()
        .object_class("person")
        .base(PEOPLE)
        .column("uid")
        .limit(4, 0);

    let rows = connection.fetch_all(&query, None).await.unwrap();
    assert_eq!(rows.len(), 4);
    {
        let state = state.lock().unwrap();
        let sizes: Vec<i32> = state.paged_requests.iter().map(|(size, _)| *size).collect();
        assert_eq!(sizes, vec![3, 3, 0]);
        assert!(state.cursors.is_empty());
    }

    // the next query starts from a fresh cookie
    connection.fetch_all(&query, None).await.unwrap();
    let state = state.lock().unwrap();
    assert_eq!(state.paged_requests[3], (3, Vec::new()));
}

#[tokio::test]
async fn ordered_limit_reads_every_page_then_sorts() {
    let state = directory(8);
    let mut connection = connection(&state, true);
    let query = connection
        .select()
        .object_class("person")
        .base(PEOPLE)
        .column("uid")
        .column_as("sn", "surname")
        .order_by("surname", SortDirection::Ascending)
        .limit(2, 0);

    let rows = connection.fetch_all(&query, None).await.unwrap();
    let surnames: Vec<_> = rows
        .iter()
        .filter_map(|(_, row)| row.get("surname").and_then(AttributeValue::as_str))
        .collect();
    assert_eq!(surnames, vec!["Surname1", "Surname2"]);
    assert_eq!(state.lock().unwrap().paged_requests.len(), 3);
}

#[tokio::test]
async fn offset_and_limit_slice_server_order() {
    let state = directory(6);
    let mut connection = connection(&state, false);
    let query = connection
        .select()
        .object_class("person")
        .base(PEOPLE)
        .column("uid")
        .limit(2, 0)
        .starting_at(3);

    let column = connection.fetch_column(&query, None).await.unwrap();
    assert_eq!(
        column,
        vec![
            AttributeValue::Single("user02".to_string()),
            AttributeValue::Single("user03".to_string())
        ]
    );
    assert_eq!(connection.count(&query).await.unwrap(), 6);
}

#[tokio::test]
async fn missing_base_returns_no_rows() {
    let state = directory(2);
    let mut connection = connection(&state, true);
    let query = connection.select().base("ou=missing,dc=example,dc=com");

    assert!(connection.fetch_all(&query, None).await.unwrap().is_empty());
    assert_eq!(connection.fetch_row(&query).await.unwrap(), None);
    assert_eq!(connection.fetch_dn(&query).await.unwrap(), None);
}

#[tokio::test]
async fn add_move_and_delete_round_trip() {
    let state = directory(0);
    let mut connection = connection(&state, true);
    let dn = format!("uid=jdoe,{PEOPLE}");

    connection
        .add_entry(
            &dn,
            &[
                ("objectClass".to_string(), vec!["person".to_string()]),
                ("uid".to_string(), vec!["jdoe".to_string()]),
                ("description".to_string(), Vec::new()),
            ],
        )
        .await
        .unwrap();
    assert!(connection.has_dn(&dn).await.unwrap());

    let err = connection.add_entry(&dn, &[]).await.unwrap_err();
    assert_eq!(err.result_code(), Some(68));

    let moved = connection.move_entry(&dn, "uid=john", ROOT).await.unwrap();
    assert_eq!(moved.as_str(), format!("uid=john,{ROOT}"));
    assert!(!connection.has_dn(&dn).await.unwrap());
    assert!(connection.has_dn(moved.as_str()).await.unwrap());

    let back = connection
        .move_to(moved.as_str(), &format!("uid=jdoe,{PEOPLE}"))
        .await
        .unwrap();
    assert!(connection.has_dn(back.as_str()).await.unwrap());

    assert!(connection.delete_dn(back.as_str()).await.unwrap());
    assert!(!connection.has_dn(back.as_str()).await.unwrap());
    assert!(!connection.delete_dn(back.as_str()).await.unwrap());
}

#[tokio::test]
async fn column_follows_sort_on_attribute_outside_projection() {
    let state = directory(4);
    for paging in [true, false] {
        let mut connection = connection(&state, paging);
        let query = connection
            .select()
            .object_class("person")
            .base(PEOPLE)
            .column("uid")
            .column("sn")
            .order_by("sn", SortDirection::Ascending);

        let column = connection.fetch_column(&query, None).await.unwrap();
        assert_eq!(
            column,
            ["user03", "user02", "user01", "user00"]
                .map(|uid| AttributeValue::Single(uid.to_string()))
                .to_vec(),
            "paging {paging}"
        );

        let pairs = connection
            .fetch_pairs(&query.clone().columns(FieldMap::from_names(["mail", "uid"])), None)
            .await
            .unwrap();
        assert_eq!(pairs[0].0, "user03@example.com");
        assert_eq!(pairs[0].1, AttributeValue::Single("user03".to_string()));
    }
}

#[tokio::test]
async fn recursive_delete_removes_children_before_parents() {
    let state = directory(4);
    state.lock().unwrap().insert(
        RawEntry::new(format!("cn=device,uid=user01,{PEOPLE}"))
            .with_attribute("objectClass", ["device"]),
    );
    let mut connection = connection(&state, true);

    assert!(connection.delete_recursively(PEOPLE).await.unwrap());
    assert!(!connection.has_dn(PEOPLE).await.unwrap());

    let state = state.lock().unwrap();
    assert_eq!(state.deleted.len(), 6);
    assert_eq!(state.deleted.last().map(String::as_str), Some(PEOPLE));
    let position = |dn: &str| state.deleted.iter().position(|deleted| deleted == &key(dn));
    assert!(
        position(&format!("cn=device,uid=user01,{PEOPLE}"))
            < position(&format!("uid=user01,{PEOPLE}"))
    );
    assert!(state.entries.contains_key(&key(ROOT)));
}

#[tokio::test]
async fn recursive_delete_of_missing_entry_returns_false() {
    let state = directory(0);
    let mut connection = connection(&state, true);
    assert!(!connection
        .delete_recursively("ou=nowhere,dc=example,dc=com")
        .await
        .unwrap());
}

#[tokio::test]
async fn recursive_delete_stops_at_first_failure() {
    let state = directory(3);
    state
        .lock()
        .unwrap()
        .refuse_delete
        .insert(key(&format!("uid=user01,{PEOPLE}")));
    let mut connection = connection(&state, false);

    let err = connection.delete_recursively(PEOPLE).await.unwrap_err();
    assert!(matches!(err, Error::ProtocolError { code: 50, .. }));
    assert!(connection.has_dn(PEOPLE).await.unwrap());
    assert!(connection.has_dn(&format!("uid=user01,{PEOPLE}")).await.unwrap());
}

#[tokio::test]
async fn recursive_delete_fails_when_a_child_vanishes() {
    let state = directory(3);
    state
        .lock()
        .unwrap()
        .vanish_on_delete
        .insert(key(&format!("uid=user01,{PEOPLE}")));
    let mut connection = connection(&state, true);

    let err = connection.delete_recursively(PEOPLE).await.unwrap_err();
    assert!(matches!(err, Error::ProtocolError { code: 32, .. }));
    assert!(connection.has_dn(PEOPLE).await.unwrap());
    assert!(!state.lock().unwrap().deleted.contains(&key(PEOPLE)));
}

#[tokio::test]
async fn modify_entry_replaces_and_removes_attributes() {
    let state = directory(1);
    let mut connection = connection(&state, false);
    let dn = format!("uid=user00,{PEOPLE}");

    connection
        .modify_entry(
            &dn,
            &[
                ("mail".to_string(), vec!["new@example.com".to_string()]),
                ("sn".to_string(), Vec::new()),
            ],
        )
        .await
        .unwrap();

    let query = connection
        .select()
        .base(dn.as_str())
        .scope(SearchScope::Base)
        .column("mail")
        .column("sn");
    let row = connection.fetch_row(&query).await.unwrap().unwrap();
    assert_eq!(
        row.get("mail"),
        Some(&AttributeValue::Single("new@example.com".to_string()))
    );
    assert_eq!(row.get("sn"), Some(&AttributeValue::Null));
}
