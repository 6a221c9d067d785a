//! Query representation: filter, projection, ordering and paging preferences.

use crate::normalize::{AttributeValue, Row};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    #[default]
    Subtree,
}

/// Direction of a sort rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest value first.
    #[default]
    Ascending,
    /// Largest value first.
    Descending,
}

/// A single `(attribute, direction)` ordering rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortRule {
    /// Attribute (or alias) to sort by.
    pub attribute: String,
    /// Sort direction.
    pub direction: SortDirection,
}

impl SortRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(attribute: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            attribute: attribute.into(),
            direction,
        }
    }

    /// Creates an ascending rule.
    #[must_use]
    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self::new(attribute, SortDirection::Ascending)
    }

    /// Creates a descending rule.
    #[must_use]
    pub fn descending(attribute: impl Into<String>) -> Self {
        Self::new(attribute, SortDirection::Descending)
    }
}

/// Ordered mapping of requested attribute name to the key used in result rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: Vec<(String, String)>,
}

impl FieldMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map where every attribute keeps its own name.
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = Self::new();
        for name in names {
            map.insert(name, None::<String>);
        }
        map
    }

    /// Adds (or re-aliases) a requested attribute; `None` keeps the attribute name.
    pub fn insert(&mut self, name: impl Into<String>, alias: Option<impl Into<String>>) {
        let name = name.into();
        let alias = alias.map_or_else(|| name.clone(), Into::into);
        match self
            .fields
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = alias,
            None => self.fields.push((name, alias)),
        }
    }

    /// Number of requested attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no attribute was requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates `(attribute, alias)` pairs in request order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.fields
            .iter()
            .map(|(name, alias)| (name.as_str(), alias.as_str()))
    }

    /// Attribute names to request from the server.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Alias configured for `name` (case-insensitive).
    #[must_use]
    pub fn alias_for(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(requested, _)| requested.eq_ignore_ascii_case(name))
            .map(|(_, alias)| alias.as_str())
    }

    /// A map holding only the first `count` fields.
    #[must_use]
    pub fn take(&self, count: usize) -> Self {
        Self {
            fields: self.fields.iter().take(count).cloned().collect(),
        }
    }
}

impl<N, A> FromIterator<(N, A)> for FieldMap
where
    N: Into<String>,
    A: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, A)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (name, alias) in iter {
            map.insert(name, Some(alias));
        }
        map
    }
}

/// Search filter tree rendered to RFC 4515 syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(attribute=value)` with the value escaped.
    Equals {
        /// Attribute name.
        attribute: String,
        /// Literal value.
        value: String,
    },
    /// `(attribute=pattern)` where `*` in the pattern is a wildcard.
    Matches {
        /// Attribute name.
        attribute: String,
        /// Pattern; everything except `*` is escaped.
        pattern: String,
    },
    /// `(attribute=*)`.
    Present(String),
    /// `(&...)`.
    And(Vec<Filter>),
    /// `(|...)`.
    Or(Vec<Filter>),
    /// `(!...)`.
    Not(Box<Filter>),
    /// Pre-rendered filter text, wrapped in parentheses when needed.
    Raw(String),
}

impl Filter {
    /// Equality assertion.
    #[must_use]
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Wildcard assertion.
    #[must_use]
    pub fn matches(attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Matches {
            attribute: attribute.into(),
            pattern: pattern.into(),
        }
    }

    /// Presence assertion.
    #[must_use]
    pub fn present(attribute: impl Into<String>) -> Self {
        Self::Present(attribute.into())
    }

    /// Negation.
    #[must_use]
    pub fn negate(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Renders the filter.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Equals { attribute, value } => {
                format!("({attribute}={})", escape_filter_value(value))
            }
            Self::Matches { attribute, pattern } => {
                let escaped = pattern
                    .split('*')
                    .map(escape_filter_value)
                    .collect::<Vec<_>>()
                    .join("*");
                format!("({attribute}={escaped})")
            }
            Self::Present(attribute) => format!("({attribute}=*)"),
            Self::And(filters) => format!("(&{})", render_all(filters)),
            Self::Or(filters) => format!("(|{})", render_all(filters)),
            Self::Not(filter) => format!("(!{})", filter.render()),
            Self::Raw(text) => {
                let text = text.trim();
                if text.starts_with('(') {
                    text.to_string()
                } else {
                    format!("({text})")
                }
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn render_all(filters: &[Filter]) -> String {
    filters.iter().map(Filter::render).collect()
}

/// Escapes a value for use in a filter assertion (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// A directory query.
///
/// Queries are plain values: build one with [`Query::new`] (or
/// `Connection::select`) and hand it to the connection's fetch methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    object_class: Option<String>,
    filters: Vec<Filter>,
    native_filter: Option<String>,
    base_dn: Option<String>,
    scope: SearchScope,
    fields: FieldMap,
    limit: usize,
    offset: usize,
    order: Vec<SortRule>,
    paged: bool,
    page_size: Option<u32>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            object_class: None,
            filters: Vec::new(),
            native_filter: None,
            base_dn: None,
            scope: SearchScope::Subtree,
            fields: FieldMap::new(),
            limit: 0,
            offset: 0,
            order: Vec::new(),
            paged: true,
            page_size: None,
        }
    }
}

impl Query {
    /// Creates an empty query that matches every entry below the connection root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the query to entries of `object_class`.
    #[must_use]
    pub fn object_class(mut self, object_class: impl Into<String>) -> Self {
        self.object_class = Some(object_class.into());
        self
    }

    /// Requests an attribute under its own name.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name, None::<String>);
        self
    }

    /// Requests an attribute and exposes it under `alias`.
    #[must_use]
    pub fn column_as(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
        self.fields.insert(name, Some(alias));
        self
    }

    /// Replaces the requested fields.
    #[must_use]
    pub fn columns(mut self, fields: FieldMap) -> Self {
        self.fields = fields;
        self
    }

    /// Adds a filter that must match (combined with AND).
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Shorthand for an equality filter; `*` in `value` acts as a wildcard.
    #[must_use]
    pub fn where_eq(self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if value.contains('*') {
            self.filter(Filter::matches(attribute, value))
        } else {
            self.filter(Filter::equals(attribute, value))
        }
    }

    /// Adds a pre-rendered filter that is ANDed with everything else.
    #[must_use]
    pub fn native_filter(mut self, filter: impl Into<String>) -> Self {
        self.native_filter = Some(filter.into());
        self
    }

    /// Searches below `base_dn` instead of the connection root.
    #[must_use]
    pub fn base(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }

    /// Sets the search scope.
    #[must_use]
    pub const fn scope(mut self, scope: SearchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Limits the result to `limit` rows (0 = unbounded) after skipping `offset` rows.
    #[must_use]
    pub const fn limit(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Starts the result at the 1-based row `position`; 0 and 1 both mean the first row.
    #[must_use]
    pub const fn starting_at(mut self, position: usize) -> Self {
        self.offset = position.saturating_sub(1);
        self
    }

    /// Appends a sort rule.
    #[must_use]
    pub fn order_by(mut self, attribute: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push(SortRule::new(attribute, direction));
        self
    }

    /// Enables or disables paged retrieval.
    #[must_use]
    pub const fn paged(mut self, paged: bool) -> Self {
        self.paged = paged;
        self
    }

    /// Overrides the page size used for paged retrieval.
    #[must_use]
    pub const fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Renders the complete filter.
    #[must_use]
    pub fn filter_string(&self) -> String {
        let mut parts: Vec<Filter> = Vec::new();
        if let Some(object_class) = &self.object_class {
            parts.push(Filter::equals("objectClass", object_class.clone()));
        }
        parts.extend(self.filters.iter().cloned());
        if let Some(native) = &self.native_filter {
            parts.push(Filter::Raw(native.clone()));
        }

        match parts.len() {
            0 => Filter::present("objectClass").render(),
            1 => parts[0].render(),
            _ => Filter::And(parts).render(),
        }
    }

    /// Explicit search base, if any.
    #[must_use]
    pub fn base_dn(&self) -> Option<&str> {
        self.base_dn.as_deref()
    }

    /// Search scope.
    #[must_use]
    pub const fn search_scope(&self) -> SearchScope {
        self.scope
    }

    /// Requested fields.
    #[must_use]
    pub const fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Maximum number of rows (0 = unbounded).
    #[must_use]
    pub const fn limit_count(&self) -> usize {
        self.limit
    }

    /// Number of leading rows skipped (0-based).
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Returns true if a row limit is set.
    #[must_use]
    pub const fn has_limit(&self) -> bool {
        self.limit > 0
    }

    /// Sort rules in priority order.
    #[must_use]
    pub fn order(&self) -> &[SortRule] {
        &self.order
    }

    /// Returns true if any sort rule is set.
    #[must_use]
    pub fn has_order(&self) -> bool {
        !self.order.is_empty()
    }

    /// Returns true if the query prefers paged retrieval.
    #[must_use]
    pub const fn uses_paged_results(&self) -> bool {
        self.paged
    }

    /// Page size override, if any.
    #[must_use]
    pub const fn page_size_override(&self) -> Option<u32> {
        self.page_size
    }

    /// Compares two rows by the query's sort rules.
    ///
    /// Rules naming a requested attribute are applied to its alias. Nulls sort
    /// first, multi-valued attributes compare by their first value and strings
    /// compare case-insensitively.
    #[must_use]
    pub fn compare(&self, left: &Row, right: &Row) -> Ordering {
        let rules: Vec<SortRule> = self
            .order
            .iter()
            .map(|rule| {
                let key = self.fields.alias_for(&rule.attribute).unwrap_or(&rule.attribute);
                SortRule::new(key, rule.direction)
            })
            .collect();
        compare_rows(&rules, left, right)
    }

    /// Attribute a sort rule refers to: the requested attribute behind an
    /// alias, or the rule's own name.
    #[must_use]
    pub fn sort_attribute<'a>(&'a self, rule: &'a SortRule) -> &'a str {
        self.fields
            .iter()
            .find(|(_, alias)| alias.eq_ignore_ascii_case(&rule.attribute))
            .map_or(rule.attribute.as_str(), |(name, _)| name)
    }
}

/// Compares rows by `rules`, each naming a row key.
pub(crate) fn compare_rows(rules: &[SortRule], left: &Row, right: &Row) -> Ordering {
    for rule in rules {
        let ordering = compare_values(
            left.get_ignore_case(&rule.attribute),
            right.get_ignore_case(&rule.attribute),
        );
        let ordering = match rule.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_values(left: Option<&AttributeValue>, right: Option<&AttributeValue>) -> Ordering {
    let left = left.and_then(AttributeValue::first);
    let right = right.and_then(AttributeValue::first);
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a
            .to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b)),
    }
}
