//! Attribute normalization and result containers.
//!
//! Raw entries come off the wire as a DN plus a list of attributes with their
//! values. [`normalize_attributes`] turns one into a [`Row`] keyed by the
//! caller's aliases; a [`ResultSet`] keeps the rows in order, keyed by DN.

use crate::query::FieldMap;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Entry as decoded at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attributes with their values in server order.
    pub attributes: Vec<(String, Vec<String>)>,
}

impl RawEntry {
    /// Creates an entry without attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute<I, S>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .push((name.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    /// Values of `name` (case-insensitive).
    #[must_use]
    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }
}

/// Normalized attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Requested but not returned.
    Null,
    /// Exactly one value.
    Single(String),
    /// Several values in server order.
    Multiple(Vec<String>),
}

impl AttributeValue {
    /// Collapses a value list: none → null, one → scalar, more → sequence.
    #[must_use]
    pub fn from_values(mut values: Vec<String>) -> Self {
        match values.len() {
            0 => Self::Null,
            1 => Self::Single(values.remove(0)),
            _ => Self::Multiple(values),
        }
    }

    /// Returns true for [`AttributeValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The scalar value, if single-valued.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Single(value) => Some(value),
            _ => None,
        }
    }

    /// The scalar value or the first of several.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Null => None,
            Self::Single(value) => Some(value),
            Self::Multiple(values) => values.first().map(String::as_str),
        }
    }

    /// All values as a slice-like vector.
    #[must_use]
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Null => Vec::new(),
            Self::Single(value) => vec![value.as_str()],
            Self::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

/// One normalized result row: ordered field → value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    fields: Vec<(String, AttributeValue)>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an existing value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: AttributeValue) {
        let key = key.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Value stored under exactly `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Value stored under `key`, ignoring ASCII case.
    #[must_use]
    pub fn get_ignore_case(&self, key: &str) -> Option<&AttributeValue> {
        self.get(key).or_else(|| {
            self.fields
                .iter()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(key))
                .map(|(_, value)| value)
        })
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        let index = self.fields.iter().position(|(existing, _)| existing == key)?;
        Some(self.fields.remove(index).1)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// The first field's value.
    #[must_use]
    pub fn first(&self) -> Option<&AttributeValue> {
        self.fields.first().map(|(_, value)| value)
    }

    /// Field names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.iter().map(|(key, _)| key.as_str())
    }

    /// Iterates fields in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> + '_ {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the row has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Rows keyed by DN, in server order unless sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    rows: Vec<(String, Row)>,
    positions: HashMap<String, usize>,
}

impl ResultSet {
    /// Creates an empty result set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row; a repeated DN replaces the earlier row but keeps its position.
    pub fn insert(&mut self, dn: impl Into<String>, row: Row) {
        let dn = dn.into();
        if let Some(&position) = self.positions.get(&dn) {
            self.rows[position].1 = row;
            return;
        }
        self.positions.insert(dn.clone(), self.rows.len());
        self.rows.push((dn, row));
    }

    /// Row for `dn`.
    #[must_use]
    pub fn get(&self, dn: &str) -> Option<&Row> {
        self.positions.get(dn).map(|&position| &self.rows[position].1)
    }

    /// Returns true if a row exists for `dn`.
    #[must_use]
    pub fn contains_dn(&self, dn: &str) -> bool {
        self.positions.contains_key(dn)
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// DNs in order.
    pub fn dns(&self) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(|(dn, _)| dn.as_str())
    }

    /// `(dn, row)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Row)> + '_ {
        self.rows.iter().map(|(dn, row)| (dn.as_str(), row))
    }

    /// Mutable rows in order.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut Row> + '_ {
        self.rows.iter_mut().map(|(_, row)| row)
    }

    /// The first `(dn, row)` pair.
    #[must_use]
    pub fn first(&self) -> Option<(&str, &Row)> {
        self.rows.first().map(|(dn, row)| (dn.as_str(), row))
    }

    /// Stable sort of the rows.
    pub fn sort_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(&Row, &Row) -> Ordering,
    {
        self.rows.sort_by(|(_, left), (_, right)| compare(left, right));
        self.reindex();
    }

    /// Drops `offset` leading rows and keeps at most `limit` rows (0 = all).
    pub fn slice(&mut self, offset: usize, limit: usize) {
        if offset == 0 && (limit == 0 || limit >= self.rows.len()) {
            return;
        }
        let keep = if limit == 0 { usize::MAX } else { limit };
        self.rows = std::mem::take(&mut self.rows)
            .into_iter()
            .skip(offset)
            .take(keep)
            .collect();
        self.reindex();
    }

    fn reindex(&mut self) {
        self.positions = self
            .rows
            .iter()
            .enumerate()
            .map(|(position, (dn, _))| (dn.clone(), position))
            .collect();
    }
}

impl IntoIterator for ResultSet {
    type Item = (String, Row);
    type IntoIter = std::vec::IntoIter<(String, Row)>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Converts a raw entry into a row keyed by the aliases in `fields`.
///
/// Every requested field appears in the row, as null when the server did not
/// return it. Attributes the caller did not request keep their raw name and
/// follow the requested ones in name order, so the output never depends on the
/// order the server listed attributes in.
#[must_use]
pub fn normalize_attributes(entry: &RawEntry, fields: &FieldMap) -> Row {
    let lookup: HashMap<String, usize> = fields
        .iter()
        .enumerate()
        .map(|(index, (name, _))| (name.to_ascii_lowercase(), index))
        .collect();

    let mut requested: Vec<Option<AttributeValue>> = vec![None; fields.len()];
    let mut unrequested: Vec<(String, AttributeValue)> = Vec::new();

    for (name, values) in &entry.attributes {
        let value = AttributeValue::from_values(values.clone());
        match lookup.get(&name.to_ascii_lowercase()) {
            Some(&index) => requested[index] = Some(value),
            None => unrequested.push((name.clone(), value)),
        }
    }
    unrequested.sort_by(|(left, _), (right, _)| left.cmp(right));

    let mut row = Row::new();
    for ((name, alias), value) in fields.iter().zip(requested) {
        let value = value.unwrap_or_else(|| {
            debug!(dn = %entry.dn, attribute = name, "requested attribute missing from entry");
            AttributeValue::Null
        });
        row.insert(alias, value);
    }
    for (name, value) in unrequested {
        if !row.contains_key(&name) {
            row.insert(name, value);
        }
    }
    row
}
