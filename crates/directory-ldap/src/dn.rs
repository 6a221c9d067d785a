//! Distinguished name parsing and composition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use directory_core::Error as CoreError;

/// Errors that can occur when parsing distinguished names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DistinguishedNameError {
    /// The distinguished name was empty.
    #[error("distinguished name cannot be empty")]
    Empty,
    /// A component in the distinguished name was invalid.
    #[error("invalid distinguished name component: {0}")]
    InvalidComponent(String),
    /// A component had nothing to the left of the `=`.
    #[error("distinguished name component missing attribute: {0}")]
    MissingAttribute(String),
    /// A component had nothing to the right of the `=`.
    #[error("distinguished name component missing value for attribute {0}")]
    MissingValue(String),
    /// The input ended inside an escape sequence.
    #[error("distinguished name contains an unterminated escape sequence")]
    UnterminatedEscape,
}

impl From<DistinguishedNameError> for CoreError {
    fn from(err: DistinguishedNameError) -> Self {
        CoreError::InvalidDn(err.to_string())
    }
}

/// One `attribute=value` assertion of a relative distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeDistinguishedName {
    attribute: String,
    value: String,
}

impl RelativeDistinguishedName {
    /// Creates an assertion from an attribute and an unescaped value.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Attribute type (e.g. `cn`).
    #[must_use]
    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// Unescaped attribute value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    fn equivalent(&self, other: &Self) -> bool {
        self.attribute.eq_ignore_ascii_case(&other.attribute)
            && self.value.to_lowercase() == other.value.to_lowercase()
    }
}

/// Parsed distinguished name.
///
/// Keeps a canonical string (attribute types as written, values re-escaped)
/// next to the parsed components, leaf first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinguishedName {
    raw: String,
    rdns: Vec<Vec<RelativeDistinguishedName>>,
}

impl DistinguishedName {
    /// Parses a distinguished name.
    ///
    /// # Errors
    ///
    /// Returns [`DistinguishedNameError`] for empty input or invalid syntax.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, DistinguishedNameError> {
        let raw = input.as_ref().trim();
        if raw.is_empty() {
            return Err(DistinguishedNameError::Empty);
        }

        let rdns = split_unescaped(raw, ',')?
            .into_iter()
            .map(|component| {
                split_unescaped(&component, '+')?
                    .iter()
                    .map(|assertion| parse_assertion(assertion))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_rdns(rdns))
    }

    fn from_rdns(rdns: Vec<Vec<RelativeDistinguishedName>>) -> Self {
        Self {
            raw: render(&rdns),
            rdns,
        }
    }

    /// Canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// RDNs leaf first; each inner set holds the `+`-joined assertions.
    #[must_use]
    pub fn rdns(&self) -> &[Vec<RelativeDistinguishedName>] {
        &self.rdns
    }

    /// Number of RDNs.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    /// The leftmost RDN rendered as a string (e.g. `cn=jdoe`).
    #[must_use]
    pub fn rdn(&self) -> String {
        render(&self.rdns[..1])
    }

    /// The DN of the parent entry, or `None` for a single-RDN name.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.rdns.len() < 2 {
            return None;
        }
        Some(Self::from_rdns(self.rdns[1..].to_vec()))
    }

    /// Returns the value of the first assertion on `attribute` (case-insensitive).
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.rdns
            .iter()
            .flatten()
            .find(|rdn| rdn.attribute.eq_ignore_ascii_case(attribute))
            .map(RelativeDistinguishedName::value)
    }

    /// Compares two names the way directory servers usually do: case-insensitively.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.rdns.len() == other.rdns.len() && self.ends_with(other)
    }

    /// Returns true if `self` lies strictly below `ancestor`.
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &Self) -> bool {
        self.rdns.len() > ancestor.rdns.len() && self.ends_with(ancestor)
    }

    /// Appends `suffix` below this name, e.g. an RDN joined with its new parent.
    #[must_use]
    pub fn join(mut self, suffix: &DistinguishedName) -> Self {
        self.rdns.extend(suffix.rdns.iter().cloned());
        self.raw = render(&self.rdns);
        self
    }

    fn ends_with(&self, suffix: &Self) -> bool {
        let offset = self.rdns.len() - suffix.rdns.len();
        self.rdns[offset..]
            .iter()
            .zip(&suffix.rdns)
            .all(|(left, right)| {
                left.len() == right.len()
                    && left.iter().zip(right).all(|(a, b)| a.equivalent(b))
            })
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for DistinguishedName {
    type Err = DistinguishedNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<DistinguishedName> for String {
    fn from(value: DistinguishedName) -> Self {
        value.raw
    }
}

fn split_unescaped(input: &str, delimiter: char) -> Result<Vec<String>, DistinguishedNameError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            // Keep the escape so the assertion parser can skip escaped `=`.
            let next = chars
                .next()
                .ok_or(DistinguishedNameError::UnterminatedEscape)?;
            current.push(ch);
            current.push(next);
        } else if ch == delimiter {
            parts.push(std::mem::take(&mut current).trim().to_string());
        } else {
            current.push(ch);
        }
    }
    parts.push(current.trim().to_string());

    if parts.iter().any(String::is_empty) {
        return Err(DistinguishedNameError::InvalidComponent(input.to_string()));
    }
    Ok(parts)
}

fn parse_assertion(assertion: &str) -> Result<RelativeDistinguishedName, DistinguishedNameError> {
    let mut escaped = false;
    let mut separator = None;
    for (index, ch) in assertion.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '=' => {
                separator = Some(index);
                break;
            }
            _ => {}
        }
    }

    let index =
        separator.ok_or_else(|| DistinguishedNameError::InvalidComponent(assertion.to_string()))?;
    let attribute = assertion[..index].trim();
    let value = assertion[index + 1..].trim_start();

    if attribute.is_empty() {
        return Err(DistinguishedNameError::MissingAttribute(
            assertion.to_string(),
        ));
    }
    if value.is_empty() {
        return Err(DistinguishedNameError::MissingValue(attribute.to_string()));
    }

    Ok(RelativeDistinguishedName::new(attribute, unescape(value)?))
}

fn unescape(value: &str) -> Result<String, DistinguishedNameError> {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            result.push(
                chars
                    .next()
                    .ok_or(DistinguishedNameError::UnterminatedEscape)?,
            );
        } else {
            result.push(ch);
        }
    }
    Ok(result)
}

fn escape(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());
    for (index, ch) in value.chars().enumerate() {
        let special = matches!(ch, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (index == 0 && matches!(ch, ' ' | '#'))
            || (index == last && ch == ' ');
        if special {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn render(rdns: &[Vec<RelativeDistinguishedName>]) -> String {
    rdns.iter()
        .map(|rdn| {
            rdn.iter()
                .map(|assertion| format!("{}={}", assertion.attribute, escape(&assertion.value)))
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect::<Vec<_>>()
        .join(",")
}
