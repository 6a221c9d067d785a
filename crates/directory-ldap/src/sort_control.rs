//! Server-side sort request control (RFC 2891).
//!
//! ```text
//! SortKeyList ::= SEQUENCE OF SEQUENCE {
//!     attributeType   AttributeDescription,
//!     orderingRule    [0] MatchingRuleId OPTIONAL,
//!     reverseOrder    [1] BOOLEAN DEFAULT FALSE }
//! ```

use crate::asn1;
use crate::capabilities::OID_SORT_REQUEST;
use crate::query::{SortDirection, SortRule};
use crate::transport::RequestControl;
use crate::Result;
use directory_core::Error;
use ldap3::asn1::{Boolean, OctetString, Sequence, StructureTag, Tag, TagClass};

/// Largest number of sort keys accepted in one control.
pub const MAX_SORT_RULES: usize = 127;

const ORDERING_RULE: u64 = 0;
const REVERSE_ORDER: u64 = 1;

/// Encodes `rules` as a sort key list.
///
/// # Errors
///
/// Returns [`Error::UsageError`] for more than [`MAX_SORT_RULES`] rules.
pub fn encode_sort_rules(rules: &[SortRule]) -> Result<Vec<u8>> {
    if rules.len() > MAX_SORT_RULES {
        return Err(Error::UsageError(format!(
            "at most {MAX_SORT_RULES} sort rules can be sent to the server, got {}",
            rules.len()
        )));
    }

    let keys = rules
        .iter()
        .map(|rule| {
            let mut key = vec![Tag::OctetString(OctetString {
                inner: rule.attribute.as_bytes().to_vec(),
                ..Default::default()
            })];
            // reverseOrder defaults to FALSE and is omitted for ascending keys
            if rule.direction == SortDirection::Descending {
                key.push(Tag::Boolean(Boolean {
                    id: REVERSE_ORDER,
                    class: TagClass::Context,
                    inner: true,
                }));
            }
            Tag::Sequence(Sequence {
                inner: key,
                ..Default::default()
            })
        })
        .collect();
    asn1::encode(Tag::Sequence(Sequence {
        inner: keys,
        ..Default::default()
    }))
}

/// Decodes a sort key list. Ordering rules are accepted and ignored.
///
/// # Errors
///
/// Returns [`Error::ProtocolError`] for malformed input.
pub fn decode_sort_rules(value: &[u8]) -> Result<Vec<SortRule>> {
    asn1::decode(value)
        .and_then(asn1::sequence)
        .ok_or_else(malformed)?
        .into_iter()
        .map(|key| decode_key(key).ok_or_else(malformed))
        .collect()
}

fn decode_key(key: StructureTag) -> Option<SortRule> {
    let mut parts = asn1::sequence(key)?.into_iter().peekable();
    let attribute = String::from_utf8_lossy(&asn1::octet_string(parts.next()?)?).into_owned();
    if parts
        .peek()
        .is_some_and(|part| part.class == TagClass::Context && part.id == ORDERING_RULE)
    {
        parts.next();
    }
    let reverse = match parts.next() {
        Some(part) => {
            let content = part
                .match_class(TagClass::Context)?
                .match_id(REVERSE_ORDER)?
                .expect_primitive()?;
            match content.as_slice() {
                [flag] => *flag != 0,
                _ => return None,
            }
        }
        None => false,
    };
    if parts.next().is_some() {
        return None;
    }

    let direction = if reverse {
        SortDirection::Descending
    } else {
        SortDirection::Ascending
    };
    Some(SortRule::new(attribute, direction))
}

fn malformed() -> Error {
    Error::protocol("malformed sort key list")
}

/// Builds the non-critical sort request control for `rules`.
///
/// # Errors
///
/// Returns [`Error::UsageError`] for more than [`MAX_SORT_RULES`] rules.
pub fn sort_request_control(rules: &[SortRule]) -> Result<RequestControl> {
    Ok(RequestControl::new(OID_SORT_REQUEST, encode_sort_rules(rules)?))
}
