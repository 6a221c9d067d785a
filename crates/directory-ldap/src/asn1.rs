//! Control value helpers over the ASN.1 types shipped with `ldap3`.
//!
//! `ldap3`'s own control parsers panic on malformed input, so response values
//! are taken apart here with `parse_tag` and the `StructureTag` accessors, and
//! anything unexpected becomes `None`.

use crate::Result;
use bytes::BytesMut;
use directory_core::Error;
use ldap3::asn1::{parse_tag, write, ASNTag, StructureTag, Tag, TagClass, Types};

/// BER encodes `tag`.
pub(crate) fn encode(tag: Tag) -> Result<Vec<u8>> {
    let mut buffer = BytesMut::new();
    write::encode_into(&mut buffer, tag.into_structure())
        .map_err(|err| Error::protocol(format!("could not encode control value: {err}")))?;
    Ok(buffer.to_vec())
}

/// Parses exactly one element spanning all of `value`.
pub(crate) fn decode(value: &[u8]) -> Option<StructureTag> {
    match parse_tag(value) {
        Ok((rest, tag)) if rest.is_empty() => Some(tag),
        _ => None,
    }
}

/// The element if it has the universal type `kind`.
pub(crate) fn universal(tag: StructureTag, kind: Types) -> Option<StructureTag> {
    tag.match_class(TagClass::Universal)?.match_id(kind as u64)
}

/// Content of a universal `SEQUENCE`.
pub(crate) fn sequence(tag: StructureTag) -> Option<Vec<StructureTag>> {
    universal(tag, Types::Sequence)?.expect_constructed()
}

/// Content of a universal `OCTET STRING`.
pub(crate) fn octet_string(tag: StructureTag) -> Option<Vec<u8>> {
    universal(tag, Types::OctetString)?.expect_primitive()
}

/// Value of a universal `INTEGER` that fits in 32 bits.
pub(crate) fn integer(tag: StructureTag) -> Option<i32> {
    let content = universal(tag, Types::Integer)?.expect_primitive()?;
    if content.is_empty() || content.len() > 4 {
        return None;
    }
    let fill = if content[0] & 0x80 == 0 { 0x00 } else { 0xFF };
    let mut bytes = [fill; 4];
    bytes[4 - content.len()..].copy_from_slice(&content);
    Some(i32::from_be_bytes(bytes))
}
