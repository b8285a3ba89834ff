//! Schema-driven attribute codec.
//!
//! The raw TLV plumbing in [`crate::attr`] knows nothing about attribute
//! semantics. This module layers the protocol schema on top: a [`Schema`]
//! function maps an attribute type code to its declared wire kind, and
//! [`decode`] turns a raw attribute stream into an [`AttributeSet`] of typed
//! values, recursing into nested containers. There is no width field for
//! scalars on the wire, so the schema is the only thing standing between a
//! type code and silent misinterpretation; the schema tables are pinned by
//! tests in [`crate::schema`].
//!
//! Decoding is forward compatible: a type code the schema does not know is
//! skipped, so a newer kernel exposing extra attributes does not break the
//! session.

use super::attr::{NLA_F_NESTED, NLA_HDRLEN, NlAttr, get, nla_align};
use super::error::{Error, Result};

/// Declared wire kind of an attribute type code.
#[derive(Clone, Copy)]
pub enum AttrKind {
    /// Unsigned 8-bit scalar.
    U8,
    /// Unsigned 16-bit scalar, native endian.
    U16,
    /// Unsigned 32-bit scalar, native endian.
    U32,
    /// Unsigned 64-bit scalar, native endian.
    U64,
    /// NUL-terminated string.
    Str,
    /// Opaque byte sequence.
    Bytes,
    /// Presence flag, no payload.
    Flag,
    /// Nested attribute block, decoded with its own schema.
    Nested(Schema),
}

/// Maps an attribute type code to its declared kind.
///
/// Returning `None` marks the code as unknown; the decoder skips it.
pub type Schema = fn(u16) -> Option<AttrKind>;

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    String(String),
    Bytes(Vec<u8>),
    Flag,
    Nested(AttributeSet),
}

/// An ordered set of decoded attributes.
///
/// Type codes are not required to be unique on the wire; the set keeps the
/// last-seen value per code. Never mutated after decode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeSet {
    entries: Vec<(u16, AttrValue)>,
}

impl AttributeSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct attribute codes in the set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the set holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an attribute by type code.
    pub fn get(&self, attr_type: u16) -> Option<&AttrValue> {
        self.entries
            .iter()
            .find(|(t, _)| *t == attr_type)
            .map(|(_, v)| v)
    }

    /// Check whether an attribute is present (used for flag attributes).
    pub fn contains(&self, attr_type: u16) -> bool {
        self.get(attr_type).is_some()
    }

    /// Iterate over `(type, value)` pairs in decode order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &AttrValue)> {
        self.entries.iter().map(|(t, v)| (*t, v))
    }

    /// Get a u8 attribute value.
    pub fn u8(&self, attr_type: u16) -> Option<u8> {
        match self.get(attr_type) {
            Some(AttrValue::U8(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a u16 attribute value.
    pub fn u16(&self, attr_type: u16) -> Option<u16> {
        match self.get(attr_type) {
            Some(AttrValue::U16(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a u32 attribute value.
    pub fn u32(&self, attr_type: u16) -> Option<u32> {
        match self.get(attr_type) {
            Some(AttrValue::U32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a u64 attribute value.
    pub fn u64(&self, attr_type: u16) -> Option<u64> {
        match self.get(attr_type) {
            Some(AttrValue::U64(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a string attribute value.
    pub fn string(&self, attr_type: u16) -> Option<&str> {
        match self.get(attr_type) {
            Some(AttrValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Get an opaque-bytes attribute value.
    pub fn bytes(&self, attr_type: u16) -> Option<&[u8]> {
        match self.get(attr_type) {
            Some(AttrValue::Bytes(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Get a nested attribute block.
    pub fn nested(&self, attr_type: u16) -> Option<&AttributeSet> {
        match self.get(attr_type) {
            Some(AttrValue::Nested(v)) => Some(v),
            _ => None,
        }
    }

    fn insert(&mut self, attr_type: u16, value: AttrValue) {
        // Last-seen wins for duplicate codes.
        if let Some(slot) = self.entries.iter_mut().find(|(t, _)| *t == attr_type) {
            slot.1 = value;
        } else {
            self.entries.push((attr_type, value));
        }
    }
}

/// Decode a raw attribute stream into an [`AttributeSet`].
///
/// Framing failures (a record length shorter than the attribute header,
/// a record length past the end of the buffer, trailing misaligned bytes)
/// fail immediately with [`Error::MalformedAttribute`] and return no set.
///
/// A failure *inside* a nested block is softer: the nested slot is dropped,
/// sibling top-level records continue to decode, and the first such error is
/// surfaced once after the whole stream has been consumed. A corrupt stream
/// is still an error either way; the distinction only controls how much of
/// it gets looked at first.
pub fn decode(data: &[u8], schema: Schema) -> Result<AttributeSet> {
    let mut set = AttributeSet::new();
    let mut deferred: Option<Error> = None;
    let mut rest = data;

    while !rest.is_empty() {
        if rest.len() < NLA_HDRLEN {
            return Err(Error::MalformedAttribute(format!(
                "{} trailing bytes, not enough for an attribute header",
                rest.len()
            )));
        }

        let attr = NlAttr::from_bytes(rest)?;
        let len = attr.nla_len as usize;
        if len < NLA_HDRLEN || len > rest.len() {
            return Err(Error::MalformedAttribute(format!(
                "attribute record claims {} bytes, {} available",
                len,
                rest.len()
            )));
        }

        let attr_type = attr.kind();
        let payload = &rest[NLA_HDRLEN..len];

        match schema(attr_type) {
            // Unknown code: skip (forward compatibility).
            None => {}
            Some(AttrKind::U8) => set.insert(attr_type, AttrValue::U8(get::u8(payload)?)),
            Some(AttrKind::U16) => set.insert(attr_type, AttrValue::U16(get::u16_ne(payload)?)),
            Some(AttrKind::U32) => set.insert(attr_type, AttrValue::U32(get::u32_ne(payload)?)),
            Some(AttrKind::U64) => set.insert(attr_type, AttrValue::U64(get::u64_ne(payload)?)),
            Some(AttrKind::Str) => {
                set.insert(attr_type, AttrValue::String(get::string(payload)?.to_string()))
            }
            Some(AttrKind::Bytes) => set.insert(attr_type, AttrValue::Bytes(payload.to_vec())),
            Some(AttrKind::Flag) => set.insert(attr_type, AttrValue::Flag),
            Some(AttrKind::Nested(sub_schema)) => match decode(payload, sub_schema) {
                Ok(nested) => set.insert(attr_type, AttrValue::Nested(nested)),
                Err(e) => {
                    deferred.get_or_insert(e);
                }
            },
        }

        let aligned_len = nla_align(len);
        if aligned_len >= rest.len() {
            rest = &[];
        } else {
            rest = &rest[aligned_len..];
        }
    }

    match deferred {
        Some(e) => Err(e),
        None => Ok(set),
    }
}

/// Attribute payload builder for requests.
///
/// Errors are deferred: append methods never fail, and [`AttrEncoder::encode`]
/// reports the first value that could not fit its wire representation. This
/// mirrors the session's request construction flow, where all attributes are
/// appended before the request is built.
#[derive(Debug, Default)]
pub struct AttrEncoder {
    buf: Vec<u8>,
    err: Option<Error>,
}

impl AttrEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a presence-flag attribute. `false` emits nothing.
    pub fn flag(&mut self, attr_type: u16, value: bool) -> &mut Self {
        if value {
            self.append(attr_type, &[]);
        }
        self
    }

    /// Append a u8 attribute.
    pub fn u8(&mut self, attr_type: u16, value: u8) -> &mut Self {
        self.append(attr_type, &[value]);
        self
    }

    /// Append a u16 attribute (native endian).
    pub fn u16(&mut self, attr_type: u16, value: u16) -> &mut Self {
        self.append(attr_type, &value.to_ne_bytes());
        self
    }

    /// Append a u32 attribute (native endian).
    pub fn u32(&mut self, attr_type: u16, value: u32) -> &mut Self {
        self.append(attr_type, &value.to_ne_bytes());
        self
    }

    /// Append a u64 attribute (native endian).
    pub fn u64(&mut self, attr_type: u16, value: u64) -> &mut Self {
        self.append(attr_type, &value.to_ne_bytes());
        self
    }

    /// Append a NUL-terminated string attribute.
    pub fn string(&mut self, attr_type: u16, value: &str) -> &mut Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        self.append(attr_type, &data);
        self
    }

    /// Append an opaque-bytes attribute.
    pub fn bytes(&mut self, attr_type: u16, value: &[u8]) -> &mut Self {
        self.append(attr_type, value);
        self
    }

    /// Append a nested attribute block built by `f`.
    pub fn nested(&mut self, attr_type: u16, f: impl FnOnce(&mut AttrEncoder)) -> &mut Self {
        let mut inner = AttrEncoder::new();
        f(&mut inner);
        if let Some(e) = inner.err {
            self.err.get_or_insert(e);
            return self;
        }
        let data = inner.buf;
        self.append(attr_type | NLA_F_NESTED, &data);
        self
    }

    /// Finalize and return the encoded attribute stream.
    pub fn encode(self) -> Result<Vec<u8>> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(self.buf),
        }
    }

    fn append(&mut self, attr_type: u16, data: &[u8]) {
        if data.len() > u16::MAX as usize - NLA_HDRLEN {
            self.err.get_or_insert(Error::Encoding(format!(
                "attribute {} payload of {} bytes exceeds the u16 length field",
                attr_type & super::attr::NLA_TYPE_MASK,
                data.len()
            )));
            return;
        }
        let attr = NlAttr::new(attr_type, data.len());
        self.buf.extend_from_slice(attr.as_bytes());
        self.buf.extend_from_slice(data);
        let aligned = nla_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }
}
