//! TLV attribute header, iteration, lookup and policy-validated parsing
//! (§3, §4.1).

use crate::frame::align4;

pub use crate::error::AttrError;

/// High bit of an attribute's `type`: the payload is itself a nested TLV
/// stream.
pub const NLA_F_NESTED: u16 = 1 << 15;
/// High bit of an attribute's `type`: the payload is network byte order.
/// Carried but not interpreted by this crate (per-family concern).
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;

const TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// 4-octet TLV header: `{ len: u16, type: u16 }` followed by `len - 4`
/// payload octets, padded to 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrHeader {
    pub len: u16,
    pub attr_type: u16,
}

impl AttrHeader {
    pub const HDRLEN: usize = 4;

    #[must_use]
    pub fn read(buf: &[u8]) -> Self {
        let len = u16::from_ne_bytes(buf[0..2].try_into().unwrap());
        let attr_type = u16::from_ne_bytes(buf[2..4].try_into().unwrap());
        Self { len, attr_type }
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(&self.len.to_ne_bytes());
        buf[2..4].copy_from_slice(&self.attr_type.to_ne_bytes());
    }

    /// `attr_type` with the nested/byteorder high bits masked off.
    #[must_use]
    pub const fn kind(&self) -> u16 {
        self.attr_type & TYPE_MASK
    }

    #[must_use]
    pub const fn is_nested(&self) -> bool {
        self.attr_type & NLA_F_NESTED != 0
    }

    #[must_use]
    pub fn payload_len(&self) -> usize {
        (self.len as usize).saturating_sub(Self::HDRLEN)
    }
}

/// A single parsed attribute: header plus its (unpadded) payload slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr<'a> {
    pub header: AttrHeader,
    pub payload: &'a [u8],
}

/// Iterates a TLV stream, yielding one [`Attr`] per entry. Stops as soon as
/// an entry is malformed (truncated header, or `len` outside the remaining
/// window) — mirrors [`crate::frame::FrameIter`].
pub struct AttrIter<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> AttrIter<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Attr<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.buf.len() - self.offset;
        if remaining < AttrHeader::HDRLEN {
            return None;
        }
        let window = &self.buf[self.offset..];
        let header = AttrHeader::read(window);
        if (header.len as usize) < AttrHeader::HDRLEN || header.len as usize > remaining {
            return None;
        }
        let payload = &window[AttrHeader::HDRLEN..header.len as usize];
        self.offset += align4(header.len as usize);
        Some(Attr { header, payload })
    }
}

/// Returns the first attribute in `buf` whose [`AttrHeader::kind`] matches
/// `attr_type`, if any.
#[must_use]
pub fn find(buf: &[u8], attr_type: u16) -> Option<Attr<'_>> {
    AttrIter::new(buf).find(|a| a.header.kind() == attr_type)
}

/// Walk a nested attribute's payload as its own TLV stream, with the same
/// truncation/bounds rules as a top-level one. `attr` need not have its
/// [`NLA_F_NESTED`] bit set — the bit only advertises the convention to
/// readers, it isn't load-bearing for iteration.
#[must_use]
pub fn iter_nested<'a>(attr: &Attr<'a>) -> AttrIter<'a> {
    AttrIter::new(attr.payload)
}

/// Per-type validation rule for [`parse`].
#[derive(Debug, Clone, Copy)]
pub enum AttrKind {
    Unspec,
    U8,
    U16,
    U32,
    U64,
    /// Minimum payload length (a `NUL`-terminated or plain string).
    String { min_len: usize, max_len: Option<usize> },
    Flag,
    /// Arbitrary binary payload with an optional length bound.
    Binary { min_len: usize, max_len: Option<usize> },
    /// A nested TLV stream; `min_len` bounds the inner stream's size.
    Nested { min_len: usize },
}

impl AttrKind {
    fn validate(self, payload_len: usize) -> bool {
        match self {
            Self::Unspec => true,
            Self::U8 => payload_len == 1,
            Self::U16 => payload_len == 2,
            Self::U32 => payload_len == 4,
            Self::U64 => payload_len == 8,
            Self::String { min_len, max_len } | Self::Binary { min_len, max_len } => {
                payload_len >= min_len && max_len.is_none_or(|max| payload_len <= max)
            }
            Self::Flag => payload_len == 0,
            Self::Nested { min_len } => payload_len >= min_len,
        }
    }
}

/// One policy entry: the validation rule for a given attribute type.
#[derive(Debug, Clone, Copy)]
pub struct PolicyEntry {
    pub attr_type: u16,
    pub kind: AttrKind,
}

/// A table of [`PolicyEntry`] values, indexed by attribute type for
/// [`parse`].
pub type Policy<'a> = &'a [PolicyEntry];

/// Walk `buf`'s TLV stream and produce a dense `0..=maxtype` index of
/// present attributes, validating each against `policy`.
///
/// A type beyond `maxtype`, or absent from `policy`, is ignored
/// (forward-compatibility with attributes from a newer peer). A present,
/// policed type that fails validation is `Err(AttrError::Invalid(type))`.
pub fn parse<'a>(
    buf: &'a [u8],
    maxtype: u16,
    policy: Policy<'_>,
) -> Result<Vec<Option<Attr<'a>>>, AttrError> {
    let mut table = vec![None; maxtype as usize + 1];
    for attr in AttrIter::new(buf) {
        let kind = attr.header.kind();
        if kind > maxtype {
            continue;
        }
        if let Some(entry) = policy.iter().find(|e| e.attr_type == kind) {
            if !entry.kind.validate(attr.payload.len()) {
                return Err(AttrError::Invalid(kind));
            }
        }
        table[kind as usize] = Some(attr);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(attrs: &[(u16, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        for &(attr_type, payload) in attrs {
            let header = AttrHeader { len: (AttrHeader::HDRLEN + payload.len()) as u16, attr_type };
            let mut hdr_buf = [0u8; AttrHeader::HDRLEN];
            header.write(&mut hdr_buf);
            buf.extend_from_slice(&hdr_buf);
            buf.extend_from_slice(payload);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        }
        buf
    }

    #[test]
    fn find_first_match() {
        let buf = build(&[(1, b"a"), (2, b"bb"), (1, b"second")]);
        let a = find(&buf, 1).unwrap();
        assert_eq!(a.payload, b"a");
    }

    #[test]
    fn iterate_in_order_with_identical_payloads() {
        let buf = build(&[(3, b"one"), (4, b"two"), (5, b"three")]);
        let collected: Vec<_> = AttrIter::new(&buf).map(|a| (a.header.kind(), a.payload.to_vec())).collect();
        assert_eq!(
            collected,
            vec![(3, b"one".to_vec()), (4, b"two".to_vec()), (5, b"three".to_vec())]
        );
    }

    #[test]
    fn parse_builds_dense_table() {
        let buf = build(&[(1, &4u32.to_ne_bytes()), (2, b"hi")]);
        let policy = [
            PolicyEntry { attr_type: 1, kind: AttrKind::U32 },
            PolicyEntry { attr_type: 2, kind: AttrKind::String { min_len: 1, max_len: None } },
        ];
        let table = parse(&buf, 2, &policy).unwrap();
        assert!(table[1].is_some());
        assert!(table[2].is_some());
        assert_eq!(table[1].unwrap().payload, 4u32.to_ne_bytes());
    }

    #[test]
    fn parse_rejects_policy_violation() {
        let buf = build(&[(1, b"not 4 bytes")]);
        let policy = [PolicyEntry { attr_type: 1, kind: AttrKind::U32 }];
        assert!(parse(&buf, 1, &policy).is_err());
    }

    #[test]
    fn parse_ignores_types_past_maxtype() {
        let buf = build(&[(1, b"x"), (99, b"ignored")]);
        let policy = [PolicyEntry { attr_type: 1, kind: AttrKind::Unspec }];
        let table = parse(&buf, 1, &policy).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table[1].is_some());
    }

    #[test]
    fn nested_bit_is_masked_from_kind() {
        let header = AttrHeader { len: 4, attr_type: 5 | NLA_F_NESTED };
        assert_eq!(header.kind(), 5);
        assert!(header.is_nested());
    }

    #[test]
    fn iter_nested_walks_inner_stream() {
        let inner = build(&[(1, b"a"), (2, b"bb")]);
        let outer = build(&[(10 | NLA_F_NESTED, &inner)]);
        let group = find(&outer, 10).unwrap();
        assert!(group.header.is_nested());
        let collected: Vec<_> = iter_nested(&group).map(|a| (a.header.kind(), a.payload.to_vec())).collect();
        assert_eq!(collected, vec![(1, b"a".to_vec()), (2, b"bb".to_vec())]);
    }
}
