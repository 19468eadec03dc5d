//! Fixed-size frame header, alignment math and the frame iterator (C1, §4.1).

use bitflags::bitflags;

/// Octets a frame (and every TLV) is padded to.
pub const ALIGNTO: usize = 4;

/// Size of [`FrameHeader`] on the wire.
pub const HDRLEN: usize = 16;

/// Reserved message types below this value are transport terminators
/// (`NOOP`/`ERROR`/`DONE`/`OVERRUN`); family payloads start here.
pub const MIN_TYPE: u16 = 0x10;

pub const NOOP: u16 = 1;
pub const ERROR: u16 = 2;
pub const DONE: u16 = 3;
pub const OVERRUN: u16 = 4;

/// Round `len` up to the next multiple of [`ALIGNTO`].
#[inline]
#[must_use]
pub const fn align4(len: usize) -> usize {
    (len + (ALIGNTO - 1)) & !(ALIGNTO - 1)
}

/// `16 + payload`, i.e. the frame size excluding tail padding.
#[inline]
#[must_use]
pub const fn msg_size(payload: usize) -> usize {
    HDRLEN + payload
}

/// `align4(msg_size(payload))`, the frame's footprint in a byte stream.
#[inline]
#[must_use]
pub const fn total_size(payload: usize) -> usize {
    align4(msg_size(payload))
}

/// `total_size(payload) - msg_size(payload)`.
#[inline]
#[must_use]
pub const fn padlen(payload: usize) -> usize {
    total_size(payload) - msg_size(payload)
}

bitflags! {
    /// Frame header flags. Shared by outbound construction and inbound
    /// classification (§3 expansion in SPEC_FULL.md).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u16 {
        const REQUEST       = 0x1;
        const MULTI         = 0x2;
        const ACK           = 0x4;
        const ECHO          = 0x8;
        const DUMP_INTR     = 0x10;
        const DUMP_FILTERED = 0x20;

        const ROOT   = 0x100;
        const MATCH  = 0x200;
        const ATOMIC = 0x400;
        const DUMP   = Self::ROOT.bits() | Self::MATCH.bits();
    }
}

impl HeaderFlags {
    /// Whether a peer requested an ack on this (inbound) frame — the
    /// `ACK_REQUEST` case of spec.md §4.4g. Same bit as outbound `ACK`.
    #[inline]
    #[must_use]
    pub const fn ack_requested(self) -> bool {
        self.contains(Self::ACK)
    }
}

/// The fixed 16-octet frame header (§3).
///
/// `length` always matches the frame's occupied footprint in its buffer; the
/// payload begins at offset [`HDRLEN`] and runs for `length - HDRLEN` octets,
/// followed by `align4(length) - length` zero padding bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub msg_type: u16,
    pub flags: HeaderFlags,
    pub sequence: u32,
    pub port_id: u32,
}

impl FrameHeader {
    /// Parse a header from the first [`HDRLEN`] octets of `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`HDRLEN`]; callers must check via
    /// [`FrameHeader::ok`] first when walking an untrusted stream.
    #[must_use]
    pub fn read(buf: &[u8]) -> Self {
        let length = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let msg_type = u16::from_ne_bytes(buf[4..6].try_into().unwrap());
        let flags = HeaderFlags::from_bits_truncate(u16::from_ne_bytes(buf[6..8].try_into().unwrap()));
        let sequence = u32::from_ne_bytes(buf[8..12].try_into().unwrap());
        let port_id = u32::from_ne_bytes(buf[12..16].try_into().unwrap());
        Self { length, msg_type, flags, sequence, port_id }
    }

    /// Write this header into the first [`HDRLEN`] octets of `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`HDRLEN`].
    pub fn write(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.length.to_ne_bytes());
        buf[4..6].copy_from_slice(&self.msg_type.to_ne_bytes());
        buf[6..8].copy_from_slice(&self.flags.bits().to_ne_bytes());
        buf[8..12].copy_from_slice(&self.sequence.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.port_id.to_ne_bytes());
    }

    /// `length - HDRLEN`, i.e. the payload length excluding the header.
    #[inline]
    #[must_use]
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(HDRLEN)
    }

    /// Whether `msg_type` is one of the reserved terminator types
    /// (`NOOP`/`ERROR`/`DONE`/`OVERRUN`).
    #[inline]
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        self.msg_type < MIN_TYPE
    }
}

/// `true` iff a header is well-formed at the front of a `remaining`-octet
/// window: `remaining >= HDRLEN && header.length >= HDRLEN && header.length
/// <= remaining` (§4.1).
#[inline]
#[must_use]
pub fn frame_ok(remaining: usize) -> bool {
    remaining >= HDRLEN
}

/// Iterates frames in a raw byte stream, per §4.1's `ok`/`next` contract.
///
/// Each step yields the header and its payload slice (unpadded), and
/// advances by `align4(header.length)`. Stops as soon as a header is not
/// `ok` (truncated header, or `length` outside `[HDRLEN, remaining]`).
pub struct FrameIter<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> FrameIter<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Octets not yet consumed.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = (FrameHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.remaining();
        if !frame_ok(remaining) {
            return None;
        }
        let window = &self.buf[self.offset..];
        let header = FrameHeader::read(window);
        if header.length < HDRLEN as u32 || header.length as usize > remaining {
            return None;
        }
        let payload = &window[HDRLEN..header.length as usize];
        self.offset += align4(header.length as usize);
        Some((header, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_math() {
        assert_eq!(msg_size(0), 16);
        assert_eq!(total_size(0), 16);
        assert_eq!(padlen(0), 0);
        assert_eq!(msg_size(5), 21);
        assert_eq!(total_size(5), 24);
        assert_eq!(padlen(5), 3);
        assert_eq!(align4(13), 16);
        assert_eq!(align4(16), 16);
    }

    #[test]
    fn header_round_trip() {
        let mut buf = [0u8; HDRLEN];
        let h = FrameHeader {
            length: 16,
            msg_type: 0x10,
            flags: HeaderFlags::REQUEST | HeaderFlags::ACK,
            sequence: 42,
            port_id: 7,
        };
        h.write(&mut buf);
        let parsed = FrameHeader::read(&buf);
        assert_eq!(parsed, h);
    }

    #[test]
    fn iterate_multipart_batch() {
        // Two MULTI frames with empty payload, then a DONE frame.
        let mut buf = Vec::new();
        for (msg_type, flags) in
            [(0x10, HeaderFlags::MULTI), (0x10, HeaderFlags::MULTI), (DONE, HeaderFlags::MULTI)]
        {
            let h = FrameHeader { length: 16, msg_type, flags, sequence: 1, port_id: 1 };
            let mut hdr_buf = [0u8; HDRLEN];
            h.write(&mut hdr_buf);
            buf.extend_from_slice(&hdr_buf);
        }

        let mut iter = FrameIter::new(&buf);
        let mut count = 0;
        while let Some((h, payload)) = iter.next() {
            assert!(payload.is_empty());
            count += 1;
            let _ = h;
        }
        assert_eq!(count, 3);
        assert_eq!(iter.remaining(), 0);
    }

    #[test]
    fn truncated_header_stops_iteration() {
        let buf = [0u8; 10];
        let mut iter = FrameIter::new(&buf);
        assert!(iter.next().is_none());
    }

    #[test]
    fn oversized_length_stops_iteration() {
        let mut buf = [0u8; 16];
        let h = FrameHeader { length: 100, msg_type: 0x10, flags: HeaderFlags::empty(), sequence: 0, port_id: 0 };
        h.write(&mut buf);
        let mut iter = FrameIter::new(&buf);
        assert!(iter.next().is_none());
    }
}
