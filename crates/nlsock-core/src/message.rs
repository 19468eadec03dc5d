//! Owned, mutable message buffer (§3, §4.1's `reserve`/`append`/`put_header`).

use bitflags::bitflags;

use crate::{
    addr::{Credentials, NlAddr},
    error::CoreError,
    frame::{align4, FrameHeader, HeaderFlags, ALIGNTO, HDRLEN},
};

bitflags! {
    /// Internal bookkeeping flags on a [`Message`], distinct from the frame
    /// header's own [`HeaderFlags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct MessageFlags: u8 {
        const CREDS_PRESENT = 0x1;
    }
}

/// An owned frame buffer under construction, or a received frame copied out
/// of the endpoint's receive buffer.
///
/// Invariants (§8 property 1): after any public mutation, `header().length
/// == buffer.len()` and `buffer.len() % 4 == 0`.
#[derive(Debug, Clone)]
pub struct Message {
    buf: Vec<u8>,
    /// -1 means unset; filled in by the endpoint on send/receive.
    protocol: i32,
    source_addr: Option<NlAddr>,
    dest_addr: Option<NlAddr>,
    credentials: Option<Credentials>,
    flags: MessageFlags,
}

impl Message {
    /// Allocate an empty message: just the zeroed 16-octet header skeleton.
    #[must_use]
    pub fn alloc() -> Self {
        let mut buf = vec![0u8; HDRLEN];
        let h = FrameHeader { length: HDRLEN as u32, msg_type: 0, flags: HeaderFlags::empty(), sequence: 0, port_id: 0 };
        h.write(&mut buf);
        Self { buf, protocol: -1, source_addr: None, dest_addr: None, credentials: None, flags: MessageFlags::empty() }
    }

    /// Allocate with header fields already filled in and `flags` set
    /// (`nlmsg_alloc_simple` in the grounding source).
    #[must_use]
    pub fn alloc_simple(msg_type: u16, flags: HeaderFlags) -> Self {
        let mut msg = Self::alloc();
        msg.put_header(crate::addr::AUTO_PORT, crate::addr::AUTO_SEQ, msg_type, 0, flags)
            .expect("empty payload reservation cannot fail");
        msg
    }

    /// Reconstruct a [`Message`] from a complete frame slice (header +
    /// payload, as produced by the receive path).
    #[must_use]
    pub fn from_frame(header: FrameHeader, payload: &[u8]) -> Self {
        let mut buf = vec![0u8; HDRLEN];
        header.write(&mut buf);
        buf.extend_from_slice(payload);
        let pad = align4(buf.len()) - buf.len();
        buf.extend(std::iter::repeat(0u8).take(pad));
        Self { buf, protocol: -1, source_addr: None, dest_addr: None, credentials: None, flags: MessageFlags::empty() }
    }

    #[must_use]
    pub fn header(&self) -> FrameHeader {
        FrameHeader::read(&self.buf)
    }

    fn set_header(&mut self, header: FrameHeader) {
        header.write(&mut self.buf);
    }

    /// The full frame buffer (header + payload + tail padding).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        let len = self.header().payload_len();
        &self.buf[HDRLEN..HDRLEN + len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.header().payload_len();
        &mut self.buf[HDRLEN..HDRLEN + len]
    }

    #[must_use]
    pub fn protocol(&self) -> i32 {
        self.protocol
    }

    pub fn set_protocol(&mut self, protocol: i32) {
        self.protocol = protocol;
    }

    #[must_use]
    pub fn source_addr(&self) -> Option<NlAddr> {
        self.source_addr
    }

    pub fn set_source_addr(&mut self, addr: NlAddr) {
        self.source_addr = Some(addr);
    }

    #[must_use]
    pub fn dest_addr(&self) -> Option<NlAddr> {
        self.dest_addr
    }

    pub fn set_dest_addr(&mut self, addr: NlAddr) {
        self.dest_addr = Some(addr);
    }

    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials
    }

    pub fn set_credentials(&mut self, creds: Credentials) {
        self.credentials = Some(creds);
        self.flags.insert(MessageFlags::CREDS_PRESENT);
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.flags.contains(MessageFlags::CREDS_PRESENT)
    }

    /// Grow the buffer's tail by `align(len, pad)` octets if `pad > 0`, else
    /// by exactly `len`; zero the trailing padding; update `header.length`
    /// atomically with the grow. Returns the byte offset (from the start of
    /// the buffer) of the newly reserved region.
    ///
    /// Previously returned offsets/slices into the payload remain valid as
    /// *offsets*, but any borrowed `&[u8]`/`&mut [u8]` taken before this call
    /// must be re-acquired (§4.1, §9: "return an offset, not a pointer").
    pub fn reserve(&mut self, len: usize, pad: usize) -> Result<usize, CoreError> {
        let tlen = if pad > 0 { align4_to(len, pad) } else { len };
        let old_len = self.buf.len();
        self.buf
            .try_reserve(tlen)
            .map_err(|_| CoreError::OutOfMemory(tlen))?;
        self.buf.resize(old_len + tlen, 0);
        if tlen > len {
            self.buf[old_len + len..old_len + tlen].fill(0);
        }

        let mut header = self.header();
        header.length = (header.length as usize + tlen) as u32;
        self.set_header(header);

        Ok(old_len)
    }

    /// `reserve` then copy `data` into the reserved region.
    pub fn append(&mut self, data: &[u8], pad: usize) -> Result<(), CoreError> {
        let off = self.reserve(data.len(), pad)?;
        self.buf[off..off + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Overwrite the header fields and, if `payload > 0`, reserve
    /// `align4(payload)` additional octets for it.
    ///
    /// Precondition: the buffer already holds at least the 16-octet header
    /// skeleton — true of every allocation path in this module.
    pub fn put_header(
        &mut self,
        port_id: u32,
        sequence: u32,
        msg_type: u16,
        payload: usize,
        flags: HeaderFlags,
    ) -> Result<(), CoreError> {
        debug_assert!(self.buf.len() >= HDRLEN);
        let mut header = self.header();
        header.msg_type = msg_type;
        header.flags = flags;
        header.port_id = port_id;
        header.sequence = sequence;
        self.set_header(header);

        if payload > 0 {
            self.reserve(payload, ALIGNTO)?;
        }
        Ok(())
    }
}

#[inline]
fn align4_to(len: usize, pad: usize) -> usize {
    (len + (pad - 1)) & !(pad - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_aligned_and_consistent() {
        let msg = Message::alloc();
        assert_eq!(msg.header().length as usize, msg.as_bytes().len());
        assert_eq!(msg.as_bytes().len() % 4, 0);
    }

    #[test]
    fn reserve_zeros_padding_and_grows_header() {
        let mut msg = Message::alloc();
        let before = msg.header().length;
        let off = msg.reserve(5, ALIGNTO).unwrap();
        assert_eq!(msg.header().length, before + 8); // align4(5) == 8
        assert_eq!(&msg.as_bytes()[off + 5..off + 8], &[0, 0, 0]);
        assert_eq!(msg.as_bytes().len() % 4, 0);
    }

    #[test]
    fn append_round_trips_bytes() {
        let mut msg = Message::alloc();
        msg.append(b"hello", ALIGNTO).unwrap();
        assert_eq!(&msg.payload()[..5], b"hello");
    }

    #[test]
    fn put_header_round_trip() {
        let mut msg = Message::alloc();
        msg.put_header(7, 42, 0x10, 4, HeaderFlags::REQUEST).unwrap();
        let h = msg.header();
        assert_eq!(h.port_id, 7);
        assert_eq!(h.sequence, 42);
        assert_eq!(h.msg_type, 0x10);
        assert_eq!(h.flags, HeaderFlags::REQUEST);
        assert_eq!(msg.header().length as usize, HDRLEN + 4);
    }
}
