//! Socket engine (C3, §4.3): lifecycle, identity assignment, the send path
//! with auto-completion, and the receive path with buffer auto-growth.

use std::{
    os::fd::RawFd,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use bitflags::bitflags;
use nlsock_core::{
    callback::{CbAction, Hook, Kind, Transport},
    frame::HeaderFlags,
    CallbackSet, Credentials, Message, NlAddr, AUTO_PORT, AUTO_SEQ,
};

use crate::{error::NlError, raw, recv};

/// One page on common Linux configurations; the default receive buffer size
/// when the caller never calls [`Endpoint::set_bufsize`] (§4.3).
const DEFAULT_BUFSIZE: usize = 4096;

bitflags! {
    /// Endpoint bookkeeping flags (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EndpointFlags: u8 {
        const BUFSIZE_SET = 0x1;
        const NO_AUTO_ACK = 0x2;
        const PASSCRED    = 0x4;
        const PEEK        = 0x8;
    }
}

/// A single-owner netlink-style client endpoint (§3, §5: not safe for
/// concurrent use by multiple owners — allocate one per thread).
pub struct Endpoint {
    fd: RawFd,
    local_addr: NlAddr,
    peer_addr: NlAddr,
    protocol: i32,
    seq_next: u32,
    seq_expect: u32,
    flags: EndpointFlags,
    bufsize: usize,
    advance_seq_on_noop: bool,
    callbacks: CallbackSet,
}

impl Endpoint {
    /// Allocate an unconnected endpoint bound to `callbacks`. Both sequence
    /// counters are seeded from a process-stable clock source (§3) so two
    /// endpoints created moments apart don't collide on sequence numbers.
    #[must_use]
    pub fn new(callbacks: CallbackSet) -> Self {
        let seed = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs() as u32);
        Self {
            fd: -1,
            local_addr: NlAddr::default(),
            peer_addr: NlAddr::default(),
            protocol: 0,
            seq_next: seed,
            seq_expect: seed,
            flags: EndpointFlags::empty(),
            bufsize: DEFAULT_BUFSIZE,
            advance_seq_on_noop: true,
            callbacks,
        }
    }

    /// Create a raw datagram socket, bind it and read back the kernel-
    /// assigned local address (§4.3). Fails with [`NlError::BadSocket`] if
    /// this endpoint is already connected.
    pub fn connect(&mut self, protocol: i32) -> Result<(), NlError> {
        if self.fd != -1 {
            return Err(NlError::BadSocket);
        }

        let fd = raw::open_socket(protocol)?;
        let result = (|| {
            if !self.flags.contains(EndpointFlags::BUFSIZE_SET) {
                raw::set_rcvbuf(fd, self.bufsize)?;
            }
            if self.flags.contains(EndpointFlags::PASSCRED) {
                raw::set_passcred(fd, true)?;
            }
            raw::bind(fd, NlAddr::new(AUTO_PORT))?;
            raw::getsockname(fd)
        })();

        match result {
            Ok(local_addr) => {
                self.fd = fd;
                self.local_addr = local_addr;
                self.peer_addr = NlAddr::new(0);
                self.protocol = protocol;
                tracing::debug!(port = local_addr.port_id, protocol, "netlink endpoint connected");
                Ok(())
            }
            Err(err) => {
                raw::close(fd);
                Err(err)
            }
        }
    }

    /// Close the transport and reset protocol; idempotent.
    pub fn close(&mut self) {
        if self.fd >= 0 {
            raw::close(self.fd);
            self.fd = -1;
            tracing::debug!("netlink endpoint closed");
        }
        self.protocol = 0;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.fd >= 0
    }

    #[must_use]
    pub fn local_port(&self) -> u32 {
        self.local_addr.port_id
    }

    pub fn set_local_port(&mut self, port_id: u32) {
        self.local_addr.port_id = port_id;
    }

    #[must_use]
    pub fn peer_port(&self) -> u32 {
        self.peer_addr.port_id
    }

    pub fn set_peer_port(&mut self, port_id: u32) {
        self.peer_addr.port_id = port_id;
    }

    pub fn set_bufsize(&mut self, size: usize) {
        self.bufsize = size;
        self.flags.insert(EndpointFlags::BUFSIZE_SET);
    }

    pub fn set_no_auto_ack(&mut self, enable: bool) {
        self.flags.set(EndpointFlags::NO_AUTO_ACK, enable);
    }

    #[must_use]
    pub fn no_auto_ack(&self) -> bool {
        self.flags.contains(EndpointFlags::NO_AUTO_ACK)
    }

    /// §9 open question: whether `seq_expect` advances on every terminator
    /// type including `NOOP` (default `true`, matching the grounding
    /// source literally) or only on frames that actually close a request.
    pub fn set_advance_seq_on_noop(&mut self, enable: bool) {
        self.advance_seq_on_noop = enable;
    }

    #[must_use]
    pub(crate) fn advance_seq_on_noop(&self) -> bool {
        self.advance_seq_on_noop
    }

    pub fn set_peek(&mut self, enable: bool) {
        self.flags.set(EndpointFlags::PEEK, enable);
    }

    /// Enable `SO_PASSCRED` so credentials accompany every inbound message.
    /// Must be called before [`Endpoint::connect`] to take effect at bind
    /// time; calling it after reconnect re-applies the socket option.
    pub fn set_passcred(&mut self, enable: bool) -> Result<(), NlError> {
        self.flags.set(EndpointFlags::PASSCRED, enable);
        if self.fd >= 0 {
            raw::set_passcred(self.fd, enable)?;
        }
        Ok(())
    }

    /// Toggle `O_NONBLOCK` (§4.3 expansion) — what makes `EAGAIN -> Ok(0)`
    /// observable instead of blocking forever.
    pub fn set_nonblocking(&mut self, enable: bool) -> Result<(), NlError> {
        raw::set_nonblocking(self.fd, enable)
    }

    #[must_use]
    pub fn callbacks(&self) -> &CallbackSet {
        &self.callbacks
    }

    #[must_use]
    pub(crate) fn seq_expect(&self) -> u32 {
        self.seq_expect
    }

    pub(crate) fn set_seq_expect(&mut self, seq: u32) {
        self.seq_expect = seq;
    }

    pub(crate) fn protocol(&self) -> i32 {
        self.protocol
    }

    pub(crate) fn local_addr(&self) -> NlAddr {
        self.local_addr
    }

    /// Fill in sentinel header fields: port id, sequence, protocol, and the
    /// `REQUEST`/`ACK` flags (§4.3 auto-completion steps 1-5). Idempotent
    /// once the sentinels have been replaced (§8 property 5).
    pub fn auto_complete(&mut self, msg: &mut Message) {
        let mut header = msg.header();
        if header.port_id == AUTO_PORT {
            header.port_id = self.local_addr.port_id;
        }
        if header.sequence == AUTO_SEQ {
            header.sequence = self.seq_next;
            self.seq_next += 1;
        }
        if msg.protocol() == -1 {
            msg.set_protocol(self.protocol);
        }
        header.flags |= HeaderFlags::REQUEST;
        if !self.flags.contains(EndpointFlags::NO_AUTO_ACK) {
            header.flags |= HeaderFlags::ACK;
        }
        // `payload == 0` means this only overwrites header fields in place;
        // it never reserves, so it cannot fail (§4.1 `put_header` contract).
        msg.put_header(header.port_id, header.sequence, header.msg_type, 0, header.flags)
            .expect("header field overwrite cannot fail with payload = 0");
    }

    /// Write one complete datagram, without auto-completion. Invokes the
    /// `MSG_OUT` hook first; a bound hook returning `Skip`/`Stop` suppresses
    /// the write and returns `Ok(0)`, a negative return aborts with that
    /// code (§4.3, mirroring the grounding source's `nl_sendmsg`). The
    /// destination is `msg`'s own `dest_addr` if set, else the endpoint's
    /// peer. Attaches one `SCM_CREDENTIALS` record if `msg` carries
    /// credentials.
    pub fn send(&mut self, msg: &Message) -> Result<isize, NlError> {
        match self.callbacks.invoke(Hook::MsgOut, msg) {
            None | Some(Ok(CbAction::Ok)) => {}
            Some(Ok(CbAction::Skip | CbAction::Stop)) => return Ok(0),
            Some(Err(abort)) => return Err(NlError::Aborted(abort.0)),
        }

        let dest = msg.dest_addr().unwrap_or(self.peer_addr);
        let n = raw::send_to(self.fd, dest, msg.as_bytes(), msg.credentials())?;
        tracing::debug!(bytes = n, port = dest.port_id, "netlink frame sent");
        Ok(n)
    }

    /// `auto_complete` then dispatch via `send_override` if bound, else
    /// [`Endpoint::send`] (§4.3).
    pub fn send_auto(&mut self, msg: &mut Message) -> Result<isize, NlError> {
        self.auto_complete(msg);
        if let Some(f) = self.callbacks.send_override() {
            return f(self, msg).map_err(NlError::Aborted);
        }
        self.send(msg)
    }

    /// `send_auto` followed by `wait_for_ack`; `msg` is owned and therefore
    /// dropped regardless of outcome (§4.3, §8 property 9).
    pub fn send_sync(&mut self, mut msg: Message) -> Result<i32, NlError> {
        let sent = self.send_auto(&mut msg);
        drop(msg);
        sent?;
        self.wait_for_ack()
    }

    /// One `recvmsg()`, with the `PEEK`-sizing pass and buffer auto-grow
    /// contract of §4.3. Returns the octet count (`0` on `EAGAIN`).
    pub fn recv(&mut self) -> Result<(Vec<u8>, NlAddr, Option<Credentials>), NlError> {
        let mut peek = self.flags.contains(EndpointFlags::PEEK);
        let want_creds = self.flags.contains(EndpointFlags::PASSCRED);
        let mut control_len = if want_creds { 64 } else { 0 };
        let mut buf_len = self.bufsize;

        loop {
            let mut buf = vec![0u8; buf_len];
            let outcome = match raw::recv_once(self.fd, &mut buf, control_len, peek) {
                Ok(o) => o,
                Err(NlError::Sys(e)) if e.raw_os_error() == Some(libc::EINTR) => {
                    tracing::debug!("recvmsg() returned EINTR, retrying");
                    continue;
                }
                Err(NlError::Sys(e)) if matches!(e.raw_os_error(), Some(libc::EAGAIN)) => {
                    return Ok((Vec::new(), NlAddr::default(), None));
                }
                Err(err) => return Err(err),
            };

            if outcome.n == 0 {
                return Ok((Vec::new(), NlAddr::default(), None));
            }

            if outcome.ctrunc {
                control_len *= 2;
                tracing::debug!(control_len, "netlink recv: ancillary buffer truncated, growing");
                continue;
            }

            if (outcome.n as usize) > buf_len || outcome.msg_trunc {
                buf_len = outcome.n as usize;
                tracing::debug!(buf_len, "netlink recv: payload buffer grown");
                continue;
            }

            if peek {
                // Buffer is now known to be large enough; do the real,
                // non-peeking read (mirrors the grounding source's second
                // pass once sizing is settled).
                peek = false;
                continue;
            }

            if !outcome.namelen_ok {
                return Err(NlError::NoAddress);
            }

            buf.truncate(outcome.n as usize);
            return Ok((buf, outcome.src, outcome.creds));
        }
    }

    /// Dispatch the `ACK` hook with a one-off handler that returns `Stop`,
    /// via a deep-cloned callback set (§4.4, §9).
    pub fn wait_for_ack(&mut self) -> Result<i32, NlError> {
        let cbs = self.callbacks.clone_deep();
        cbs.set(Hook::Ack, Kind::Custom(Arc::new(|_msg| Ok(CbAction::Stop))));
        recv::recvmsgs_with(self, &cbs, false)
    }

    /// Send a single request and capture the first `VALID` frame's parsed
    /// object (§4.4). `parser` receives the raw [`Message`]; only its first
    /// invocation's result is retained.
    pub fn pickup<T: Send + 'static>(
        &mut self,
        parser: impl Fn(&Message) -> T + Send + Sync + 'static,
    ) -> Result<Option<T>, NlError> {
        let result: Arc<Mutex<Option<T>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        let cbs = self.callbacks.clone_deep();
        cbs.set(
            Hook::Valid,
            Kind::Custom(Arc::new(move |msg: &Message| {
                let mut guard = slot.lock().expect("pickup result mutex poisoned");
                if guard.is_none() {
                    *guard = Some(parser(msg));
                }
                Ok(CbAction::Stop)
            })),
        );
        recv::recvmsgs_with(self, &cbs, false)?;
        Ok(result.lock().expect("pickup result mutex poisoned").take())
    }
}

impl Transport for Endpoint {
    fn raw_send(&mut self, msg: &Message) -> Result<isize, i32> {
        self.send(msg).map_err(|e| e.code())
    }

    fn raw_recv(&mut self) -> Result<Vec<u8>, i32> {
        self.recv().map(|(buf, _, _)| buf).map_err(|e| e.code())
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        let mut ep = Endpoint::new(CallbackSet::alloc(nlsock_core::callback::Preset::Default));
        ep.local_addr = NlAddr::new(1234);
        ep
    }

    #[test]
    fn auto_complete_fills_sentinels_once() {
        let mut ep = endpoint();
        let mut msg = Message::alloc_simple(0x10, HeaderFlags::empty());
        ep.auto_complete(&mut msg);

        let h = msg.header();
        assert_eq!(h.port_id, 1234);
        assert_ne!(h.sequence, AUTO_SEQ);
        assert!(h.flags.contains(HeaderFlags::REQUEST));
        assert!(h.flags.contains(HeaderFlags::ACK));
        assert_eq!(msg.protocol(), ep.protocol());
    }

    #[test]
    fn auto_complete_is_idempotent_once_sentinels_are_gone() {
        let mut ep = endpoint();
        let mut msg = Message::alloc_simple(0x10, HeaderFlags::empty());
        ep.auto_complete(&mut msg);
        let first = msg.header();

        // A second pass must not touch port/seq again, nor double-OR flags.
        ep.auto_complete(&mut msg);
        let second = msg.header();
        assert_eq!(first, second);
    }

    #[test]
    fn no_auto_ack_suppresses_ack_flag() {
        let mut ep = endpoint();
        ep.set_no_auto_ack(true);
        let mut msg = Message::alloc_simple(0x10, HeaderFlags::empty());
        ep.auto_complete(&mut msg);
        assert!(!msg.header().flags.contains(HeaderFlags::ACK));
        assert!(msg.header().flags.contains(HeaderFlags::REQUEST));
    }
}
