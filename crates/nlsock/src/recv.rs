//! Receive state machine (C4, §4.4): turns a raw datagram into zero or more
//! dispatched frames, tracks multipart/sequence state, and classifies
//! terminators.

use nlsock_core::{
    callback::{CbAction, CallbackSet, Hook},
    frame::{self, FrameHeader, HeaderFlags},
    CoreError, Message, NlAddr,
};

use crate::{endpoint::Endpoint, error::NlError};

/// An `ERROR` frame's fixed body: a 4-octet signed code followed by a copy
/// of the original request header (§6).
const ERROR_BODY_LEN: usize = 4 + frame::HDRLEN;

/// `recvmsgs`/`recvmsgs_report` share one loop, parameterized by whether the
/// caller wants the frame count back (§4.4 expansion: "model this as one
/// internal function parameterized by `report`, not two copies").
///
/// States, named per spec.md §4.4's `READING -> PARSING -> {CONTINUE_READING
/// | STOP | ERROR}` machine: each pass through the `'reading` loop is
/// READING (obtain a datagram) followed by PARSING (walk its frames);
/// reaching the end of a multipart batch is CONTINUE_READING (loop back to
/// READING); everything else exits as STOP (success) or ERROR (propagate).
pub fn recvmsgs_with(endpoint: &mut Endpoint, cbs: &CallbackSet, report: bool) -> Result<i32, NlError> {
    // The recvmsgs_override replaces this entire loop (§4.2: "consulted
    // before the built-in implementation").
    if let Some(f) = cbs.recvmsgs_override() {
        return f(endpoint, cbs).map_err(NlError::Aborted);
    }

    let mut nrecv: i32 = 0;
    let mut multipart = false;
    let mut interrupted = false;

    'reading: loop {
        // READING: obtain the next datagram, via recv_override if bound.
        let (buf, src, creds) = if let Some(f) = cbs.recv_override() {
            let buf = f(endpoint).map_err(NlError::Aborted)?;
            (buf, NlAddr::default(), None)
        } else {
            endpoint.recv()?
        };
        if buf.is_empty() {
            return Ok(0);
        }

        // PARSING: walk every well-formed frame in this datagram.
        let mut iter = frame::FrameIter::new(&buf);
        while let Some((header, payload)) = iter.next() {
            let mut msg = Message::from_frame(header, payload);
            msg.set_protocol(endpoint.protocol());
            msg.set_source_addr(src);
            if let Some(creds) = creds {
                msg.set_credentials(creds);
            }

            match dispatch_frame(endpoint, cbs, &msg, header, &mut multipart, &mut interrupted)? {
                FrameOutcome::Continue => nrecv += 1,
                FrameOutcome::Stop => return finish(nrecv + 1, report, interrupted),
            }
        }

        if multipart {
            // CONTINUE_READING
            continue 'reading;
        }

        return finish(nrecv, report, interrupted);
    }
}

/// `recvmsgs`: returns `()` on success (the count is discarded).
pub fn recvmsgs(endpoint: &mut Endpoint) -> Result<(), NlError> {
    let cbs = endpoint.callbacks().get();
    recvmsgs_with(endpoint, &cbs, false).map(|_| ())
}

/// `recvmsgs_report`: returns the count of frames successfully processed.
pub fn recvmsgs_report(endpoint: &mut Endpoint) -> Result<i32, NlError> {
    let cbs = endpoint.callbacks().get();
    recvmsgs_with(endpoint, &cbs, true)
}

fn finish(nrecv: i32, report: bool, interrupted: bool) -> Result<i32, NlError> {
    if interrupted {
        return Err(NlError::Core(CoreError::DumpInterrupted));
    }
    Ok(if report { nrecv } else { 0 })
}

enum FrameOutcome {
    Continue,
    Stop,
}

/// Dispatch a hook. `Ok(None)` means the slot is unbound; callers decide
/// per-site whether that means "apply the hook's documented default
/// action" ([`resolve_default`]) or "apply this site's own built-in
/// consequence" (sequence check, OVERRUN, truncated ERROR, DUMP_INTR).
fn invoke(cbs: &CallbackSet, hook: Hook, msg: &Message) -> Result<Option<CbAction>, NlError> {
    match cbs.invoke(hook, msg) {
        None => Ok(None),
        Some(Ok(action)) => Ok(Some(action)),
        Some(Err(abort)) => Err(NlError::Aborted(abort.0)),
    }
}

/// `invoke`, falling back to `hook.default_action()` when unbound — the
/// §4.2 defaults table entries that are genuinely just a `CbAction`, not a
/// distinct built-in failure.
fn resolve_default(cbs: &CallbackSet, hook: Hook, msg: &Message) -> Result<CbAction, NlError> {
    Ok(invoke(cbs, hook, msg)?.unwrap_or_else(|| hook.default_action()))
}

/// Maps a resolved [`CbAction`] to this frame's outcome for terminator/VALID
/// sites where `Skip` and `Ok` behave identically (the frame is already
/// fully handled either way).
fn continue_unless_stop(action: CbAction) -> FrameOutcome {
    if matches!(action, CbAction::Stop) {
        FrameOutcome::Stop
    } else {
        FrameOutcome::Continue
    }
}

/// Steps b-h of §4.4's per-frame algorithm. Returns `Stop` the moment a hook
/// returns [`CbAction::Stop`]; a hook returning a negative value surfaces
/// that code via `Err(NlError::Aborted)`.
fn dispatch_frame(
    endpoint: &mut Endpoint,
    cbs: &CallbackSet,
    msg: &Message,
    header: FrameHeader,
    multipart: &mut bool,
    interrupted: &mut bool,
) -> Result<FrameOutcome, NlError> {
    // b. MSG_IN: raw observation, precedes all classification.
    match resolve_default(cbs, Hook::MsgIn, msg)? {
        CbAction::Stop => return Ok(FrameOutcome::Stop),
        CbAction::Skip => return Ok(FrameOutcome::Continue),
        CbAction::Ok => {}
    }

    // c. Sequence check: delegate to SEQ_CHECK if bound, else the built-in
    // strict check unless NO_AUTO_ACK suppresses it.
    if let Some(action) = invoke(cbs, Hook::SeqCheck, msg)? {
        match action {
            CbAction::Stop => return Ok(FrameOutcome::Stop),
            CbAction::Skip => return Ok(FrameOutcome::Continue),
            CbAction::Ok => {}
        }
    } else if !endpoint.no_auto_ack() && header.sequence != endpoint.seq_expect() {
        if let Some(action) = invoke(cbs, Hook::Invalid, msg)? {
            match action {
                CbAction::Stop => return Ok(FrameOutcome::Stop),
                CbAction::Skip => return Ok(FrameOutcome::Continue),
                CbAction::Ok => {}
            }
        } else {
            return Err(NlError::Core(CoreError::SeqMismatch {
                expected: endpoint.seq_expect(),
                got: header.sequence,
            }));
        }
    }

    // d. Advance seq_expect on every terminator-like type. NOOP's
    // contribution is configurable (§9 open question); DONE/ERROR/OVERRUN
    // always advance regardless of the MULTI flag.
    let is_noop = header.msg_type == frame::NOOP;
    let advances = matches!(header.msg_type, frame::DONE | frame::ERROR | frame::OVERRUN)
        || (is_noop && endpoint.advance_seq_on_noop());
    if advances {
        endpoint.set_seq_expect(endpoint.seq_expect().wrapping_add(1));
    }

    // e. Multipart tracking.
    if header.flags.contains(HeaderFlags::MULTI) {
        *multipart = true;
    }

    // f. Dump interruption: invoke the hook if bound, else remember the
    // inconsistency and keep draining the batch.
    if header.flags.contains(HeaderFlags::DUMP_INTR) {
        if let Some(action) = invoke(cbs, Hook::DumpIntr, msg)? {
            match action {
                CbAction::Stop => return Ok(FrameOutcome::Stop),
                CbAction::Skip => return Ok(FrameOutcome::Continue),
                CbAction::Ok => {}
            }
        } else {
            tracing::warn!(seq = header.sequence, "netlink dump interrupted");
            *interrupted = true;
        }
    }

    // g. Peer wants an ack. No built-in fallback (§9: SEND_ACK stays a
    // no-op by default).
    if header.flags.ack_requested() {
        if let Some(action) = invoke(cbs, Hook::SendAck, msg)? {
            match action {
                CbAction::Stop => return Ok(FrameOutcome::Stop),
                CbAction::Skip => return Ok(FrameOutcome::Continue),
                CbAction::Ok => {}
            }
        }
    }

    // h. Terminator dispatch by type.
    match header.msg_type {
        frame::DONE => {
            *multipart = false;
            Ok(continue_unless_stop(resolve_default(cbs, Hook::Finish, msg)?))
        }
        frame::NOOP => Ok(continue_unless_stop(resolve_default(cbs, Hook::Skipped, msg)?)),
        frame::OVERRUN => match invoke(cbs, Hook::Overrun, msg)? {
            Some(action) => Ok(continue_unless_stop(action)),
            None => {
                tracing::error!("netlink message overrun");
                Err(NlError::Core(CoreError::MsgOverflow))
            }
        },
        frame::ERROR => dispatch_error(cbs, msg),
        _ => Ok(continue_unless_stop(resolve_default(cbs, Hook::Valid, msg)?)),
    }
}

/// An `ERROR` frame: truncated body, zero inner code (kernel ACK), or
/// nonzero inner code (peer-reported failure) are handled distinctly
/// (§4.4h).
fn dispatch_error(cbs: &CallbackSet, msg: &Message) -> Result<FrameOutcome, NlError> {
    let payload = msg.payload();
    if payload.len() < ERROR_BODY_LEN {
        return match invoke(cbs, Hook::Invalid, msg)? {
            Some(action) => Ok(continue_unless_stop(action)),
            None => Err(NlError::Core(CoreError::MsgTrunc)),
        };
    }

    let inner = i32::from_ne_bytes(payload[0..4].try_into().unwrap());

    if inner == 0 {
        return Ok(continue_unless_stop(resolve_default(cbs, Hook::Ack, msg)?));
    }

    // The error hook's return value mirrors a regular hook's semantics
    // (§4.4h: "return-value semantics mirror regular hooks") — STOP ends the
    // loop successfully, just like FINISH/VALID/etc. above. Only the
    // *unbound* case (no error hook at all) surfaces the translated kernel
    // error as a failure, matching S2's "send_sync returns the translated
    // code for kernel errno 2" when the caller installed no custom handler.
    let source = msg.source_addr().unwrap_or_default();
    match cbs.invoke_error(source, inner) {
        None => {
            tracing::warn!(inner, "netlink peer error, no error hook bound");
            Err(NlError::Peer(std::io::Error::from_raw_os_error(-inner)))
        }
        Some(Ok(action)) => Ok(continue_unless_stop(action)),
        Some(Err(abort)) => Err(NlError::Aborted(abort.0)),
    }
}
