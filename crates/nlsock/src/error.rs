//! Socket-facing error taxonomy (§7). Wraps [`nlsock_core::CoreError`] for
//! the protocol-violation and resource variants; adds the configuration and
//! transport kinds that only make sense once a kernel fd is involved.

use nlsock_core::{CallbackError, CoreError};
use thiserror::Error;

/// Every fallible operation in this crate returns `Result<T, NlError>`
/// internally; the public send/recv entry points negate a variant's
/// [`NlError::code`] to the `i32` spec.md §7 documents ("a negative code").
#[derive(Error, Debug)]
pub enum NlError {
    #[error("socket already connected")]
    BadSocket,

    #[error("no local address")]
    NoAddress,

    #[error("address family not supported")]
    AfNotSupported,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    /// Transport errno, translated from `std::io::Error`. `EINTR` is
    /// retried before construction and `EAGAIN`/`EWOULDBLOCK` short-circuits
    /// to `Ok(0)` at the `recv` call site; neither ever reaches here (§7).
    #[error("transport error: {0}")]
    Sys(#[source] std::io::Error),

    /// A kernel `ERROR` frame carried a nonzero inner code with no error
    /// hook bound (§4.4h); wraps the translated errno.
    #[error("peer reported error: {0}")]
    Peer(#[source] std::io::Error),

    /// A hook returned a negative value, aborting the receive loop and
    /// surfacing that value verbatim (§4.2: "any negative value is a
    /// library error code and aborts the loop").
    #[error("callback aborted with code {0}")]
    Aborted(i32),
}

impl NlError {
    /// Fixed numeric codes exposed as the negated return value of public
    /// send/recv entry points (§6, §7). Transport/peer errors reuse the
    /// underlying `errno` (negated) rather than a library-private constant,
    /// matching the original's `nl_syserr2nlerr` passthrough for codes it
    /// doesn't special-case.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::BadSocket => -1,
            Self::NoAddress => -2,
            Self::AfNotSupported => -3,
            Self::Core(CoreError::OutOfMemory(_)) => -4,
            Self::Core(CoreError::Range) => -5,
            Self::Core(CoreError::SeqMismatch { .. }) => -6,
            Self::Core(CoreError::MsgOverflow) => -7,
            Self::Core(CoreError::MsgTrunc) => -8,
            Self::Core(CoreError::DumpInterrupted) => -9,
            Self::Callback(CallbackError::OverRelease) => -10,
            Self::Sys(e) | Self::Peer(e) => {
                -e.raw_os_error().unwrap_or(libc::EIO)
            }
            Self::Aborted(code) => *code,
        }
    }

    pub(crate) fn from_errno(e: std::io::Error) -> Self {
        Self::Sys(e)
    }
}
