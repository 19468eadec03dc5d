//! Framing, TLV attributes and the hook dispatch table for a netlink-style
//! control-plane protocol (C1 + C2 of the design).
//!
//! This crate has no knowledge of sockets; it is pure byte-buffer and table
//! logic, unit-testable without a kernel. The socket engine and receive
//! state machine live in the `nlsock` crate.

pub mod addr;
pub mod attr;
pub mod callback;
pub mod error;
pub mod frame;
pub mod message;

pub use addr::{Credentials, NlAddr, AUTO_PORT, AUTO_SEQ};
pub use attr::{
    find, iter_nested, parse, Attr, AttrError, AttrHeader, AttrIter, AttrKind, Policy, PolicyEntry,
    NLA_F_NESTED, NLA_F_NET_BYTEORDER,
};
pub use callback::{
    Abort, CbAction, CbResult, CallbackSet, ErrHookFn, ErrHookKind, Hook, HookFn, Kind, Preset,
    RecvOverride, RecvmsgsOverride, SendOverride, Transport,
};
pub use error::{CallbackError, CoreError};
pub use frame::{align4, msg_size, padlen, total_size, FrameHeader, FrameIter, HeaderFlags, ALIGNTO, DONE, ERROR, HDRLEN, MIN_TYPE, NOOP, OVERRUN};
pub use message::Message;
