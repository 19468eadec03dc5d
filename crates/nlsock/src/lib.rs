//! Socket engine and receive state machine (C3 + C4) for a netlink-style
//! control-plane protocol. Builds on the pure framing/callback-set logic in
//! `nlsock-core`.

pub mod endpoint;
pub mod error;
mod raw;
pub mod recv;

pub use endpoint::{Endpoint, EndpointFlags};
pub use error::NlError;
pub use recv::{recvmsgs, recvmsgs_report, recvmsgs_with};

pub use nlsock_core::{
    align4, find, iter_nested, msg_size, padlen, parse, total_size, Abort, Attr, AttrError,
    AttrHeader, AttrIter, AttrKind, CallbackError, CallbackSet, CbAction, CbResult, CoreError,
    Credentials, ErrHookFn, ErrHookKind, FrameHeader, FrameIter, Hook, HookFn, HeaderFlags, Kind,
    Message, NlAddr, Policy, PolicyEntry, Preset, RecvOverride, RecvmsgsOverride, SendOverride,
    Transport, ALIGNTO, AUTO_PORT, AUTO_SEQ, DONE, ERROR, HDRLEN, MIN_TYPE, NLA_F_NESTED,
    NLA_F_NET_BYTEORDER, NOOP, OVERRUN,
};
