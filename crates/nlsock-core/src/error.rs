use thiserror::Error;

/// Unified error taxonomy for the framing, callback-set and attribute layers.
///
/// Socket-facing errors (transport/configuration, §7 of the design doc) live
/// in `nlsock::error::NlError` and wrap this type for the protocol-violation
/// and resource variants.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("out of memory reserving {0} bytes")]
    OutOfMemory(usize),

    #[error("value out of range")]
    Range,

    #[error("sequence mismatch: expected {expected}, got {got}")]
    SeqMismatch { expected: u32, got: u32 },

    #[error("message overrun")]
    MsgOverflow,

    #[error("message truncated")]
    MsgTrunc,

    #[error("dump interrupted")]
    DumpInterrupted,
}

/// Errors from the typed-attribute policy validator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrError {
    #[error("attribute {0} failed policy validation")]
    Invalid(u16),
}

/// Errors from callback-set refcount bookkeeping.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackError {
    /// A `put` was issued on a callback set already at its minimum refcount.
    ///
    /// The original C implementation asserts on this (`lib/handlers.c`,
    /// `nl_cb_put`); see DESIGN.md — this implementation rejects it instead.
    #[error("callback set over-released")]
    OverRelease,
}
