//! The typed hook dispatch table (C2, §4.2) and the small capability set
//! (§9 design notes) that the socket-facing overrides are expressed over.

use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::{addr::NlAddr, error::CallbackError, message::Message};

/// Control-flow signal a hook may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbAction {
    /// Proceed with the next step of the loop.
    Ok,
    /// Drop the current frame, continue with the next one.
    Skip,
    /// End the receive loop successfully.
    Stop,
}

/// A hook returning a negative value aborts the loop, surfacing the code
/// verbatim (§4.2, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abort(pub i32);

pub type CbResult = Result<CbAction, Abort>;

/// The fixed hook enumeration (§4.2). `Error` is not included here — it has
/// a distinct signature (`source_addr`, inner code) and its own slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Hook {
    Valid = 0,
    Finish = 1,
    Overrun = 2,
    Skipped = 3,
    Ack = 4,
    MsgIn = 5,
    MsgOut = 6,
    Invalid = 7,
    SeqCheck = 8,
    SendAck = 9,
    DumpIntr = 10,
}

impl Hook {
    const COUNT: usize = 11;
    const ALL: [Hook; Self::COUNT] = [
        Hook::Valid,
        Hook::Finish,
        Hook::Overrun,
        Hook::Skipped,
        Hook::Ack,
        Hook::MsgIn,
        Hook::MsgOut,
        Hook::Invalid,
        Hook::SeqCheck,
        Hook::SendAck,
        Hook::DumpIntr,
    ];

    /// The hook's default *return code* when its slot is unbound — used by
    /// `recvmsgs` after `CallbackSet::invoke` reports `None` (§4.2 defaults
    /// table). `SeqCheck` and the error hook are excluded: their "default"
    /// is a distinct built-in *action*, not just a return code, and the
    /// receive state machine (`nlsock::recv`) special-cases them.
    #[must_use]
    pub const fn default_action(self) -> CbAction {
        match self {
            Hook::Valid | Hook::MsgIn | Hook::MsgOut | Hook::SendAck | Hook::SeqCheck => CbAction::Ok,
            Hook::Skipped => CbAction::Skip,
            Hook::Finish | Hook::Overrun | Hook::Ack | Hook::Invalid | Hook::DumpIntr => CbAction::Stop,
        }
    }
}

/// A hook function. User state is captured by the closure itself rather
/// than passed as a separate opaque argument (the idiomatic replacement for
/// the original's `(fn, arg)` pair, per §9 design notes).
pub type HookFn = Arc<dyn Fn(&Message) -> CbResult + Send + Sync>;

/// The error hook's distinct signature: source address plus the inner
/// signed error code carried by an `ERROR` frame (§4.4h).
pub type ErrHookFn = Arc<dyn Fn(NlAddr, i32) -> CbResult + Send + Sync>;

/// Preset bound to a slot at `alloc`/`set`/`set_all` time.
#[derive(Clone)]
pub enum Kind {
    /// Slot is empty; the receive loop applies the documented default.
    Empty,
    /// Built-in diagnostic one-liner, logged via `tracing::debug!`.
    Verbose,
    /// Built-in full hex dump, logged via `tracing::trace!`.
    Debug,
    /// User-bound function.
    Custom(HookFn),
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Empty => write!(f, "Empty"),
            Kind::Verbose => write!(f, "Verbose"),
            Kind::Debug => write!(f, "Debug"),
            Kind::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[derive(Clone)]
enum ErrKind {
    Empty,
    Verbose,
    Debug,
    Custom(ErrHookFn),
}

/// Preset used at construction time; determines every slot's initial
/// [`Kind`] (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Every slot empty; the receive loop's built-in default applies.
    Default,
    /// Every slot prints a one-line diagnostic.
    Verbose,
    /// Every slot prints a full hex dump.
    Debug,
}

#[derive(Clone)]
struct CbTable {
    slots: [Kind; Hook::COUNT],
    err_slot: ErrKind,
    send_override: Option<SendOverride>,
    recv_override: Option<RecvOverride>,
    recvmsgs_override: Option<RecvmsgsOverride>,
}

impl CbTable {
    fn new(preset: Preset) -> Self {
        let slot = || match preset {
            Preset::Default => Kind::Empty,
            Preset::Verbose => Kind::Verbose,
            Preset::Debug => Kind::Debug,
        };
        let err_slot = match preset {
            Preset::Default => ErrKind::Empty,
            Preset::Verbose => ErrKind::Verbose,
            Preset::Debug => ErrKind::Debug,
        };
        Self {
            slots: std::array::from_fn(|_| slot()),
            err_slot,
            send_override: None,
            recv_override: None,
            recvmsgs_override: None,
        }
    }
}

fn verbose_log(hook: Hook, msg: &Message) {
    let h = msg.header();
    tracing::debug!(?hook, msg_type = h.msg_type, flags = ?h.flags, seq = h.sequence, port = h.port_id, "netlink frame");
}

fn debug_log(hook: Hook, msg: &Message) {
    tracing::trace!(?hook, payload = ?msg.payload(), "netlink frame payload");
}

/// Reference-counted, cloneable hook dispatch table (§3, §4.2, §5).
///
/// Sharing uses `Arc`/`Mutex`, not `Rc`/`RefCell`: while a single endpoint is
/// single-owner (§5), the integration tests (and any caller who wants to)
/// move an `Endpoint` — and the `CallbackSet` it owns — into another thread
/// to play the peer role, so every shared piece here must be `Send + Sync`.
/// The hook closures themselves are already `Arc<dyn Fn(..) + Send + Sync>`
/// for the same reason. A manual refcount (`AtomicUsize`, independent of
/// `Arc`'s own strong count) tracks `get`/`put` calls so that `put` can
/// reject an over-release (§9 open question) instead of asserting.
pub struct CallbackSet {
    table: Arc<Mutex<CbTable>>,
    refcount: Arc<AtomicUsize>,
}

impl CallbackSet {
    /// Allocate a new table with every slot set to `preset`'s default.
    #[must_use]
    pub fn alloc(preset: Preset) -> Self {
        Self { table: Arc::new(Mutex::new(CbTable::new(preset))), refcount: Arc::new(AtomicUsize::new(1)) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CbTable> {
        self.table.lock().expect("callback set lock poisoned")
    }

    /// Bind one hook slot.
    pub fn set(&self, hook: Hook, kind: Kind) {
        self.lock().slots[hook as usize] = kind;
    }

    /// Bind every regular hook slot to `kind` (the error slot is untouched —
    /// use [`CallbackSet::err`] for it).
    pub fn set_all(&self, kind: Kind) {
        let mut table = self.lock();
        for hook in Hook::ALL {
            table.slots[hook as usize] = kind.clone();
        }
    }

    /// Bind the error slot.
    pub fn err(&self, kind: ErrHookKind) {
        self.lock().err_slot = kind.0;
    }

    /// Dispatch `hook`. Returns `None` if the slot is empty — the caller
    /// (`nlsock::recv`) must then apply the hook's documented default
    /// behavior, which for most hooks is just [`Hook::default_action`] but
    /// for `SeqCheck` and `SendAck` is a distinct built-in action.
    #[must_use]
    pub fn invoke(&self, hook: Hook, msg: &Message) -> Option<CbResult> {
        let kind = self.lock().slots[hook as usize].clone();
        match kind {
            Kind::Empty => None,
            Kind::Verbose => {
                verbose_log(hook, msg);
                Some(Ok(hook.default_action()))
            }
            Kind::Debug => {
                verbose_log(hook, msg);
                debug_log(hook, msg);
                Some(Ok(hook.default_action()))
            }
            Kind::Custom(f) => Some(f(msg)),
        }
    }

    /// Dispatch the error hook. `None` means unbound — the caller must fail
    /// with the translated kernel error (§4.4h).
    #[must_use]
    pub fn invoke_error(&self, source: NlAddr, inner: i32) -> Option<CbResult> {
        let kind = self.lock().err_slot.clone();
        match kind {
            ErrKind::Empty => None,
            ErrKind::Verbose | ErrKind::Debug => {
                tracing::warn!(port = source.port_id, inner, "netlink peer error");
                Some(Ok(CbAction::Stop))
            }
            ErrKind::Custom(f) => Some(f(source, inner)),
        }
    }

    /// Acquire an additional owning handle to the same shared table,
    /// incrementing the manual refcount (§4.2, §9).
    #[must_use]
    pub fn get(&self) -> Self {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        Self { table: Arc::clone(&self.table), refcount: Arc::clone(&self.refcount) }
    }

    /// Release one handle. Rejects (rather than asserting, per §9's open
    /// question) a release past the baseline handle the set was allocated
    /// with.
    pub fn put(&self) -> Result<(), CallbackError> {
        let n = self.refcount.load(Ordering::Acquire);
        if n <= 1 {
            return Err(CallbackError::OverRelease);
        }
        self.refcount.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }

    /// Current refcount, for diagnostics/tests.
    #[must_use]
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// Deep clone: copies every slot into a fresh table with its own
    /// refcount of 1 (distinct from [`CallbackSet::get`], which shares the
    /// table). Used by `wait_for_ack`/`pickup` to bind a one-off hook
    /// without disturbing the caller's own set.
    #[must_use]
    pub fn clone_deep(&self) -> Self {
        Self { table: Arc::new(Mutex::new(self.lock().clone())), refcount: Arc::new(AtomicUsize::new(1)) }
    }

    /// Replace the entire send stage (§4.2, §4.3: "`send_auto` calls the
    /// `send_override` if bound, else the default `send`").
    pub fn override_send(&self, f: Option<SendOverride>) {
        self.lock().send_override = f;
    }

    /// Replace the built-in datagram fetch used by the receive loop's
    /// READING step (§4.4 step 1).
    pub fn override_recv(&self, f: Option<RecvOverride>) {
        self.lock().recv_override = f;
    }

    /// Replace the entire `recvmsgs` loop (§4.2).
    pub fn override_recvmsgs(&self, f: Option<RecvmsgsOverride>) {
        self.lock().recvmsgs_override = f;
    }

    #[must_use]
    pub fn send_override(&self) -> Option<SendOverride> {
        self.lock().send_override.clone()
    }

    #[must_use]
    pub fn recv_override(&self) -> Option<RecvOverride> {
        self.lock().recv_override.clone()
    }

    #[must_use]
    pub fn recvmsgs_override(&self) -> Option<RecvmsgsOverride> {
        self.lock().recvmsgs_override.clone()
    }
}

/// Newtype wrapper so [`CallbackSet::err`] can accept either a preset or a
/// custom function without a second enum name colliding with [`Kind`].
pub struct ErrHookKind(ErrKind);

impl ErrHookKind {
    #[must_use]
    pub fn empty() -> Self {
        Self(ErrKind::Empty)
    }

    #[must_use]
    pub fn verbose() -> Self {
        Self(ErrKind::Verbose)
    }

    #[must_use]
    pub fn debug() -> Self {
        Self(ErrKind::Debug)
    }

    #[must_use]
    pub fn custom(f: ErrHookFn) -> Self {
        Self(ErrKind::Custom(f))
    }
}

/// The small capability set (§9 design notes) that `send_override`,
/// `recv_override` and `recvmsgs_override` are expressed over, so that this
/// crate's callback-set logic (C2) doesn't need to depend on the concrete
/// socket engine (C3, `nlsock::Endpoint`).
pub trait Transport {
    /// Write one complete frame. Returns the octet count written.
    fn raw_send(&mut self, msg: &Message) -> Result<isize, i32>;
    /// Receive one datagram's raw bytes.
    fn raw_recv(&mut self) -> Result<Vec<u8>, i32>;
}

pub type SendOverride = Arc<dyn Fn(&mut dyn Transport, &mut Message) -> Result<isize, i32> + Send + Sync>;
pub type RecvOverride = Arc<dyn Fn(&mut dyn Transport) -> Result<Vec<u8>, i32> + Send + Sync>;
/// Replaces the entire `recvmsgs` loop. Takes the transport and this
/// callback set, returns the same count/err convention as `recvmsgs`.
pub type RecvmsgsOverride = Arc<dyn Fn(&mut dyn Transport, &CallbackSet) -> Result<i32, i32> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> Message {
        Message::alloc_simple(0x10, crate::frame::HeaderFlags::empty())
    }

    #[test]
    fn default_preset_invoke_returns_none() {
        let cbs = CallbackSet::alloc(Preset::Default);
        assert!(cbs.invoke(Hook::Valid, &msg()).is_none());
        assert!(cbs.invoke_error(NlAddr::new(1), -2).is_none());
    }

    #[test]
    fn custom_hook_is_dispatched() {
        let cbs = CallbackSet::alloc(Preset::Default);
        cbs.set(Hook::Valid, Kind::Custom(Arc::new(|_m| Ok(CbAction::Skip))));
        assert_eq!(cbs.invoke(Hook::Valid, &msg()), Some(Ok(CbAction::Skip)));
    }

    #[test]
    fn get_put_refcount_rejects_over_release() {
        let cbs = CallbackSet::alloc(Preset::Default);
        let handle = cbs.get();
        assert_eq!(cbs.refcount(), 2);
        handle.put().unwrap();
        assert_eq!(cbs.refcount(), 1);
        assert!(matches!(cbs.put(), Err(CallbackError::OverRelease)));
    }

    #[test]
    fn clone_deep_is_independent() {
        let cbs = CallbackSet::alloc(Preset::Default);
        cbs.set(Hook::Valid, Kind::Custom(Arc::new(|_m| Ok(CbAction::Skip))));
        let cloned = cbs.clone_deep();
        assert_eq!(cloned.refcount(), 1);
        cloned.set(Hook::Valid, Kind::Empty);
        // Original set is unaffected by mutation on the deep clone.
        assert_eq!(cbs.invoke(Hook::Valid, &msg()), Some(Ok(CbAction::Skip)));
        assert!(cloned.invoke(Hook::Valid, &msg()).is_none());
    }

    #[test]
    fn override_slots_round_trip() {
        let cbs = CallbackSet::alloc(Preset::Default);
        assert!(cbs.send_override().is_none());
        cbs.override_send(Some(Arc::new(|_t, _m| Ok(0))));
        assert!(cbs.send_override().is_some());
        cbs.override_send(None);
        assert!(cbs.send_override().is_none());
    }

    #[test]
    fn default_action_table_matches_spec() {
        assert_eq!(Hook::Valid.default_action(), CbAction::Ok);
        assert_eq!(Hook::Finish.default_action(), CbAction::Stop);
        assert_eq!(Hook::Skipped.default_action(), CbAction::Skip);
        assert_eq!(Hook::Ack.default_action(), CbAction::Stop);
        assert_eq!(Hook::Invalid.default_action(), CbAction::Stop);
    }
}
