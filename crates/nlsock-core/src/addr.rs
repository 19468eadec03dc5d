//! Transport-agnostic peer identity (§3 expansion — `sockaddr_nl` minus the
//! address-family tag, which is added at the syscall boundary in `nlsock`).

/// Sentinel meaning "fill in the endpoint's bound port id" (auto-completion
/// step 1, spec.md §4.3).
pub const AUTO_PORT: u32 = 0;

/// Sentinel meaning "fill in the endpoint's next sequence number" (step 2).
pub const AUTO_SEQ: u32 = 0;

/// A netlink peer identity: a unique port id plus a multicast group mask.
///
/// `groups` is carried for completeness (see SPEC_FULL.md §3) but this crate
/// does not implement multicast subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NlAddr {
    pub port_id: u32,
    pub groups: u32,
}

impl NlAddr {
    #[must_use]
    pub const fn new(port_id: u32) -> Self {
        Self { port_id, groups: 0 }
    }

    #[must_use]
    pub const fn with_groups(port_id: u32, groups: u32) -> Self {
        Self { port_id, groups }
    }
}

/// Captured sender identity delivered as an `SCM_CREDENTIALS` ancillary
/// record (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}
