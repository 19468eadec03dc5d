//! Raw `libc` syscall bindings: socket/bind/getsockname/sendmsg/recvmsg and
//! the `SCM_CREDENTIALS` ancillary record. Kept in one module so the rest of
//! the crate never touches `unsafe` directly (§9 design notes: lift raw
//! transport access behind a typed boundary).

use std::{io, mem, os::fd::RawFd};

use nlsock_core::{Credentials, NlAddr};

use crate::error::NlError;

/// `sockaddr_nl`, 16 octets: family, pad, port id, multicast group mask
/// (§3 expansion).
#[repr(C)]
#[derive(Clone, Copy)]
struct SockaddrNl {
    nl_family: libc::sa_family_t,
    nl_pad: u16,
    nl_pid: u32,
    nl_groups: u32,
}

impl SockaddrNl {
    fn from_addr(addr: NlAddr) -> Self {
        Self { nl_family: libc::AF_NETLINK as libc::sa_family_t, nl_pad: 0, nl_pid: addr.port_id, nl_groups: addr.groups }
    }

    fn to_addr(self) -> NlAddr {
        NlAddr::with_groups(self.nl_pid, self.nl_groups)
    }
}

fn last_os_error() -> NlError {
    NlError::from_errno(io::Error::last_os_error())
}

/// `socket(AF_NETLINK, SOCK_RAW | SOCK_CLOEXEC, protocol)`.
pub fn open_socket(protocol: i32) -> Result<RawFd, NlError> {
    let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW | libc::SOCK_CLOEXEC, protocol) };
    if fd < 0 {
        return Err(last_os_error());
    }
    Ok(fd)
}

pub fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// `bind()` to `addr` (port 0 lets the kernel assign a unique port id).
pub fn bind(fd: RawFd, addr: NlAddr) -> Result<(), NlError> {
    let sa = SockaddrNl::from_addr(addr);
    let rc = unsafe {
        libc::bind(fd, (&raw const sa).cast::<libc::sockaddr>(), mem::size_of::<SockaddrNl>() as libc::socklen_t)
    };
    if rc < 0 {
        return Err(last_os_error());
    }
    Ok(())
}

/// `getsockname()`, validating the returned address matches `sockaddr_nl`'s
/// layout and family (§4.3 connect contract).
pub fn getsockname(fd: RawFd) -> Result<NlAddr, NlError> {
    let mut sa = SockaddrNl { nl_family: 0, nl_pad: 0, nl_pid: 0, nl_groups: 0 };
    let mut len = mem::size_of::<SockaddrNl>() as libc::socklen_t;
    let rc = unsafe { libc::getsockname(fd, (&raw mut sa).cast::<libc::sockaddr>(), &raw mut len) };
    if rc < 0 {
        return Err(last_os_error());
    }
    if len as usize != mem::size_of::<SockaddrNl>() {
        return Err(NlError::NoAddress);
    }
    if i32::from(sa.nl_family) != libc::AF_NETLINK {
        return Err(NlError::AfNotSupported);
    }
    Ok(sa.to_addr())
}

pub fn set_rcvbuf(fd: RawFd, size: usize) -> Result<(), NlError> {
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, size as libc::c_int)
}

pub fn set_passcred(fd: RawFd, enable: bool) -> Result<(), NlError> {
    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_PASSCRED, i32::from(enable))
}

fn setsockopt_int(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<(), NlError> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            (&raw const value).cast::<libc::c_void>(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(last_os_error());
    }
    Ok(())
}

/// Toggle `O_NONBLOCK` on `fd`.
pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> Result<(), NlError> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(last_os_error());
    }
    let flags = if nonblocking { flags | libc::O_NONBLOCK } else { flags & !libc::O_NONBLOCK };
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags) };
    if rc < 0 {
        return Err(last_os_error());
    }
    Ok(())
}

const CREDS_CMSG_SPACE_LEN: usize = {
    // CMSG_SPACE isn't const-evaluable through the libc crate, so this is
    // sized generously (one `ucred` plus header/alignment) and checked by
    // `cmsg_space_len` at runtime in tests.
    64
};

fn cmsg_space_len() -> usize {
    unsafe { libc::CMSG_SPACE(mem::size_of::<libc::ucred>() as u32) as usize }
}

/// One complete `sendmsg()` of `frame` to `dest`, optionally carrying a
/// `SCM_CREDENTIALS` ancillary record (§4.3, §6).
pub fn send_to(fd: RawFd, dest: NlAddr, frame: &[u8], creds: Option<Credentials>) -> Result<isize, NlError> {
    let mut sa = SockaddrNl::from_addr(dest);
    let mut iov = libc::iovec { iov_base: frame.as_ptr().cast_mut().cast::<libc::c_void>(), iov_len: frame.len() };

    let mut cmsg_buf = [0u8; CREDS_CMSG_SPACE_LEN];
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = (&raw mut sa).cast::<libc::c_void>();
    msg.msg_namelen = mem::size_of::<SockaddrNl>() as libc::socklen_t;
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;

    if let Some(creds) = creds {
        let space = cmsg_space_len();
        assert!(space <= cmsg_buf.len(), "CMSG_SPACE(ucred) exceeds scratch buffer");
        msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = space as _;

        let cmsg = unsafe { libc::CMSG_FIRSTHDR(&raw const msg) };
        unsafe {
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_CREDENTIALS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::ucred>() as u32) as _;
            let ucred = libc::ucred { pid: creds.pid, uid: creds.uid, gid: creds.gid };
            std::ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<libc::ucred>(), ucred);
        }
        msg.msg_controllen = space as _;
    }

    let n = unsafe { libc::sendmsg(fd, &raw const msg, 0) };
    if n < 0 {
        return Err(last_os_error());
    }
    Ok(n)
}

/// Outcome of one `recvmsg()` attempt, before the endpoint's retry/grow
/// logic (§4.3) decides whether to loop again.
pub struct RecvOutcome {
    pub n: isize,
    pub src: NlAddr,
    pub creds: Option<Credentials>,
    pub ctrunc: bool,
    pub msg_trunc: bool,
    pub namelen_ok: bool,
}

/// One `recvmsg()` call into `buf`, with a control buffer of `control_len`
/// octets (0 disables ancillary data entirely). `peek` sets `MSG_PEEK |
/// MSG_TRUNC` (§4.3's buffer-sizing pass).
pub fn recv_once(fd: RawFd, buf: &mut [u8], control_len: usize, peek: bool) -> Result<RecvOutcome, NlError> {
    let mut sa = SockaddrNl { nl_family: 0, nl_pad: 0, nl_pid: 0, nl_groups: 0 };
    let mut iov = libc::iovec { iov_base: buf.as_mut_ptr().cast::<libc::c_void>(), iov_len: buf.len() };

    let mut control = vec![0u8; control_len];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = (&raw mut sa).cast::<libc::c_void>();
    msg.msg_namelen = mem::size_of::<SockaddrNl>() as libc::socklen_t;
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;
    if control_len > 0 {
        msg.msg_control = control.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = control_len as _;
    }

    // MSG_TRUNC is unconditional so the real (non-peek) read also reports
    // the true datagram length when it exceeds the buffer, letting the
    // caller's growth-retry loop see an honest `n` instead of one capped at
    // `buf.len()`.
    let flags = libc::MSG_TRUNC | if peek { libc::MSG_PEEK } else { 0 };
    let n = unsafe { libc::recvmsg(fd, &raw mut msg, flags) };
    if n < 0 {
        return Err(last_os_error());
    }

    let mut creds = None;
    if control_len > 0 {
        let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&raw const msg) };
        while !cmsg.is_null() {
            unsafe {
                if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_CREDENTIALS {
                    let ucred = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg).cast::<libc::ucred>());
                    creds = Some(Credentials { pid: ucred.pid, uid: ucred.uid, gid: ucred.gid });
                    break;
                }
                cmsg = libc::CMSG_NXTHDR(&raw const msg, cmsg);
            }
        }
    }

    Ok(RecvOutcome {
        n,
        src: sa.to_addr(),
        creds,
        ctrunc: msg.msg_flags & libc::MSG_CTRUNC != 0,
        msg_trunc: msg.msg_flags & libc::MSG_TRUNC != 0,
        namelen_ok: msg.msg_namelen as usize == mem::size_of::<SockaddrNl>(),
    })
}
