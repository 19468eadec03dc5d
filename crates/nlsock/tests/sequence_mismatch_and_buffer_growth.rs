//! S5/S6 from the design notes: a sequence mismatch with no INVALID hook
//! bound, and a payload larger than the default receive buffer.

use std::sync::{Arc, Mutex};
use std::thread;

use nlsock::{CallbackSet, CbAction, Endpoint, HeaderFlags, Hook, Kind, Message, Preset, ALIGNTO};

const VALID_TYPE: u16 = 0x20;

fn connected_pair() -> (Endpoint, Endpoint) {
    let mut a = Endpoint::new(CallbackSet::alloc(Preset::Default));
    a.connect(libc::NETLINK_USERSOCK).unwrap();
    let mut b = Endpoint::new(CallbackSet::alloc(Preset::Default));
    b.connect(libc::NETLINK_USERSOCK).unwrap();
    (a, b)
}

fn frame(msg_type: u16, flags: HeaderFlags, port_id: u32, sequence: u32) -> Message {
    let mut m = Message::alloc_simple(msg_type, flags);
    m.put_header(port_id, sequence, msg_type, 0, flags).unwrap();
    m
}

#[test]
fn sequence_mismatch_without_hooks_fails_and_skips_valid() {
    let (mut client, mut server) = connected_pair();
    server.set_peer_port(client.local_port());

    let valid_count = Arc::new(Mutex::new(0u32));
    let valid_count_cb = Arc::clone(&valid_count);
    client.callbacks().set(
        Hook::Valid,
        Kind::Custom(Arc::new(move |_msg| {
            *valid_count_cb.lock().unwrap() += 1;
            Ok(CbAction::Ok)
        })),
    );

    let server_thread = thread::spawn(move || {
        // seq_expect is seeded from wall-clock seconds at construction: a
        // value far larger than this literal, so it's certain to mismatch.
        server.send(&frame(VALID_TYPE, HeaderFlags::empty(), 0, 1)).unwrap();
    });

    let err = nlsock::recvmsgs_report(&mut client).unwrap_err();
    server_thread.join().unwrap();

    assert_eq!(err.code(), -6);
    assert_eq!(*valid_count.lock().unwrap(), 0);
}

#[test]
fn recv_grows_buffer_past_the_default_page() {
    let (mut client, mut server) = connected_pair();
    server.set_peer_port(client.local_port());

    let payload = vec![0xABu8; 8000];
    let server_thread = thread::spawn(move || {
        let mut msg = Message::alloc_simple(VALID_TYPE, HeaderFlags::empty());
        msg.append(&payload, ALIGNTO).unwrap();
        server.send(&msg).unwrap();
    });

    let (buf, _src, _creds) = client.recv().unwrap();
    server_thread.join().unwrap();

    assert_eq!(buf.len(), 16 + 8000);
}
