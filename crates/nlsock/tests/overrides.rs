//! §4.2/§4.3: the three pipeline overrides are consulted before the
//! built-in send/recv/recvmsgs implementations.

use std::sync::{Arc, Mutex};

use nlsock::{CallbackSet, HeaderFlags, Message, Preset};

#[test]
fn send_override_preempts_the_wire_write() {
    let mut ep = nlsock::Endpoint::new(CallbackSet::alloc(Preset::Default));
    ep.connect(libc::NETLINK_USERSOCK).unwrap();

    let captured: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let captured_cb = Arc::clone(&captured);
    ep.callbacks().override_send(Some(Arc::new(move |_transport, msg| {
        captured_cb.lock().unwrap().push(msg.header().sequence);
        Ok(msg.as_bytes().len() as isize)
    })));

    let mut msg = Message::alloc_simple(0x10, HeaderFlags::empty());
    let n = ep.send_auto(&mut msg).unwrap();

    assert_eq!(n, 16);
    assert_eq!(captured.lock().unwrap().len(), 1);
    // auto-completion still ran before the override saw the message.
    assert_eq!(captured.lock().unwrap()[0], msg.header().sequence);
}

#[test]
fn recvmsgs_override_replaces_the_entire_loop() {
    let mut ep = nlsock::Endpoint::new(CallbackSet::alloc(Preset::Default));
    ep.connect(libc::NETLINK_USERSOCK).unwrap();

    ep.callbacks().override_recvmsgs(Some(Arc::new(|_transport, _cbs| Ok(7))));

    let report = nlsock::recvmsgs_report(&mut ep).unwrap();
    assert_eq!(report, 7);
}
