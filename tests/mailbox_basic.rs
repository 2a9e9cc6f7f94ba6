//! A queued message round-trips through a one-slot mailbox into a child.

use std::sync::atomic::{AtomicI32, Ordering};

use nucleus::mailbox;
use nucleus::{boot, Launch};

static BOX_ID: AtomicI32 = AtomicI32::new(0);

fn reader(_arg: &str) -> i32 {
    let id = BOX_ID.load(Ordering::SeqCst);
    let mut buf = [0u8; 4];
    let len = mailbox::receive(id, &mut buf).unwrap();
    assert_eq!(len, 4);
    assert_eq!(&buf, b"ABCD");
    0
}

fn root(_arg: &str) -> i32 {
    let id = mailbox::create(1, 4).unwrap();
    BOX_ID.store(id, Ordering::SeqCst);
    mailbox::send(id, b"ABCD").unwrap();

    let child = nucleus::fork("reader", reader, None, nucleus::MIN_STACK, 2).unwrap();
    assert_eq!(nucleus::join().unwrap(), (child, 0));
    0
}

#[test]
fn message_reaches_the_child_intact() {
    assert_eq!(boot(Launch::Ipc, "root", root), 0);
}
