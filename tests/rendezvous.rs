//! Zero-slot mailboxes pair a sender and a receiver directly, whichever
//! side arrives first.

use std::sync::atomic::{AtomicI32, Ordering};

use nucleus::mailbox;
use nucleus::{boot, Launch};

static BOX_ID: AtomicI32 = AtomicI32::new(0);

fn partner_recv(_arg: &str) -> i32 {
    let id = BOX_ID.load(Ordering::SeqCst);
    assert_eq!(mailbox::receive(id, &mut []), Ok(0));
    0
}

fn partner_send(_arg: &str) -> i32 {
    let id = BOX_ID.load(Ordering::SeqCst);
    assert_eq!(mailbox::send(id, &[]), Ok(()));
    0
}

fn root(_arg: &str) -> i32 {
    let id = mailbox::create(0, 0).unwrap();
    BOX_ID.store(id, Ordering::SeqCst);

    // Sender first: the root parks in send until the child receives.
    let a = nucleus::fork("recv side", partner_recv, None, nucleus::MIN_STACK, 2).unwrap();
    assert_eq!(mailbox::send(id, &[]), Ok(()));
    assert_eq!(nucleus::join().unwrap(), (a, 0));

    // Receiver first: the root parks in receive until the child sends.
    let b = nucleus::fork("send side", partner_send, None, nucleus::MIN_STACK, 2).unwrap();
    assert_eq!(mailbox::receive(id, &mut []), Ok(0));
    assert_eq!(nucleus::join().unwrap(), (b, 0));
    0
}

#[test]
fn zero_slot_rendezvous_pairs_both_ways() {
    assert_eq!(boot(Launch::Ipc, "root", root), 0);
}
