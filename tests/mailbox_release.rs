//! Releasing a mailbox cancels everyone parked on it: waiting receivers are
//! zapped out with -3, blocked senders wake with -3, and the id dies.

use std::sync::atomic::{AtomicI32, Ordering};

use nucleus::mailbox::{self, MboxError};
use nucleus::{boot, Launch};

static EMPTY_BOX: AtomicI32 = AtomicI32::new(0);
static PAIR_BOX: AtomicI32 = AtomicI32::new(0);
static ROOT_PID: AtomicI32 = AtomicI32::new(0);

fn stuck_receiver(_arg: &str) -> i32 {
    let id = EMPTY_BOX.load(Ordering::SeqCst);
    let mut buf = [0u8; 4];
    assert_eq!(mailbox::receive(id, &mut buf), Err(MboxError::Cancelled));
    0
}

fn nudge_root(_arg: &str) -> i32 {
    let _ = nucleus::unblock_proc(ROOT_PID.load(Ordering::SeqCst));
    0
}

fn releasing_helper(_arg: &str) -> i32 {
    let id = PAIR_BOX.load(Ordering::SeqCst);
    assert_eq!(mailbox::release(id), Ok(()));
    0
}

fn root(_arg: &str) -> i32 {
    ROOT_PID.store(nucleus::get_pid(), Ordering::SeqCst);

    // Park a receiver on an empty box, then release it out from under it.
    let id = mailbox::create(2, 4).unwrap();
    EMPTY_BOX.store(id, Ordering::SeqCst);
    let receiver = nucleus::fork("stuck receiver", stuck_receiver, None, nucleus::MIN_STACK, 2).unwrap();
    let nudge = nucleus::fork("nudge", nudge_root, None, nucleus::MIN_STACK, 3).unwrap();
    // Blocking lets the receiver get parked before the release; the second
    // helper hands control back.
    let _ = nucleus::block_me(30);
    assert_eq!(mailbox::release(id), Ok(()));
    assert_eq!(mailbox::release(id), Err(MboxError::Invalid));
    assert_eq!(mailbox::send(id, b"gone"), Err(MboxError::Invalid));

    assert_eq!(nucleus::join().unwrap(), (receiver, 0));
    assert_eq!(nucleus::join().unwrap(), (nudge, 0));

    // Now the other side: the root parks as a rendezvous sender and a
    // helper releases the box.
    let pair = mailbox::create(0, 0).unwrap();
    PAIR_BOX.store(pair, Ordering::SeqCst);
    let helper = nucleus::fork("releasing helper", releasing_helper, None, nucleus::MIN_STACK, 2).unwrap();
    assert_eq!(mailbox::send(pair, &[]), Err(MboxError::Cancelled));
    assert_eq!(nucleus::join().unwrap(), (helper, 0));
    0
}

#[test]
fn release_cancels_blocked_parties() {
    assert_eq!(boot(Launch::Ipc, "root", root), 0);
}
