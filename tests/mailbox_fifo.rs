//! FIFO delivery, payload round-trips, and the conditional variants' error
//! codes. Everything here runs in one kernel process against slotted boxes.

use nucleus::mailbox::{self, MboxError};
use nucleus::{boot, Launch};

fn root(_arg: &str) -> i32 {
    let id = mailbox::create(5, 8).unwrap();

    mailbox::send(id, b"first").unwrap();
    mailbox::send(id, b"second").unwrap();
    mailbox::cond_send(id, b"third").unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(mailbox::receive(id, &mut buf), Ok(5));
    assert_eq!(&buf[..5], b"first");
    assert_eq!(mailbox::cond_receive(id, &mut buf), Ok(6));
    assert_eq!(&buf[..6], b"second");
    assert_eq!(mailbox::receive(id, &mut buf), Ok(5));
    assert_eq!(&buf[..5], b"third");

    // Nothing queued: the conditional receive refuses to block.
    assert_eq!(mailbox::cond_receive(id, &mut buf), Err(MboxError::WouldBlock));

    // Oversized messages and unknown ids are invalid.
    assert_eq!(mailbox::send(id, b"far too long!"), Err(MboxError::Invalid));
    assert_eq!(mailbox::send(4242, b"x"), Err(MboxError::Invalid));
    assert_eq!(mailbox::cond_receive(4242, &mut buf), Err(MboxError::Invalid));

    // A message longer than the receive buffer is reported, not truncated.
    mailbox::send(id, b"sixbyte").unwrap();
    let mut small = [0u8; 3];
    assert_eq!(mailbox::receive(id, &mut small), Err(MboxError::Invalid));
    assert_eq!(mailbox::receive(id, &mut buf), Ok(7));
    assert_eq!(&buf[..7], b"sixbyte");

    // A full box turns cond_send away.
    let tight = mailbox::create(1, 1).unwrap();
    mailbox::cond_send(tight, b"a").unwrap();
    assert_eq!(mailbox::cond_send(tight, b"b"), Err(MboxError::WouldBlock));

    // A zero-slot box with nobody on the other side does too.
    let pair = mailbox::create(0, 0).unwrap();
    assert_eq!(mailbox::cond_send(pair, &[]), Err(MboxError::WouldBlock));

    // Mailbox creation argument checks.
    assert_eq!(mailbox::create(-1, 4), Err(MboxError::Invalid));
    assert_eq!(mailbox::create(1, -4), Err(MboxError::Invalid));
    assert_eq!(mailbox::create(1, 1000), Err(MboxError::Invalid));
    0
}

#[test]
fn delivery_is_fifo_and_cond_ops_never_block() {
    assert_eq!(boot(Launch::Ipc, "root", root), 0);
}
