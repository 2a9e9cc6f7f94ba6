//! Explicit block/unblock: a helper releases the blocked root, and the
//! error paths of unblock_proc reject everything else.

use std::sync::atomic::{AtomicI32, Ordering};

use nucleus::{boot, Launch, UnblockError};

static ROOT_PID: AtomicI32 = AtomicI32::new(0);

fn helper(_arg: &str) -> i32 {
    let root = ROOT_PID.load(Ordering::SeqCst);
    // A ready process is not unblockable.
    assert_eq!(nucleus::unblock_proc(9999), Err(UnblockError::NotBlocked));
    assert!(nucleus::unblock_proc(root).is_ok());
    0
}

fn root(_arg: &str) -> i32 {
    let me = nucleus::get_pid();
    ROOT_PID.store(me, Ordering::SeqCst);

    // Unblocking yourself is refused.
    assert_eq!(nucleus::unblock_proc(me), Err(UnblockError::NotBlocked));

    let helper_pid = nucleus::fork("helper", helper, None, nucleus::MIN_STACK, 2).unwrap();
    assert!(nucleus::block_me(20).is_ok());

    // The helper must not be unblockable once it already ran to completion.
    assert_eq!(nucleus::unblock_proc(helper_pid), Err(UnblockError::NotBlocked));
    assert_eq!(nucleus::join().unwrap(), (helper_pid, 0));
    0
}

#[test]
fn block_me_pairs_with_unblock_proc() {
    assert_eq!(boot(Launch::Scheduler, "root", root), 0);
}
