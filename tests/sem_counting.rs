//! Counting semaphores: P consumes, V releases waiters in FIFO order, and
//! freeing a semaphore with waiters zaps them out.

use std::sync::atomic::{AtomicI32, Ordering};

use nucleus::usercalls as usr;
use nucleus::{boot, Launch};

static GATE: AtomicI32 = AtomicI32::new(0);
static DOOMED: AtomicI32 = AtomicI32::new(0);

fn gate_waiter(arg: &str) -> i32 {
    let tag: i32 = arg.parse().unwrap();
    usr::sem_p(GATE.load(Ordering::SeqCst)).unwrap();
    usr::terminate(tag);
}

fn doomed_waiter(_arg: &str) -> i32 {
    // The P fails once the semaphore is freed underneath us.
    assert!(usr::sem_p(DOOMED.load(Ordering::SeqCst)).is_err());
    usr::terminate(77);
}

fn start(_arg: &str) -> i32 {
    // A preloaded semaphore admits that many Ps without blocking.
    let stocked = usr::sem_create(2).unwrap();
    usr::sem_p(stocked).unwrap();
    usr::sem_p(stocked).unwrap();
    usr::sem_v(stocked).unwrap();
    usr::sem_p(stocked).unwrap();
    assert_eq!(usr::sem_free(stocked), Ok(0));
    assert!(usr::sem_p(stocked).is_err());

    assert!(usr::sem_create(-1).is_err());

    // Two waiters park on an empty semaphore; each V releases the oldest.
    let gate = usr::sem_create(0).unwrap();
    GATE.store(gate, Ordering::SeqCst);
    let w1 = usr::spawn("waiter 1", gate_waiter, Some("1"), nucleus::MIN_STACK, 2).unwrap();
    let w2 = usr::spawn("waiter 2", gate_waiter, Some("2"), nucleus::MIN_STACK, 2).unwrap();
    usr::sem_v(gate).unwrap();
    assert_eq!(usr::wait(), Ok((w1, 1)));
    usr::sem_v(gate).unwrap();
    assert_eq!(usr::wait(), Ok((w2, 2)));
    assert_eq!(usr::sem_free(gate), Ok(0));

    // Freeing with a live waiter reports 1 and zaps it out of the P.
    let doomed = usr::sem_create(0).unwrap();
    DOOMED.store(doomed, Ordering::SeqCst);
    let w3 = usr::spawn("waiter 3", doomed_waiter, None, nucleus::MIN_STACK, 2).unwrap();
    assert_eq!(usr::sem_free(doomed), Ok(1));
    assert_eq!(usr::wait(), Ok((w3, 77)));

    usr::terminate(0);
}

#[test]
fn semaphores_count_and_release_in_order() {
    assert_eq!(boot(Launch::Full, "start", start), 0);
}
