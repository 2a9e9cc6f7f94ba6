//! Fork/join bookkeeping: exit codes reach the parent, join with no
//! children fails, and the accounting fields look sane.

use nucleus::{boot, JoinError, Launch};

fn child_forty_two(_arg: &str) -> i32 {
    42
}

fn child_seven(_arg: &str) -> i32 {
    7
}

fn root(_arg: &str) -> i32 {
    assert_eq!(nucleus::join(), Err(JoinError::NoChildren));

    let slow = nucleus::fork("slow", child_forty_two, None, nucleus::MIN_STACK, 5).unwrap();
    let quick = nucleus::fork("quick", child_seven, None, nucleus::MIN_STACK, 2).unwrap();
    nucleus::dump_processes();

    // The priority-2 child runs and quits first even though it was forked
    // second.
    assert_eq!(nucleus::join().unwrap(), (quick, 7));
    assert_eq!(nucleus::join().unwrap(), (slow, 42));
    assert_eq!(nucleus::join(), Err(JoinError::NoChildren));

    assert!(nucleus::get_pid() > 0);
    assert!(!nucleus::is_zapped());
    assert!(nucleus::read_cur_start_time() >= 0);
    assert!(nucleus::read_time() >= 0);
    0
}

#[test]
fn join_collects_exit_codes() {
    assert_eq!(boot(Launch::Scheduler, "root", root), 0);
}
