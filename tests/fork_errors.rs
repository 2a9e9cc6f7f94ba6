//! fork argument validation: stack floor and priority range.

use nucleus::{boot, ForkError, Launch};

fn nobody(_arg: &str) -> i32 {
    0
}

fn root(_arg: &str) -> i32 {
    assert_eq!(
        nucleus::fork("tiny", nobody, None, nucleus::MIN_STACK - 1, 3),
        Err(ForkError::StackTooSmall)
    );
    assert_eq!(
        nucleus::fork("zero", nobody, None, nucleus::MIN_STACK, 0),
        Err(ForkError::BadPriority)
    );
    // Priority 6 belongs to the sentinel alone.
    assert_eq!(
        nucleus::fork("pretender", nobody, None, nucleus::MIN_STACK, 6),
        Err(ForkError::BadPriority)
    );
    0
}

#[test]
fn fork_rejects_bad_arguments() {
    assert_eq!(boot(Launch::Scheduler, "root", root), 0);
}
