//! Quitting with a live child is a programmer error that stops the machine.

use nucleus::{boot, Launch};

fn lingering(_arg: &str) -> i32 {
    0
}

fn root(_arg: &str) -> i32 {
    nucleus::fork("lingering", lingering, None, nucleus::MIN_STACK, 5).unwrap();
    // Returning quits the root while the child has never run.
    0
}

#[test]
fn quit_with_live_children_halts() {
    assert_eq!(boot(Launch::Scheduler, "root", root), 1);
    let lines = nucleus::machine::console::history();
    assert!(lines.iter().any(|l| l.contains("live children")));
}
