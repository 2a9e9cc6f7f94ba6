//! A small teaching kernel on simulated hardware.
//!
//! The stack, leaves first: the machine (contexts, clock, disks, interrupt
//! vector), the process manager (priority scheduler, fork/join/quit, zap),
//! the mailbox manager (every blocking hand-off in the kernel), the syscall
//! and semaphore service, and the clock and disk drivers.
//!
//! `boot` powers the machine on, runs the requested layers with the given
//! entry as the first program, and returns the halt code. The machine powers
//! on once per OS process.

pub mod machine;
pub mod process;
pub mod mailbox;
pub mod syscalls;
pub mod drivers;

use std::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

pub use machine::{sys_clock, ProcEntry, SysArg, SysArgs};
pub use process::{
    block_me, dump_processes, fork, get_pid, is_zapped, join, quit, read_cur_start_time,
    read_time, time_slice, unblock_proc, zap, ForkError, JoinError, Pid, UnblockError, Zapped,
    MAX_PROC, MIN_STACK,
};
pub use syscalls::usercalls;

/// How much of the kernel to bring up around the entry process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// Process manager only; `entry` runs as a kernel process.
    Scheduler,
    /// Process manager plus mailboxes and interrupt handlers; `entry` runs
    /// as a kernel process.
    Ipc,
    /// The whole stack; `entry` is spawned in user mode as the first user
    /// program.
    Full,
}

#[derive(Clone)]
pub(crate) struct BootPlan {
    pub launch: Launch,
    pub entry: ProcEntry,
    pub name: String,
}

static PLAN: Mutex<Option<BootPlan>> = Mutex::new(None);
static BOOTED: AtomicBool = AtomicBool::new(false);

pub(crate) fn boot_plan() -> BootPlan {
    PLAN.lock().clone().expect("boot plan not set")
}

/// Power on, run `entry` under the requested launch level, and return the
/// machine's halt code.
pub fn boot(launch: Launch, name: &str, entry: ProcEntry) -> i32 {
    if BOOTED.swap(true, Ordering::SeqCst) {
        panic!("boot(): the machine powers on once per process");
    }
    *PLAN.lock() = Some(BootPlan { launch, entry, name: name.to_string() });

    machine::run(|| match launch {
        Launch::Scheduler => process::bootstrap(name, entry),
        Launch::Ipc | Launch::Full => process::bootstrap("ipc", mailbox::ipc_start),
    })
}
