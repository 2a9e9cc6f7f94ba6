//! The simulated hardware.
//!
//! Everything the kernel consumes from the machine lives here: contexts and
//! the context switch, the PSR and interrupt vector, the clock, the disks,
//! the console, and `halt`. The kernel proper never touches an OS thread or
//! a wall clock directly.

pub mod clock;
pub mod console;
pub mod context;
pub mod disk;
pub mod interrupts;

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use spin::Mutex;

pub use clock::{sys_clock, CLOCK_INTERVAL_US};
pub use context::ProcEntry;
pub use disk::{
    DiskCommand, DEV_BUSY, DEV_ERROR, DEV_INVALID, DEV_OK, DISK_SECTOR_SIZE, DISK_TRACK_SIZE,
    DISK_UNITS,
};
pub use interrupts::{
    check_kernel_mode, psr_get, trap, wait_int, Psr, SysArg, SysArgs, ALARM_DEV, CLOCK_DEV,
    DISK_DEV, MMU_DEV, TERM_DEV,
};

static HALT_CODE: Mutex<Option<i32>> = Mutex::new(None);

pub(crate) fn record_halt(code: i32) {
    let mut halt = HALT_CODE.lock();
    if halt.is_none() {
        *halt = Some(code);
    }
}

/// Stop the machine. The first recorded code wins; every context unwinds and
/// `run` returns the code on the boot thread. Does not return.
pub fn halt(code: i32) -> ! {
    log::debug!("halt({})", code);
    record_halt(code);
    context::begin_shutdown();
    context::unwind_current();
}

/// Power the machine on, run `boot_body` as the bootstrap context, and wait
/// for the machine to halt. Returns the halt code.
///
/// `boot_body` is expected to hand the CPU to the first process and not get
/// it back; the bootstrap context then parks until `halt` wakes it.
pub fn run(boot_body: impl FnOnce()) -> i32 {
    let _bootstrap = context::bootstrap();

    let outcome = catch_unwind(AssertUnwindSafe(boot_body));
    match outcome {
        Ok(()) => {}
        Err(payload) if payload.is::<context::ShutdownToken>() => {}
        Err(payload) => resume_unwind(payload),
    }

    // Normally we got here because halt released the bootstrap context, but
    // an early boot failure can land here with the machine still live.
    context::begin_shutdown();
    if let Some(failure) = context::join_all() {
        resume_unwind(failure);
    }
    (*HALT_CODE.lock()).unwrap_or(0)
}
