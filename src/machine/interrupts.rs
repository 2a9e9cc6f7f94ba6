//! Processor status register, interrupt vector, and interrupt delivery.
//!
//! Interrupts are delivered when the executing context enters the machine
//! (clock read, syscall trap, `wait_int`) with CURRENT_INT set in its PSR.
//! Delivery runs the vectored handler in kernel mode with interrupts off and
//! restores the interrupted PSR afterwards.

use std::cell::Cell;

use bitflags::bitflags;
use spin::Mutex;

use super::clock;
use super::context::ProcEntry;
use super::disk;

bitflags! {
    /// Processor status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Psr: u32 {
        const CURRENT_MODE = 1 << 0;
        const CURRENT_INT  = 1 << 1;
        const PREV_MODE    = 1 << 2;
        const PREV_INT     = 1 << 3;
    }
}

// ──────────────────────────────────────────────────────────────
//  Device numbering
// ──────────────────────────────────────────────────────────────

pub const CLOCK_DEV: usize = 0;
pub const ALARM_DEV: usize = 1;
pub const DISK_DEV: usize = 2;
pub const TERM_DEV: usize = 3;
pub const MMU_DEV: usize = 4;
pub const NUM_DEV_TYPES: usize = 5;

/// A device interrupt handler: unit number and device status word.
pub type DeviceHandler = fn(unit: usize, status: i32);

/// The syscall gate, entered by `trap`.
pub type SyscallGate = fn(&mut SysArgs);

static INT_VEC: Mutex<[Option<DeviceHandler>; NUM_DEV_TYPES]> =
    Mutex::new([None; NUM_DEV_TYPES]);
static SYSCALL_GATE: Mutex<Option<SyscallGate>> = Mutex::new(None);

thread_local! {
    // Every context starts in kernel mode with interrupts disabled.
    static PSR: Cell<u32> = const { Cell::new(Psr::CURRENT_MODE.bits()) };
}

// ──────────────────────────────────────────────────────────────
//  PSR access
// ──────────────────────────────────────────────────────────────

pub fn psr_get() -> Psr {
    Psr::from_bits_truncate(PSR.with(|p| p.get()))
}

fn psr_put(psr: Psr) {
    PSR.with(|p| p.set(psr.bits()));
}

pub fn in_kernel_mode() -> bool {
    psr_get().contains(Psr::CURRENT_MODE)
}

pub fn interrupts_enabled() -> bool {
    psr_get().contains(Psr::CURRENT_INT)
}

/// Halt with a diagnostic unless the caller is in kernel mode.
pub fn check_kernel_mode(what: &str) {
    if !in_kernel_mode() {
        crate::console!("{}: not in kernel mode. Halting...\n", what);
        super::halt(1);
    }
}

pub fn enable_interrupts() {
    check_kernel_mode("enable_interrupts");
    psr_put(psr_get() | Psr::CURRENT_INT);
    poll();
}

pub fn disable_interrupts() {
    check_kernel_mode("disable_interrupts");
    psr_put(psr_get() - Psr::CURRENT_INT);
}

/// Run `f` with interrupts disabled, restoring the previous interrupt state
/// on the way out. The kernel's critical sections all go through here.
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    check_kernel_mode("without_interrupts");
    let prior = psr_get();
    psr_put(prior - Psr::CURRENT_INT);
    let result = f();
    psr_put(psr_get() | (prior & Psr::CURRENT_INT));
    if interrupts_enabled() {
        poll();
    }
    result
}

/// Drop to user mode. Interrupt state is preserved.
pub fn enter_user_mode() {
    check_kernel_mode("enter_user_mode");
    let psr = psr_get();
    psr_put((psr - Psr::CURRENT_MODE) | Psr::PREV_MODE);
}

// ──────────────────────────────────────────────────────────────
//  Vector installation
// ──────────────────────────────────────────────────────────────

pub fn set_handler(dev: usize, handler: DeviceHandler) {
    if dev >= NUM_DEV_TYPES {
        crate::console!("set_handler(): bad device {}. Halting...\n", dev);
        super::halt(1);
    }
    INT_VEC.lock()[dev] = Some(handler);
}

pub fn set_syscall_gate(gate: SyscallGate) {
    *SYSCALL_GATE.lock() = Some(gate);
}

// ──────────────────────────────────────────────────────────────
//  Syscall ABI
// ──────────────────────────────────────────────────────────────

/// One argument slot of the syscall record. The slots are in/out: handlers
/// read their inputs and write results back into the same record.
#[derive(Clone, Debug, Default)]
pub enum SysArg {
    #[default]
    None,
    Int(i64),
    Text(String),
    Entry(ProcEntry),
    Bytes(Vec<u8>),
}

impl SysArg {
    pub fn int(&self) -> Option<i64> {
        match self {
            SysArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            SysArg::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn entry(&self) -> Option<ProcEntry> {
        match self {
            SysArg::Entry(e) => Some(*e),
            _ => None,
        }
    }

    pub fn take_bytes(&mut self) -> Option<Vec<u8>> {
        match std::mem::take(self) {
            SysArg::Bytes(b) => Some(b),
            other => {
                *self = other;
                None
            }
        }
    }
}

/// The syscall record: a call number plus five argument slots. Return value
/// conventionally lands in arg1, the error code in arg4 (0 = ok).
#[derive(Clone, Debug, Default)]
pub struct SysArgs {
    pub number: usize,
    pub arg1: SysArg,
    pub arg2: SysArg,
    pub arg3: SysArg,
    pub arg4: SysArg,
    pub arg5: SysArg,
}

impl SysArgs {
    pub fn new(number: usize) -> Self {
        SysArgs { number, ..Default::default() }
    }

    /// The error code slot as an integer (0 when the handler left it unset).
    pub fn err_code(&self) -> i64 {
        self.arg4.int().unwrap_or(0)
    }
}

/// Issue a syscall. The machine vectors to the installed gate in kernel mode
/// with interrupts off, then restores the caller's PSR.
pub fn trap(args: &mut SysArgs) {
    poll();
    let saved = psr_get();
    let mut entered = Psr::CURRENT_MODE;
    if saved.contains(Psr::CURRENT_MODE) {
        entered |= Psr::PREV_MODE;
    }
    if saved.contains(Psr::CURRENT_INT) {
        entered |= Psr::PREV_INT;
    }
    psr_put(entered);

    let gate = *SYSCALL_GATE.lock();
    match gate {
        Some(gate) => gate(args),
        None => {
            crate::console!("trap(): no syscall handler installed. Halting...\n");
            super::halt(1);
        }
    }

    psr_put(saved);
    poll();
}

// ──────────────────────────────────────────────────────────────
//  Delivery
// ──────────────────────────────────────────────────────────────

fn deliver(dev: usize, unit: usize, status: i32) {
    if dev == DISK_DEV {
        disk::complete(unit);
    }
    let saved = psr_get();
    psr_put(Psr::CURRENT_MODE);
    let handler = INT_VEC.lock()[dev];
    match handler {
        Some(handler) => handler(unit, status),
        None => {
            crate::console!("interrupt {} has no handler installed. Halting...\n", dev);
            super::halt(1);
        }
    }
    psr_put(saved);
}

/// Deliver every pending interrupt whose time has come, provided the
/// executing context has interrupts enabled.
pub fn poll() {
    loop {
        if !interrupts_enabled() {
            return;
        }
        match clock::due_event() {
            Some((dev, unit, status)) => deliver(dev, unit, status),
            None => return,
        }
    }
}

/// Deliver due interrupts regardless of the executing context's interrupt
/// mask. Used by the dispatcher's idle window, where no process is running.
pub(crate) fn deliver_due() {
    while let Some((dev, unit, status)) = clock::due_event() {
        deliver(dev, unit, status);
    }
}

/// Wait for the next interrupt: advance the clock to the next pending event
/// and deliver it.
pub fn wait_int() {
    check_kernel_mode("waitint");
    if !interrupts_enabled() {
        crate::console!("waitint(): called with interrupts disabled. Halting...\n");
        super::halt(1);
    }
    clock::advance_to_next_event();
    poll();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psr_starts_in_kernel_mode_with_interrupts_off() {
        assert!(in_kernel_mode());
        assert!(!interrupts_enabled());
    }

    #[test]
    fn without_interrupts_restores_prior_state() {
        psr_put(Psr::CURRENT_MODE | Psr::CURRENT_INT);
        without_interrupts(|| {
            assert!(!interrupts_enabled());
            without_interrupts(|| assert!(!interrupts_enabled()));
            assert!(!interrupts_enabled());
        });
        assert!(interrupts_enabled());
        psr_put(Psr::CURRENT_MODE);
    }

    #[test]
    fn enter_user_mode_clears_the_mode_bit() {
        psr_put(Psr::CURRENT_MODE | Psr::CURRENT_INT);
        enter_user_mode();
        assert!(!in_kernel_mode());
        assert!(interrupts_enabled());
        assert!(psr_get().contains(Psr::PREV_MODE));
        psr_put(Psr::CURRENT_MODE);
    }
}
