//! The process manager.
//!
//! Owns the process table, the per-priority ready queues, and the blocked
//! list, and implements fork/join/quit, zap, explicit block/unblock, the
//! dispatcher, and the time slice. Everything below (mailboxes, semaphores,
//! drivers) blocks through here.

pub mod table;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;
use spin::Mutex;

use crate::machine;
use crate::machine::clock;
use crate::machine::context;
use crate::machine::interrupts;

pub use table::{
    Pid, ProcSlot, ProcState, HIGHEST_PRIORITY, LOWEST_PRIORITY, MAX_ARG, MAX_NAME, MAX_PROC,
    MIN_BLOCK_STATUS, MIN_STACK, SENTINEL_PID, SENTINEL_PRIORITY, TIME_SLICE_US,
};
pub use crate::machine::ProcEntry;

// ──────────────────────────────────────────────────────────────
//  Errors
// ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    StackTooSmall,
    TableFull,
    BadPriority,
}

impl ForkError {
    pub fn code(&self) -> i32 {
        match self {
            ForkError::StackTooSmall => -2,
            _ => -1,
        }
    }
}

impl core::fmt::Display for ForkError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ForkError::StackTooSmall => write!(f, "stack below minimum"),
            ForkError::TableFull => write!(f, "process table full"),
            ForkError::BadPriority => write!(f, "priority out of range"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    /// The caller has no children to wait for.
    NoChildren,
    /// The caller was zapped while waiting.
    Zapped,
}

impl JoinError {
    pub fn code(&self) -> i32 {
        match self {
            JoinError::NoChildren => -2,
            JoinError::Zapped => -1,
        }
    }
}

/// The calling process was zapped during the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zapped;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnblockError {
    /// Unknown pid, the caller itself, or a process not blocked by
    /// `block_me`.
    NotBlocked,
    /// The unblock happened but the caller is marked zapped.
    CallerZapped,
}

// ──────────────────────────────────────────────────────────────
//  Manager state
// ──────────────────────────────────────────────────────────────

const READY_QUEUES: usize = SENTINEL_PRIORITY as usize + 1;

pub(crate) struct ProcessManager {
    table: Vec<ProcSlot>,
    ready: [VecDeque<usize>; READY_QUEUES],
    blocked: VecDeque<usize>,
    current: Option<usize>,
    next_pid: Pid,
    count: usize,
    /// Dispatching is suppressed until bootstrap has both the sentinel and
    /// the root process in place.
    active: bool,
}

impl ProcessManager {
    fn new() -> Self {
        let mut table = Vec::with_capacity(MAX_PROC);
        table.resize_with(MAX_PROC, ProcSlot::default);
        ProcessManager {
            table,
            ready: core::array::from_fn(|_| VecDeque::new()),
            blocked: VecDeque::new(),
            current: None,
            next_pid: SENTINEL_PID,
            count: 0,
            active: false,
        }
    }

    fn assign_slot(&mut self) -> usize {
        loop {
            let slot = (self.next_pid as usize) % MAX_PROC;
            if !self.table[slot].in_use() {
                self.table[slot].pid = self.next_pid;
                self.next_pid += 1;
                return slot;
            }
            self.next_pid += 1;
        }
    }

    fn slot_of(&self, pid: Pid) -> Option<usize> {
        if pid <= 0 {
            return None;
        }
        let slot = (pid as usize) % MAX_PROC;
        (self.table[slot].pid == pid).then_some(slot)
    }

    fn current_slot(&self) -> usize {
        self.current.expect("no running process")
    }

    fn ready_push(&mut self, slot: usize) {
        let pri = self.table[slot].priority as usize;
        self.ready[pri].push_back(slot);
    }

    fn ready_remove(&mut self, slot: usize) {
        let pri = self.table[slot].priority as usize;
        if let Some(pos) = self.ready[pri].iter().position(|&s| s == slot) {
            self.ready[pri].remove(pos);
        }
    }

    fn pick_next(&self) -> Option<usize> {
        for pri in HIGHEST_PRIORITY as usize..=SENTINEL_PRIORITY as usize {
            if let Some(&head) = self.ready[pri].front() {
                return Some(head);
            }
        }
        None
    }

    /// Move the running process out of its ready queue into the blocked
    /// list with the given state.
    fn block_current(&mut self, state: ProcState) {
        let cur = self.current_slot();
        self.table[cur].state = state;
        self.ready_remove(cur);
        self.blocked.push_back(cur);
    }

    /// Move a blocked process back to the tail of its ready queue.
    fn wake(&mut self, slot: usize) {
        if let Some(pos) = self.blocked.iter().position(|&s| s == slot) {
            self.blocked.remove(pos);
        }
        self.table[slot].state = ProcState::Ready;
        self.ready_push(slot);
    }

    /// Free a quit child of `parent` and return its (pid, exit code).
    fn reap(&mut self, parent: usize, child_pos: usize) -> (Pid, i32) {
        let child = self.table[parent].children.remove(child_pos);
        let pid = self.table[child].pid;
        let code = self.table[child].exit_code;
        self.table[child].clear();
        self.count -= 1;
        (pid, code)
    }
}

lazy_static! {
    static ref PROC: Mutex<ProcessManager> = Mutex::new(ProcessManager::new());
}

/// Number of processes currently waiting inside `wait_device`. The idle
/// dispatcher only lets virtual time run while somebody is listening to a
/// device.
static DEVICE_WAITERS: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn note_device_wait_begin() {
    DEVICE_WAITERS.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn note_device_wait_end() {
    DEVICE_WAITERS.fetch_sub(1, Ordering::SeqCst);
}

pub(crate) fn device_waiters() -> usize {
    DEVICE_WAITERS.load(Ordering::SeqCst)
}

// ──────────────────────────────────────────────────────────────
//  Public operations
// ──────────────────────────────────────────────────────────────

/// Create a new process as a child of the caller and schedule it.
pub fn fork(
    name: &str,
    entry: ProcEntry,
    arg: Option<&str>,
    stack_size: usize,
    priority: u8,
) -> Result<Pid, ForkError> {
    interrupts::check_kernel_mode("fork");
    interrupts::without_interrupts(|| fork_inner(name, entry, arg, stack_size, priority))
}

fn fork_inner(
    name: &str,
    entry: ProcEntry,
    arg: Option<&str>,
    stack_size: usize,
    priority: u8,
) -> Result<Pid, ForkError> {
    if stack_size < MIN_STACK {
        return Err(ForkError::StackTooSmall);
    }

    let mut pm = PROC.lock();
    if pm.count >= MAX_PROC {
        return Err(ForkError::TableFull);
    }
    let sentinel_fork = pm.count == 0;
    if priority < HIGHEST_PRIORITY
        || priority > SENTINEL_PRIORITY
        || (priority == SENTINEL_PRIORITY && !sentinel_fork)
    {
        return Err(ForkError::BadPriority);
    }
    if name.len() >= MAX_NAME {
        drop(pm);
        crate::console!("fork(): process name is too long. Halting...\n");
        machine::halt(1);
    }
    let arg = arg.unwrap_or("");
    if arg.len() >= MAX_ARG {
        drop(pm);
        crate::console!("fork(): argument too long. Halting...\n");
        machine::halt(1);
    }

    let slot = pm.assign_slot();
    {
        let proc = &mut pm.table[slot];
        proc.name = name.to_string();
        proc.entry = Some(entry);
        proc.arg = arg.to_string();
        proc.stack_size = stack_size;
        proc.priority = priority;
        proc.state = ProcState::Ready;
    }
    let pid = pm.table[slot].pid;

    if let Some(cur) = pm.current {
        let parent_pid = pm.table[cur].pid;
        pm.table[slot].parent = parent_pid;
        pm.table[cur].children.push(slot);
    }

    pm.ready_push(slot);
    pm.count += 1;
    drop(pm);

    log::trace!("fork(): created {:?} pid {} priority {}", name, pid, priority);

    match context::spawn(name, stack_size, Box::new(move || launch(slot))) {
        Ok(ctx) => PROC.lock().table[slot].context = Some(ctx),
        Err(err) => {
            crate::console!("fork(): cannot create a machine context: {}. Halting...\n", err);
            machine::halt(1);
        }
    }

    dispatcher();
    Ok(pid)
}

/// First code run on a fresh context: enable interrupts, run the start
/// function, and quit with whatever it returns.
fn launch(slot: usize) {
    let (entry, arg) = {
        let pm = PROC.lock();
        let proc = &pm.table[slot];
        (proc.entry.expect("launch without an entry point"), proc.arg.clone())
    };
    interrupts::enable_interrupts();
    let code = entry(&arg);
    quit(code);
}

/// Wait for a child to quit and collect its exit code.
pub fn join() -> Result<(Pid, i32), JoinError> {
    interrupts::check_kernel_mode("join");
    interrupts::without_interrupts(join_inner)
}

fn join_inner() -> Result<(Pid, i32), JoinError> {
    let mut pm = PROC.lock();
    let cur = pm.current_slot();
    if pm.table[cur].children.is_empty() {
        return Err(JoinError::NoChildren);
    }

    // A child may already be gone; collect it without blocking.
    let quit_child = pm.table[cur]
        .children
        .iter()
        .position(|&c| pm.table[c].state == ProcState::Quit);
    if let Some(pos) = quit_child {
        return Ok(pm.reap(cur, pos));
    }
    if pm.table[cur].zapped {
        return Err(JoinError::Zapped);
    }

    pm.block_current(ProcState::JoinBlocked);
    drop(pm);
    dispatcher();

    let mut pm = PROC.lock();
    if pm.table[cur].zapped {
        return Err(JoinError::Zapped);
    }
    let pos = pm.table[cur]
        .children
        .iter()
        .position(|&c| pm.table[c].state == ProcState::Quit)
        .expect("join resumed without a quit child");
    Ok(pm.reap(cur, pos))
}

/// Terminate the running process. Its exit code is held for the parent's
/// join. Does not return.
pub fn quit(code: i32) -> ! {
    interrupts::check_kernel_mode("quit");
    interrupts::disable_interrupts();

    let mut pm = PROC.lock();
    let cur = pm.current_slot();

    // Children that already quit are reclaimed here; a live child is a
    // programmer error.
    let children = std::mem::take(&mut pm.table[cur].children);
    for &child in &children {
        if pm.table[child].state != ProcState::Quit {
            drop(pm);
            crate::console!("quit(): process has live children. Halting...\n");
            machine::halt(1);
        }
    }
    for child in children {
        pm.table[child].clear();
        pm.count -= 1;
    }

    pm.table[cur].state = ProcState::Quit;
    pm.table[cur].exit_code = code;
    pm.ready_remove(cur);

    let parent = pm.table[cur].parent;
    if let Some(pslot) = pm.slot_of(parent) {
        if pm.table[pslot].state == ProcState::JoinBlocked {
            pm.wake(pslot);
        }
    }
    for zapper in std::mem::take(&mut pm.table[cur].zappers) {
        if pm.table[zapper].state == ProcState::ZapBlocked {
            pm.wake(zapper);
        }
    }
    let pid = pm.table[cur].pid;
    drop(pm);

    log::trace!("quit(): pid {} exits with {}", pid, code);
    dispatcher();
    unreachable!("quit(): dispatched back into a terminated process");
}

/// Block the running process with a caller-supplied status (>= 10).
pub fn block_me(new_status: i32) -> Result<(), Zapped> {
    interrupts::check_kernel_mode("block_me");
    interrupts::without_interrupts(|| {
        if new_status < MIN_BLOCK_STATUS {
            crate::console!("block_me(): status must be >= {}. Halting...\n", MIN_BLOCK_STATUS);
            machine::halt(1);
        }
        let mut pm = PROC.lock();
        let cur = pm.current_slot();
        if pm.table[cur].zapped {
            // The mark is observable at every suspension point; refuse to
            // park a process that is already condemned.
            return Err(Zapped);
        }
        pm.block_current(ProcState::Blocked(new_status));
        drop(pm);
        dispatcher();

        let pm = PROC.lock();
        if pm.table[cur].zapped {
            Err(Zapped)
        } else {
            Ok(())
        }
    })
}

/// Make a process blocked by `block_me` runnable again.
pub fn unblock_proc(pid: Pid) -> Result<(), UnblockError> {
    interrupts::check_kernel_mode("unblock_proc");
    interrupts::without_interrupts(|| {
        let mut pm = PROC.lock();
        let Some(slot) = pm.slot_of(pid) else {
            return Err(UnblockError::NotBlocked);
        };
        let cur = pm.current_slot();
        if slot == cur || !pm.table[slot].state.is_cancellable() {
            return Err(UnblockError::NotBlocked);
        }
        pm.wake(slot);
        let caller_zapped = pm.table[cur].zapped;
        drop(pm);
        dispatcher();
        if caller_zapped {
            Err(UnblockError::CallerZapped)
        } else {
            Ok(())
        }
    })
}

/// Mark a process for cancellation and wait until it quits.
pub fn zap(pid: Pid) -> Result<(), Zapped> {
    interrupts::check_kernel_mode("zap");
    interrupts::without_interrupts(|| {
        let mut pm = PROC.lock();
        let cur = pm.current_slot();
        if pm.table[cur].pid == pid {
            drop(pm);
            crate::console!("zap(): a process may not zap itself. Halting...\n");
            machine::halt(1);
        }
        let Some(slot) = pm.slot_of(pid) else {
            drop(pm);
            crate::console!("zap(): no process with pid {}. Halting...\n", pid);
            machine::halt(1);
        };

        if pm.table[slot].state == ProcState::Quit {
            // Already dead, just unreaped. Nothing to wait for.
            let zapped = pm.table[cur].zapped;
            return if zapped { Err(Zapped) } else { Ok(()) };
        }

        pm.table[slot].zapped = true;
        if pm.table[slot].state.is_cancellable() {
            // Wake it so the mark is observable at its suspension point.
            pm.wake(slot);
        }
        pm.table[slot].zappers.push(cur);
        pm.block_current(ProcState::ZapBlocked);
        drop(pm);
        dispatcher();

        let pm = PROC.lock();
        if pm.table[cur].zapped {
            Err(Zapped)
        } else {
            Ok(())
        }
    })
}

/// Whether the running process has been zapped.
pub fn is_zapped() -> bool {
    let pm = PROC.lock();
    pm.current.map(|c| pm.table[c].zapped).unwrap_or(false)
}

pub fn get_pid() -> Pid {
    let pm = PROC.lock();
    pm.table[pm.current_slot()].pid
}

pub(crate) fn proc_exists(pid: Pid) -> bool {
    PROC.lock().slot_of(pid).is_some()
}

/// Timestamp of the running process's last dispatch.
pub fn read_cur_start_time() -> i64 {
    let pm = PROC.lock();
    pm.table[pm.current_slot()].slice_start
}

/// CPU microseconds consumed by the running process, current burst included.
pub fn read_time() -> i64 {
    let (accumulated, started) = {
        let pm = PROC.lock();
        let proc = &pm.table[pm.current_slot()];
        (proc.cpu_time, proc.slice_start)
    };
    accumulated + (clock::sys_clock() - started)
}

/// Print every live descriptor to the console.
pub fn dump_processes() {
    let pm = PROC.lock();
    for proc in pm.table.iter().filter(|p| p.in_use()) {
        crate::consoleln!(
            "pid {:3}  pri {}  {:?}  parent {:3}  children {:2}  cpu {:6} us  {}",
            proc.pid,
            proc.priority,
            proc.state,
            proc.parent,
            proc.children.len(),
            proc.cpu_time,
            proc.name
        );
    }
}

// ──────────────────────────────────────────────────────────────
//  Dispatching
// ──────────────────────────────────────────────────────────────

/// Hand the CPU to the highest-priority ready process. Idempotent when that
/// process is already running.
pub fn dispatcher() {
    interrupts::check_kernel_mode("dispatcher");
    interrupts::without_interrupts(dispatch_inner);
}

fn dispatch_inner() {
    loop {
        let mut pm = PROC.lock();
        if !pm.active {
            return;
        }
        match pm.pick_next() {
            Some(next) => {
                if Some(next) == pm.current {
                    return;
                }
                let now = clock::sys_clock();
                if let Some(old) = pm.current {
                    let elapsed = now - pm.table[old].slice_start;
                    pm.table[old].cpu_time += elapsed;
                }
                pm.table[next].slice_start = now;
                pm.current = Some(next);
                let to = pm.table[next].context.clone().expect("ready process has no context");
                drop(pm);

                let from = context::current();
                context::switch(&from, &to);
                return;
            }
            None => {
                drop(pm);
                // Nobody is ready. Let virtual time run while a driver is
                // listening to a device; anything else is a deadlock.
                if device_waiters() > 0 || clock::has_pending_device_event() {
                    clock::advance_to_next_event();
                    interrupts::deliver_due();
                    continue;
                }
                crate::console!("dispatcher(): all processes blocked, no device activity. Halting...\n");
                machine::halt(1);
            }
        }
    }
}

/// Invoked from the clock interrupt handler. Rotates the running process to
/// the tail of its queue once it has burned its slice.
pub fn time_slice() {
    interrupts::without_interrupts(|| {
        let mut pm = PROC.lock();
        let Some(cur) = pm.current else { return };
        if pm.table[cur].state != ProcState::Ready {
            return;
        }
        let now = clock::sys_clock();
        if now - pm.table[cur].slice_start < TIME_SLICE_US {
            return;
        }
        let pri = pm.table[cur].priority as usize;
        if pm.ready[pri].front() == Some(&cur) && pm.ready[pri].len() > 1 {
            pm.ready[pri].rotate_left(1);
            drop(pm);
            dispatcher();
        }
    });
}

// ──────────────────────────────────────────────────────────────
//  Sentinel and bootstrap
// ──────────────────────────────────────────────────────────────

fn sentinel(_arg: &str) -> i32 {
    log::trace!("sentinel(): running");
    loop {
        check_deadlock();
        machine::wait_int();
    }
}

fn check_deadlock() {
    match join() {
        Err(JoinError::NoChildren) => {
            crate::consoleln!("All processes completed.");
            machine::halt(0);
        }
        // A child of the sentinel finished; keep watching.
        _ => {}
    }
}

/// Basic clock handler installed before the mailbox layer takes over the
/// interrupt vector.
fn base_clock_handler(_unit: usize, _status: i32) {
    time_slice();
}

/// Bring the kernel up: sentinel plus the root process, then dispatch. Runs
/// on the bootstrap context, which does not get the CPU back until halt.
pub(crate) fn bootstrap(root_name: &str, root_entry: ProcEntry) {
    interrupts::check_kernel_mode("bootstrap");
    interrupts::set_handler(machine::CLOCK_DEV, base_clock_handler);

    let sentinel_pid = match fork("sentinel", sentinel, None, MIN_STACK, SENTINEL_PRIORITY) {
        Ok(pid) => pid,
        Err(err) => {
            crate::console!("bootstrap(): cannot fork the sentinel: {}. Halting...\n", err);
            machine::halt(1);
        }
    };
    {
        // The root process hangs off the sentinel, as does everything below
        // it; the sentinel's join is what notices the system drained.
        let mut pm = PROC.lock();
        let slot = pm.slot_of(sentinel_pid).expect("sentinel vanished");
        pm.current = Some(slot);
    }
    if let Err(err) = fork(root_name, root_entry, None, 2 * MIN_STACK, HIGHEST_PRIORITY) {
        crate::console!("bootstrap(): cannot fork {}: {}. Halting...\n", root_name, err);
        machine::halt(1);
    }

    PROC.lock().active = true;
    dispatcher();
}
