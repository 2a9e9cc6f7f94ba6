//! Counting semaphores, built on mailboxes.
//!
//! Table updates are serialized by a single one-slot mutex mailbox so that P
//! and V can yield across kernel calls without racing on the counters. A
//! blocked P parks on the caller's private zero-slot mailbox and retries the
//! decrement when released, so the counter stays honest under contention.

use std::collections::VecDeque;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::machine;
use crate::machine::interrupts;
use crate::machine::{SysArg, SysArgs};
use crate::mailbox;
use crate::process;
use crate::process::Pid;

use super::{install, SYS_SEMCREATE, SYS_SEMFREE, SYS_SEMP, SYS_SEMV};

pub const MAX_SEMS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemError {
    /// Unknown or freed semaphore, or a bad initial value.
    Invalid,
    /// The caller was zapped while inside the operation.
    Cancelled,
}

impl core::fmt::Display for SemError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            SemError::Invalid => write!(f, "invalid semaphore"),
            SemError::Cancelled => write!(f, "semaphore operation cancelled"),
        }
    }
}

#[derive(Default)]
struct Semaphore {
    /// Monotone id; 0 marks a free table entry.
    id: i32,
    value: i32,
    waiting: VecDeque<Pid>,
}

struct SemTable {
    sems: Vec<Semaphore>,
    next_id: i32,
    count: usize,
    mutex_box: i32,
}

impl SemTable {
    fn new() -> Self {
        let mut sems = Vec::with_capacity(MAX_SEMS);
        sems.resize_with(MAX_SEMS, Semaphore::default);
        SemTable { sems, next_id: 1, count: 0, mutex_box: 0 }
    }

    fn assign_id(&mut self) -> usize {
        loop {
            let slot = (self.next_id as usize) % MAX_SEMS;
            if self.sems[slot].id == 0 {
                self.sems[slot] = Semaphore { id: self.next_id, ..Default::default() };
                self.next_id += 1;
                return slot;
            }
            self.next_id += 1;
        }
    }

    fn slot_of(&self, id: i32) -> Option<usize> {
        if id <= 0 {
            return None;
        }
        let slot = (id as usize) % MAX_SEMS;
        (self.sems[slot].id == id).then_some(slot)
    }
}

lazy_static! {
    static ref SEMS: Mutex<SemTable> = Mutex::new(SemTable::new());
}

fn mutex_enter() -> Result<(), SemError> {
    let id = SEMS.lock().mutex_box;
    mailbox::send(id, &[]).map_err(|_| SemError::Cancelled)
}

fn mutex_exit() {
    let id = SEMS.lock().mutex_box;
    let _ = mailbox::receive(id, &mut []);
}

// ──────────────────────────────────────────────────────────────
//  Kernel-side operations
// ──────────────────────────────────────────────────────────────

pub(crate) fn create_real(initial: i32) -> Result<i32, SemError> {
    machine::check_kernel_mode("SemCreate");
    interrupts::without_interrupts(|| {
        let mut table = SEMS.lock();
        if initial < 0 || table.count >= MAX_SEMS {
            return Err(SemError::Invalid);
        }
        let slot = table.assign_id();
        table.sems[slot].value = initial;
        table.count += 1;
        Ok(table.sems[slot].id)
    })
}

/// Decrement, or park until a V hands the count back over.
pub(crate) fn p_real(id: i32) -> Result<(), SemError> {
    machine::check_kernel_mode("SemP");
    interrupts::without_interrupts(|| {
        let me = process::get_pid();
        loop {
            if SEMS.lock().slot_of(id).is_none() {
                return Err(SemError::Invalid);
            }
            mutex_enter()?;
            let mut table = SEMS.lock();
            let Some(slot) = table.slot_of(id) else {
                drop(table);
                mutex_exit();
                return Err(SemError::Invalid);
            };
            if table.sems[slot].value > 0 {
                table.sems[slot].value -= 1;
                drop(table);
                mutex_exit();
                return Ok(());
            }
            table.sems[slot].waiting.push_back(me);
            drop(table);
            mutex_exit();

            let my_box = super::sem_mbox_of(me);
            if mailbox::receive(my_box, &mut []).is_err() {
                // Zapped out of the wait; scrub our queue entry.
                let mut table = SEMS.lock();
                if let Some(slot) = table.slot_of(id) {
                    if let Some(pos) =
                        table.sems[slot].waiting.iter().position(|&p| p == me)
                    {
                        table.sems[slot].waiting.remove(pos);
                    }
                }
                return Err(SemError::Cancelled);
            }
            // Released by a V; go around and retry the decrement.
        }
    })
}

/// Increment, releasing the oldest waiter if there is one. Never blocks on
/// the waiter side.
pub(crate) fn v_real(id: i32) -> Result<(), SemError> {
    machine::check_kernel_mode("SemV");
    interrupts::without_interrupts(|| {
        if SEMS.lock().slot_of(id).is_none() {
            return Err(SemError::Invalid);
        }
        mutex_enter()?;
        let woken = {
            let mut table = SEMS.lock();
            match table.slot_of(id) {
                Some(slot) => {
                    table.sems[slot].value += 1;
                    table.sems[slot].waiting.pop_front()
                }
                None => {
                    drop(table);
                    mutex_exit();
                    return Err(SemError::Invalid);
                }
            }
        };
        if let Some(pid) = woken {
            let sem_box = super::sem_mbox_of(pid);
            let _ = mailbox::cond_send(sem_box, &[]);
        }
        mutex_exit();
        Ok(())
    })
}

/// Free a semaphore. Waiters, if any, are zapped; returns 1 when there were
/// some, 0 otherwise.
pub(crate) fn free_real(id: i32) -> Result<i32, SemError> {
    machine::check_kernel_mode("SemFree");
    interrupts::without_interrupts(|| {
        if SEMS.lock().slot_of(id).is_none() {
            return Err(SemError::Invalid);
        }
        mutex_enter()?;
        let waiters = {
            let mut table = SEMS.lock();
            match table.slot_of(id) {
                Some(slot) => {
                    let waiters: Vec<Pid> = table.sems[slot].waiting.drain(..).collect();
                    table.sems[slot] = Semaphore::default();
                    table.count -= 1;
                    waiters
                }
                None => {
                    drop(table);
                    mutex_exit();
                    return Err(SemError::Invalid);
                }
            }
        };
        mutex_exit();

        let had_waiters = !waiters.is_empty();
        for pid in waiters {
            if process::proc_exists(pid) {
                let _ = process::zap(pid);
            }
        }
        Ok(if had_waiters { 1 } else { 0 })
    })
}

// ──────────────────────────────────────────────────────────────
//  Handlers
// ──────────────────────────────────────────────────────────────

fn sys_sem_create(args: &mut SysArgs) {
    let initial = args.arg1.int().unwrap_or(-1) as i32;
    match create_real(initial) {
        Ok(id) => {
            args.arg1 = SysArg::Int(id as i64);
            args.arg4 = SysArg::Int(0);
        }
        Err(_) => args.arg4 = SysArg::Int(-1),
    }
}

fn sys_sem_p(args: &mut SysArgs) {
    let id = args.arg1.int().unwrap_or(-1) as i32;
    match p_real(id) {
        Ok(()) => args.arg4 = SysArg::Int(0),
        Err(_) => args.arg4 = SysArg::Int(-1),
    }
}

fn sys_sem_v(args: &mut SysArgs) {
    let id = args.arg1.int().unwrap_or(-1) as i32;
    match v_real(id) {
        Ok(()) => args.arg4 = SysArg::Int(0),
        Err(_) => args.arg4 = SysArg::Int(-1),
    }
}

fn sys_sem_free(args: &mut SysArgs) {
    let id = args.arg1.int().unwrap_or(-1) as i32;
    match free_real(id) {
        Ok(result) => args.arg4 = SysArg::Int(result as i64),
        Err(_) => args.arg4 = SysArg::Int(-1),
    }
}

/// Create the mutex mailbox and claim the semaphore syscalls.
pub(crate) fn init() {
    let mutex = match mailbox::create(1, 0) {
        Ok(id) => id,
        Err(err) => {
            crate::console!("sems::init(): cannot create the mutex mailbox: {}. Halting...\n", err);
            machine::halt(1);
        }
    };
    SEMS.lock().mutex_box = mutex;
    install(SYS_SEMCREATE, sys_sem_create);
    install(SYS_SEMP, sys_sem_p);
    install(SYS_SEMV, sys_sem_v);
    install(SYS_SEMFREE, sys_sem_free);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotone_and_never_zero() {
        let mut table = SemTable::new();
        let a = table.assign_id();
        let b = table.assign_id();
        assert_eq!(table.sems[a].id, 1);
        assert_eq!(table.sems[b].id, 2);
        assert!(table.slot_of(0).is_none());
    }

    #[test]
    fn freed_slots_lose_their_old_id() {
        let mut table = SemTable::new();
        let a = table.assign_id();
        let id = table.sems[a].id;
        table.sems[a] = Semaphore::default();
        assert!(table.slot_of(id).is_none());
    }
}
