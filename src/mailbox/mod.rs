//! The mailbox manager.
//!
//! Mailboxes carry every blocking hand-off in the kernel: bounded message
//! queues, zero-slot rendezvous pairs, and the per-device boxes interrupt
//! handlers ping so drivers can wait for their hardware. Senders and
//! receivers park through the process manager and retry when woken.

pub mod slots;

use std::collections::VecDeque;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::machine;
use crate::machine::interrupts;
use crate::process;
use crate::process::{Pid, MAX_PROC, MIN_STACK};

pub use slots::{MAX_MESSAGE, MAX_SLOTS};
use slots::SlotPool;

pub const MAX_MBOX: usize = 200;

/// Block reason used while a sender waits for room or a partner.
const SEND_BLOCK: i32 = 11;
/// Block reason used while a receiver waits for a message.
const RECV_BLOCK: i32 = 12;

// ──────────────────────────────────────────────────────────────
//  Errors
// ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MboxError {
    /// Unknown mailbox, oversized message, or undersized receive buffer.
    Invalid,
    /// The conditional variant would have had to block.
    WouldBlock,
    /// The mailbox was released, or the caller was zapped, mid-operation.
    Cancelled,
}

impl MboxError {
    pub fn code(&self) -> i32 {
        match self {
            MboxError::Invalid => -1,
            MboxError::WouldBlock => -2,
            MboxError::Cancelled => -3,
        }
    }
}

impl core::fmt::Display for MboxError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            MboxError::Invalid => write!(f, "invalid mailbox operation"),
            MboxError::WouldBlock => write!(f, "operation would block"),
            MboxError::Cancelled => write!(f, "mailbox released or process zapped"),
        }
    }
}

// ──────────────────────────────────────────────────────────────
//  Tables
// ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct Mailbox {
    /// Monotone id; 0 marks a free table entry.
    id: i32,
    slots: usize,
    slot_size: usize,
    used_slots: usize,
    /// Queued messages as slot-pool indices, FIFO.
    messages: VecDeque<usize>,
    waiting_recv: VecDeque<Pid>,
    blocked_send: VecDeque<Pid>,
    released: bool,
}

/// Per-process mailbox side record, slot = pid mod MAX_PROC. Carries the
/// hand-off cells a parked process cannot hold on its own stack.
#[derive(Default)]
struct MboxProc {
    pid: Pid,
    /// Message delivered directly to a waiting receiver.
    delivered: Option<Vec<u8>>,
    /// Payload staged by a rendezvous-blocked sender.
    outgoing: Option<Vec<u8>>,
    /// The staged payload was consumed by a receiver.
    taken: bool,
    /// The mailbox went away while this process was parked on it.
    cancelled: bool,
}

struct MailSystem {
    boxes: Vec<Mailbox>,
    pool: SlotPool,
    procs: Vec<MboxProc>,
    next_id: i32,
    count: usize,
    /// Ids of the kernel device mailboxes, see `dev_box_index`.
    device_boxes: [i32; 6],
}

impl MailSystem {
    fn new() -> Self {
        let mut boxes = Vec::with_capacity(MAX_MBOX);
        boxes.resize_with(MAX_MBOX, Mailbox::default);
        let mut procs = Vec::with_capacity(MAX_PROC);
        procs.resize_with(MAX_PROC, MboxProc::default);
        MailSystem {
            boxes,
            pool: SlotPool::new(),
            procs,
            next_id: 1,
            count: 0,
            device_boxes: [0; 6],
        }
    }

    fn assign_id(&mut self) -> usize {
        loop {
            let slot = (self.next_id as usize) % MAX_MBOX;
            if self.boxes[slot].id == 0 {
                self.boxes[slot] = Mailbox { id: self.next_id, ..Default::default() };
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
        let slot = (id as usize) % MAX_MBOX;
        (self.boxes[slot].id == id).then_some(slot)
    }

    fn record(&mut self, pid: Pid) -> &mut MboxProc {
        let slot = (pid as usize) % MAX_PROC;
        if self.procs[slot].pid != pid {
            self.procs[slot] = MboxProc { pid, ..Default::default() };
        }
        &mut self.procs[slot]
    }
}

lazy_static! {
    static ref MAILROOM: Mutex<MailSystem> = Mutex::new(MailSystem::new());
}

// ──────────────────────────────────────────────────────────────
//  Public operations
// ──────────────────────────────────────────────────────────────

/// Create a mailbox with `slots` message slots of `slot_size` bytes each.
/// Zero slots makes a rendezvous mailbox.
pub fn create(slots: i32, slot_size: i32) -> Result<i32, MboxError> {
    machine::check_kernel_mode("MboxCreate");
    interrupts::without_interrupts(|| {
        let mut ms = MAILROOM.lock();
        if ms.count >= MAX_MBOX
            || slots < 0
            || slot_size < 0
            || slot_size as usize > MAX_MESSAGE
        {
            return Err(MboxError::Invalid);
        }
        let slot = ms.assign_id();
        ms.boxes[slot].slots = slots as usize;
        ms.boxes[slot].slot_size = slot_size as usize;
        ms.count += 1;
        Ok(ms.boxes[slot].id)
    })
}

/// Send a message, blocking while the mailbox has no room and no waiting
/// receiver.
pub fn send(id: i32, msg: &[u8]) -> Result<(), MboxError> {
    transfer_in(id, msg, true)
}

/// Like `send`, but reports `WouldBlock` instead of waiting.
pub fn cond_send(id: i32, msg: &[u8]) -> Result<(), MboxError> {
    transfer_in(id, msg, false)
}

/// Receive the oldest message, blocking while none is available. Returns the
/// message length.
pub fn receive(id: i32, buf: &mut [u8]) -> Result<usize, MboxError> {
    transfer_out(id, buf, true)
}

/// Like `receive`, but reports `WouldBlock` instead of waiting.
pub fn cond_receive(id: i32, buf: &mut [u8]) -> Result<usize, MboxError> {
    transfer_out(id, buf, false)
}

fn transfer_in(id: i32, msg: &[u8], can_block: bool) -> Result<(), MboxError> {
    machine::check_kernel_mode("MboxSend");
    interrupts::without_interrupts(|| {
        let me = process::get_pid();
        loop {
            let mut ms = MAILROOM.lock();
            let Some(bx) = ms.slot_of(id) else {
                return Err(MboxError::Invalid);
            };
            if ms.boxes[bx].released {
                return Err(MboxError::Cancelled);
            }
            if msg.len() > ms.boxes[bx].slot_size {
                return Err(MboxError::Invalid);
            }

            // A parked receiver gets the message directly, no slot needed.
            if let Some(receiver) = ms.boxes[bx].waiting_recv.pop_front() {
                ms.record(receiver).delivered = Some(msg.to_vec());
                drop(ms);
                let _ = process::unblock_proc(receiver);
                return Ok(());
            }

            if ms.boxes[bx].used_slots < ms.boxes[bx].slots {
                let mbox_id = ms.boxes[bx].id;
                match ms.pool.alloc(mbox_id, msg) {
                    Some(slot) => {
                        ms.boxes[bx].messages.push_back(slot);
                        ms.boxes[bx].used_slots += 1;
                        return Ok(());
                    }
                    None => {
                        drop(ms);
                        if can_block {
                            crate::console!("MboxSend(): the system is out of mail slots. Halting...\n");
                            machine::halt(1);
                        }
                        return Err(MboxError::WouldBlock);
                    }
                }
            }

            // Full, or a rendezvous box with nobody on the other side.
            if !can_block {
                return Err(MboxError::WouldBlock);
            }
            if ms.boxes[bx].slots == 0 {
                let record = ms.record(me);
                record.outgoing = Some(msg.to_vec());
                record.taken = false;
            }
            ms.boxes[bx].blocked_send.push_back(me);
            drop(ms);

            if process::block_me(SEND_BLOCK).is_err() {
                return Err(abandon(id, me));
            }

            let mut ms = MAILROOM.lock();
            let record = ms.record(me);
            if record.cancelled {
                record.cancelled = false;
                record.outgoing = None;
                return Err(MboxError::Cancelled);
            }
            if record.taken {
                record.taken = false;
                record.outgoing = None;
                return Ok(());
            }
            drop(ms);
            // Space may have opened up; retry the store.
        }
    })
}

fn transfer_out(id: i32, buf: &mut [u8], can_block: bool) -> Result<usize, MboxError> {
    machine::check_kernel_mode("MboxReceive");
    interrupts::without_interrupts(|| {
        let me = process::get_pid();
        loop {
            let mut ms = MAILROOM.lock();
            let Some(bx) = ms.slot_of(id) else {
                return Err(MboxError::Invalid);
            };
            if ms.boxes[bx].released {
                return Err(MboxError::Cancelled);
            }

            if let Some(&slot) = ms.boxes[bx].messages.front() {
                let len = ms.pool.len_of(slot);
                if len > buf.len() {
                    return Err(MboxError::Invalid);
                }
                buf[..len].copy_from_slice(ms.pool.payload(slot));
                ms.boxes[bx].messages.pop_front();
                ms.pool.free(slot);
                ms.boxes[bx].used_slots -= 1;
                // One sender per space made available, oldest first.
                let waker = if ms.boxes[bx].used_slots < ms.boxes[bx].slots {
                    ms.boxes[bx].blocked_send.pop_front()
                } else {
                    None
                };
                drop(ms);
                if let Some(sender) = waker {
                    let _ = process::unblock_proc(sender);
                }
                return Ok(len);
            }

            // Rendezvous: pair with the oldest blocked sender.
            if ms.boxes[bx].slots == 0 {
                if let Some(sender) = ms.boxes[bx].blocked_send.pop_front() {
                    let msg = ms.record(sender).outgoing.take().unwrap_or_default();
                    if msg.len() > buf.len() {
                        ms.record(sender).outgoing = Some(msg);
                        ms.boxes[bx].blocked_send.push_front(sender);
                        return Err(MboxError::Invalid);
                    }
                    let len = msg.len();
                    buf[..len].copy_from_slice(&msg);
                    ms.record(sender).taken = true;
                    drop(ms);
                    let _ = process::unblock_proc(sender);
                    return Ok(len);
                }
            }

            if !can_block {
                return Err(MboxError::WouldBlock);
            }
            {
                let record = ms.record(me);
                record.delivered = None;
                record.cancelled = false;
            }
            ms.boxes[bx].waiting_recv.push_back(me);
            drop(ms);

            if process::block_me(RECV_BLOCK).is_err() {
                return Err(abandon(id, me));
            }

            let mut ms = MAILROOM.lock();
            let record = ms.record(me);
            if let Some(msg) = record.delivered.take() {
                if msg.len() > buf.len() {
                    return Err(MboxError::Invalid);
                }
                let len = msg.len();
                buf[..len].copy_from_slice(&msg);
                return Ok(len);
            }
            if record.cancelled {
                record.cancelled = false;
                return Err(MboxError::Cancelled);
            }
            drop(ms);
            // Woken without a message in hand; look at the box again.
        }
    })
}

/// A zap ended the wait. Scrub the caller out of the mailbox queues and
/// reset its side record.
fn abandon(id: i32, me: Pid) -> MboxError {
    let mut ms = MAILROOM.lock();
    if let Some(bx) = ms.slot_of(id) {
        if let Some(pos) = ms.boxes[bx].waiting_recv.iter().position(|&p| p == me) {
            ms.boxes[bx].waiting_recv.remove(pos);
        }
        if let Some(pos) = ms.boxes[bx].blocked_send.iter().position(|&p| p == me) {
            ms.boxes[bx].blocked_send.remove(pos);
        }
    }
    let record = ms.record(me);
    record.delivered = None;
    record.outgoing = None;
    record.taken = false;
    record.cancelled = false;
    MboxError::Cancelled
}

/// Tear a mailbox down. Waiting receivers are zapped, blocked senders are
/// released; everybody parked on the box observes `Cancelled`.
pub fn release(id: i32) -> Result<(), MboxError> {
    machine::check_kernel_mode("MboxRelease");
    interrupts::without_interrupts(|| {
        let mut ms = MAILROOM.lock();
        let Some(bx) = ms.slot_of(id) else {
            return Err(MboxError::Invalid);
        };
        if ms.boxes[bx].released {
            return Err(MboxError::Invalid);
        }
        ms.boxes[bx].released = true;
        let receivers: Vec<Pid> = ms.boxes[bx].waiting_recv.drain(..).collect();
        let senders: Vec<Pid> = ms.boxes[bx].blocked_send.drain(..).collect();
        for &pid in receivers.iter().chain(senders.iter()) {
            ms.record(pid).cancelled = true;
        }
        let messages: Vec<usize> = ms.boxes[bx].messages.drain(..).collect();
        for slot in messages {
            ms.pool.free(slot);
        }
        ms.boxes[bx].used_slots = 0;
        drop(ms);

        let mut caller_zapped = false;
        for pid in receivers {
            if process::proc_exists(pid) && process::zap(pid).is_err() {
                caller_zapped = true;
            }
        }
        for pid in senders {
            let _ = process::unblock_proc(pid);
        }

        let mut ms = MAILROOM.lock();
        if let Some(bx) = ms.slot_of(id) {
            ms.boxes[bx] = Mailbox::default();
            ms.count -= 1;
        }
        drop(ms);

        if caller_zapped || process::is_zapped() {
            Err(MboxError::Cancelled)
        } else {
            Ok(())
        }
    })
}

// ──────────────────────────────────────────────────────────────
//  Device side
// ──────────────────────────────────────────────────────────────

/// Table index of the kernel mailbox backing a device unit.
fn dev_box_index(dev: usize, unit: usize) -> Option<usize> {
    match (dev, unit) {
        (machine::CLOCK_DEV, 0) => Some(0),
        (machine::ALARM_DEV, 0) => Some(1),
        (machine::DISK_DEV, u) if u < machine::DISK_UNITS => Some(2 + u),
        (machine::TERM_DEV, 0) => Some(4),
        (machine::MMU_DEV, 0) => Some(5),
        _ => None,
    }
}

/// Block until the device raises its next interrupt; returns the status word
/// the handler forwarded.
pub fn wait_device(dev: usize, unit: usize) -> Result<i32, MboxError> {
    machine::check_kernel_mode("waitdevice");
    let Some(index) = dev_box_index(dev, unit) else {
        crate::console!("waitdevice(): bad device {} unit {}. Halting...\n", dev, unit);
        machine::halt(1);
    };
    let id = MAILROOM.lock().device_boxes[index];
    process::note_device_wait_begin();
    let mut status = [0u8; 4];
    let result = receive(id, &mut status);
    process::note_device_wait_end();
    result.map(|len| if len == 4 { i32::from_le_bytes(status) } else { 0 })
}

/// Whether any process is currently waiting on a device.
pub fn check_io() -> bool {
    process::device_waiters() > 0
}

fn device_ping(dev: usize, unit: usize, status: i32) {
    let Some(index) = dev_box_index(dev, unit) else { return };
    let id = MAILROOM.lock().device_boxes[index];
    if id > 0 {
        // Never block in an interrupt handler; a missed ping just means
        // nobody was listening.
        let _ = cond_send(id, &status.to_le_bytes());
    }
}

fn clock_handler(_unit: usize, status: i32) {
    device_ping(machine::CLOCK_DEV, 0, status);
    process::time_slice();
}

fn alarm_handler(_unit: usize, _status: i32) {}

fn disk_handler(unit: usize, status: i32) {
    device_ping(machine::DISK_DEV, unit, status);
}

fn term_handler(_unit: usize, _status: i32) {}

fn mmu_handler(_unit: usize, _status: i32) {}

// ──────────────────────────────────────────────────────────────
//  Layer bootstrap
// ──────────────────────────────────────────────────────────────

fn init() {
    let mut ids = [0i32; 6];
    for id in ids.iter_mut() {
        *id = create(0, 4).expect("cannot create a device mailbox");
    }
    MAILROOM.lock().device_boxes = ids;

    interrupts::set_handler(machine::CLOCK_DEV, clock_handler);
    interrupts::set_handler(machine::ALARM_DEV, alarm_handler);
    interrupts::set_handler(machine::DISK_DEV, disk_handler);
    interrupts::set_handler(machine::TERM_DEV, term_handler);
    interrupts::set_handler(machine::MMU_DEV, mmu_handler);

    crate::syscalls::init_vector();
}

/// Root process of the IPC layer: build the tables, install the interrupt
/// side, then run the next layer and wait it out.
pub(crate) fn ipc_start(_arg: &str) -> i32 {
    machine::check_kernel_mode("ipc_start");
    interrupts::without_interrupts(init);

    let plan = crate::boot_plan();
    let (entry, name): (crate::ProcEntry, String) = match plan.launch {
        crate::Launch::Ipc => (plan.entry, plan.name),
        _ => (crate::syscalls::services_start, "services".to_string()),
    };

    let pid = match process::fork(&name, entry, None, 4 * MIN_STACK, 1) {
        Ok(pid) => pid,
        Err(err) => {
            crate::console!("ipc_start(): cannot fork {}: {}. Halting...\n", name, err);
            machine::halt(1);
        }
    };
    match process::join() {
        Ok((quit_pid, _)) if quit_pid == pid => {}
        other => log::warn!("ipc_start(): unexpected join result {:?}", other),
    }
    0
}
