//! Device drivers.
//!
//! One clock driver process services the sleep queue; one disk driver
//! process per unit services an elevator-ordered request queue. User
//! requests are staged in the caller's slot of the driver table and the
//! caller parks on its private semaphore until the driver finishes.

pub mod clock;
pub mod disk;

use std::collections::VecDeque;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::machine;
use crate::machine::{SysArg, SysArgs, DISK_SECTOR_SIZE, DISK_TRACK_SIZE, DISK_UNITS};
use crate::process;
use crate::process::{Pid, MAX_PROC, MIN_STACK};
use crate::syscalls;
use crate::syscalls::sems;
use crate::syscalls::{SYS_DISKREAD, SYS_DISKSIZE, SYS_DISKWRITE, SYS_SLEEP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum DiskOp {
    #[default]
    Read,
    Write,
}

/// Driver descriptor: the per-process staging area for sleep and disk
/// requests, slot = pid mod MAX_PROC.
#[derive(Default)]
pub(crate) struct DriverProc {
    pub pid: Pid,
    pub wake_time: i64,
    pub op: DiskOp,
    pub track_start: usize,
    pub sector_start: usize,
    pub num_sectors: usize,
    /// Device status of the last request served for this slot.
    pub result: i32,
    /// Transfer buffer, owned by the slot while a request is in flight.
    pub buf: Option<Vec<u8>>,
    /// Private semaphore the owner parks on.
    pub sem: i32,
}

pub(crate) struct DriverState {
    pub table: Vec<DriverProc>,
    /// Sleeping processes ordered by ascending wake time; equal wake times
    /// keep their insertion order.
    pub sleepers: VecDeque<usize>,
    /// Per-unit request queues ordered by ascending start track.
    pub disk_queue: [VecDeque<usize>; DISK_UNITS],
    pub disk_sems: [i32; DISK_UNITS],
    pub running_sem: i32,
    pub num_tracks: [usize; DISK_UNITS],
    /// Head-position cursor, one per unit.
    pub head_track: [usize; DISK_UNITS],
    pub clock_pid: Pid,
    pub disk_pids: [Pid; DISK_UNITS],
}

impl DriverState {
    fn new() -> Self {
        let mut table = Vec::with_capacity(MAX_PROC);
        table.resize_with(MAX_PROC, DriverProc::default);
        DriverState {
            table,
            sleepers: VecDeque::new(),
            disk_queue: core::array::from_fn(|_| VecDeque::new()),
            disk_sems: [0; DISK_UNITS],
            running_sem: 0,
            num_tracks: [0; DISK_UNITS],
            head_track: [0; DISK_UNITS],
            clock_pid: 0,
            disk_pids: [0; DISK_UNITS],
        }
    }

    pub(crate) fn insert_sleeper(&mut self, slot: usize) {
        let wake = self.table[slot].wake_time;
        let pos = self
            .sleepers
            .iter()
            .position(|&s| self.table[s].wake_time > wake)
            .unwrap_or(self.sleepers.len());
        self.sleepers.insert(pos, slot);
    }

    pub(crate) fn insert_disk_request(&mut self, unit: usize, slot: usize) {
        let track = self.table[slot].track_start;
        let pos = self.disk_queue[unit]
            .iter()
            .position(|&s| self.table[s].track_start > track)
            .unwrap_or(self.disk_queue[unit].len());
        self.disk_queue[unit].insert(pos, slot);
    }
}

lazy_static! {
    pub(crate) static ref DRIVERS: Mutex<DriverState> = Mutex::new(DriverState::new());
}

// ──────────────────────────────────────────────────────────────
//  Sleep
// ──────────────────────────────────────────────────────────────

pub(crate) fn sleep_real(seconds: i32) -> Result<(), ()> {
    if seconds < 0 {
        return Err(());
    }
    let me = process::get_pid();
    let slot = me as usize % MAX_PROC;
    let wake = machine::sys_clock() + (seconds as i64) * 1_000_000;
    let sem = {
        let mut drivers = DRIVERS.lock();
        drivers.table[slot].pid = me;
        drivers.table[slot].wake_time = wake;
        drivers.insert_sleeper(slot);
        drivers.table[slot].sem
    };
    let _ = sems::p_real(sem);
    Ok(())
}

fn sys_sleep(args: &mut SysArgs) {
    let seconds = args.arg1.int().unwrap_or(-1) as i32;
    match sleep_real(seconds) {
        Ok(()) => args.arg4 = SysArg::Int(0),
        Err(()) => args.arg4 = SysArg::Int(-1),
    }
}

// ──────────────────────────────────────────────────────────────
//  Disk requests
// ──────────────────────────────────────────────────────────────

pub(crate) fn disk_io_real(
    op: DiskOp,
    unit: i64,
    track: i64,
    sector: i64,
    sectors: i64,
    data: Option<Vec<u8>>,
) -> Result<(i32, Option<Vec<u8>>), ()> {
    if !(0..DISK_UNITS as i64).contains(&unit) {
        return Err(());
    }
    let unit = unit as usize;
    if sectors < 0 || track < 0 || sector < 0 {
        return Err(());
    }
    // Bounds come from the device's own geometry, for reads and writes
    // alike.
    let tracks = DRIVERS.lock().num_tracks[unit];
    if track as usize >= tracks || sector as usize >= DISK_TRACK_SIZE {
        return Err(());
    }
    let span = sectors as usize * DISK_SECTOR_SIZE;
    let buf = match op {
        DiskOp::Write => {
            let data = data.ok_or(())?;
            if data.len() < span {
                return Err(());
            }
            data
        }
        DiskOp::Read => vec![0; span],
    };

    let me = process::get_pid();
    let slot = me as usize % MAX_PROC;
    let (request_sem, my_sem) = {
        let mut drivers = DRIVERS.lock();
        {
            let entry = &mut drivers.table[slot];
            entry.pid = me;
            entry.op = op;
            entry.track_start = track as usize;
            entry.sector_start = sector as usize;
            entry.num_sectors = sectors as usize;
            entry.result = machine::DEV_OK;
            entry.buf = Some(buf);
        }
        drivers.insert_disk_request(unit, slot);
        (drivers.disk_sems[unit], drivers.table[slot].sem)
    };
    let _ = sems::v_real(request_sem);
    let _ = sems::p_real(my_sem);

    let mut drivers = DRIVERS.lock();
    let status = drivers.table[slot].result;
    let out = drivers.table[slot].buf.take();
    Ok((status, out))
}

fn disk_io_sys(args: &mut SysArgs, op: DiskOp) {
    let sectors = args.arg2.int().unwrap_or(-1);
    let track = args.arg3.int().unwrap_or(-1);
    let sector = args.arg4.int().unwrap_or(-1);
    let unit = args.arg5.int().unwrap_or(-1);
    let data = match op {
        DiskOp::Write => args.arg1.take_bytes(),
        DiskOp::Read => None,
    };
    match disk_io_real(op, unit, track, sector, sectors, data) {
        Ok((status, out)) => {
            args.arg1 = SysArg::Int(status as i64);
            if op == DiskOp::Read {
                if let Some(bytes) = out {
                    args.arg2 = SysArg::Bytes(bytes);
                }
            }
            args.arg4 = SysArg::Int(0);
        }
        Err(()) => args.arg4 = SysArg::Int(-1),
    }
}

fn sys_disk_read(args: &mut SysArgs) {
    disk_io_sys(args, DiskOp::Read);
}

fn sys_disk_write(args: &mut SysArgs) {
    disk_io_sys(args, DiskOp::Write);
}

fn sys_disk_size(args: &mut SysArgs) {
    let unit = args.arg1.int().unwrap_or(-1);
    if !(0..DISK_UNITS as i64).contains(&unit) {
        crate::console!("disk_size(): illegal value given as unit.\n");
        args.arg4 = SysArg::Int(-1);
        return;
    }
    let tracks = DRIVERS.lock().num_tracks[unit as usize];
    args.arg1 = SysArg::Int(DISK_SECTOR_SIZE as i64);
    args.arg2 = SysArg::Int(DISK_TRACK_SIZE as i64);
    args.arg3 = SysArg::Int(tracks as i64);
    args.arg4 = SysArg::Int(0);
}

// ──────────────────────────────────────────────────────────────
//  Layer bootstrap
// ──────────────────────────────────────────────────────────────

/// Root process of the driver layer: create the semaphores, start the
/// drivers, run the first user program, then wind the drivers back down.
pub(crate) fn driver_start(_arg: &str) -> i32 {
    machine::check_kernel_mode("driver_start");

    syscalls::install(SYS_SLEEP, sys_sleep);
    syscalls::install(SYS_DISKREAD, sys_disk_read);
    syscalls::install(SYS_DISKWRITE, sys_disk_write);
    syscalls::install(SYS_DISKSIZE, sys_disk_size);

    for slot in 0..MAX_PROC {
        let sem = match sems::create_real(0) {
            Ok(sem) => sem,
            Err(err) => {
                crate::console!(
                    "driver_start(): cannot create a private semaphore: {}. Halting...\n",
                    err
                );
                machine::halt(1);
            }
        };
        DRIVERS.lock().table[slot].sem = sem;
    }
    for unit in 0..DISK_UNITS {
        let sem = match sems::create_real(0) {
            Ok(sem) => sem,
            Err(err) => {
                crate::console!(
                    "driver_start(): cannot create a disk queue semaphore: {}. Halting...\n",
                    err
                );
                machine::halt(1);
            }
        };
        DRIVERS.lock().disk_sems[unit] = sem;
    }
    let running = match sems::create_real(0) {
        Ok(sem) => sem,
        Err(err) => {
            crate::console!("driver_start(): cannot create the running semaphore: {}. Halting...\n", err);
            machine::halt(1);
        }
    };
    DRIVERS.lock().running_sem = running;

    let clock_pid = match process::fork("clock driver", clock::clock_driver, None, MIN_STACK, 2) {
        Ok(pid) => pid,
        Err(err) => {
            crate::console!("driver_start(): cannot create the clock driver: {}. Halting...\n", err);
            machine::halt(1);
        }
    };
    DRIVERS.lock().clock_pid = clock_pid;
    let _ = sems::p_real(running);

    for unit in 0..DISK_UNITS {
        let name = format!("disk driver {}", unit);
        let pid =
            match process::fork(&name, disk::disk_driver, Some(&unit.to_string()), MIN_STACK, 2) {
                Ok(pid) => pid,
                Err(err) => {
                    crate::console!(
                        "driver_start(): cannot create disk driver {}: {}. Halting...\n",
                        unit,
                        err
                    );
                    machine::halt(1);
                }
            };
        DRIVERS.lock().disk_pids[unit] = pid;
    }
    let _ = sems::p_real(running);
    let _ = sems::p_real(running);

    let plan = crate::boot_plan();
    if syscalls::spawn_real(&plan.name, plan.entry, None, 8 * MIN_STACK, 3).is_err() {
        crate::console!("driver_start(): cannot spawn {}. Halting...\n", plan.name);
        machine::halt(1);
    }
    let _ = syscalls::wait_real();

    // Shutdown: the clock driver is zapped out of its device wait; each
    // disk driver is released with an empty queue, which ends its loop.
    let clock_pid = DRIVERS.lock().clock_pid;
    let _ = process::zap(clock_pid);
    let _ = process::join();
    for unit in 0..DISK_UNITS {
        let sem = DRIVERS.lock().disk_sems[unit];
        let _ = sems::v_real(sem);
        let _ = process::join();
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(state: &mut DriverState, slot: usize, wake: i64, track: usize) {
        state.table[slot].wake_time = wake;
        state.table[slot].track_start = track;
    }

    #[test]
    fn sleep_queue_orders_by_wake_time_with_stable_ties() {
        let mut state = DriverState::new();
        staged(&mut state, 1, 300, 0);
        staged(&mut state, 2, 100, 0);
        staged(&mut state, 3, 300, 0);
        staged(&mut state, 4, 200, 0);
        for slot in [1, 2, 3, 4] {
            state.insert_sleeper(slot);
        }
        let order: Vec<usize> = state.sleepers.iter().copied().collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn disk_queue_orders_by_start_track() {
        let mut state = DriverState::new();
        staged(&mut state, 1, 0, 8);
        staged(&mut state, 2, 0, 2);
        staged(&mut state, 3, 0, 5);
        for slot in [1, 2, 3] {
            state.insert_disk_request(0, slot);
        }
        let order: Vec<usize> = state.disk_queue[0].iter().copied().collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert!(state.disk_queue[1].is_empty());
    }

    #[test]
    fn disk_queue_ties_keep_arrival_order() {
        let mut state = DriverState::new();
        staged(&mut state, 1, 0, 4);
        staged(&mut state, 2, 0, 4);
        staged(&mut state, 3, 0, 4);
        for slot in [1, 2, 3] {
            state.insert_disk_request(1, slot);
        }
        let order: Vec<usize> = state.disk_queue[1].iter().copied().collect();
        assert_eq!(order, vec![1, 2, 3]);
    }
}
