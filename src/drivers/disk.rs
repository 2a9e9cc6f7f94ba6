//! The disk driver.
//!
//! One priority-2 kernel process per unit. At startup it probes the track
//! count and homes the head; after that it serves the unit's request queue
//! in ascending-track order, one sector at a time, seeking only when the
//! head is off the request's track.

use crate::machine;
use crate::machine::disk::{device_output, DiskCommand};
use crate::machine::{DEV_ERROR, DEV_OK, DISK_SECTOR_SIZE, DISK_TRACK_SIZE};
use crate::mailbox;
use crate::process;
use crate::syscalls::sems;

use super::{DiskOp, DRIVERS};

pub(crate) fn disk_driver(arg: &str) -> i32 {
    let unit: usize = arg.parse().unwrap_or(0);

    // Probe the geometry before announcing ourselves.
    let mut tracks = 0usize;
    if device_output(unit, DiskCommand::Tracks { out: &mut tracks }) != DEV_OK {
        crate::console!("disk driver {}: cannot issue the tracks probe. Halting...\n", unit);
        machine::halt(1);
    }
    match mailbox::wait_device(machine::DISK_DEV, unit) {
        Ok(status) if status == DEV_OK => {}
        Ok(_) => {
            crate::console!("disk driver {}: tracks probe failed. Halting...\n", unit);
            machine::halt(1);
        }
        Err(_) => return 0,
    }
    {
        let mut drivers = DRIVERS.lock();
        drivers.num_tracks[unit] = tracks;
        drivers.head_track[unit] = 0;
    }
    if !seek_and_wait(unit, 0) {
        crate::console!("disk driver {}: cannot home the head. Halting...\n", unit);
        machine::halt(1);
    }

    let (running, request_sem) = {
        let drivers = DRIVERS.lock();
        (drivers.running_sem, drivers.disk_sems[unit])
    };
    let _ = sems::v_real(running);

    while !process::is_zapped() {
        if sems::p_real(request_sem).is_err() {
            break;
        }
        let head_request = DRIVERS.lock().disk_queue[unit].front().copied();
        match head_request {
            Some(slot) => serve_request(unit, slot),
            // An empty queue behind a V is the shutdown signal.
            None => break,
        }
    }
    0
}

fn seek_and_wait(unit: usize, track: usize) -> bool {
    if device_output(unit, DiskCommand::Seek { track }) != DEV_OK {
        return false;
    }
    matches!(mailbox::wait_device(machine::DISK_DEV, unit), Ok(status) if status == DEV_OK)
}

/// Serve one staged request: seek, transfer sector by sector with track
/// wrap-around, then wake the requester.
fn serve_request(unit: usize, slot: usize) {
    let (op, track_start, sector_start, num_sectors, mut buf, mut head, tracks) = {
        let mut drivers = DRIVERS.lock();
        let buf = drivers.table[slot].buf.take().unwrap_or_default();
        (
            drivers.table[slot].op,
            drivers.table[slot].track_start,
            drivers.table[slot].sector_start,
            drivers.table[slot].num_sectors,
            buf,
            drivers.head_track[unit],
            drivers.num_tracks[unit],
        )
    };

    let mut result = DEV_OK;
    // A requester zapped out of its wait leaves no usable buffer behind.
    let num_sectors = if buf.len() < num_sectors * DISK_SECTOR_SIZE {
        result = DEV_ERROR;
        0
    } else {
        num_sectors
    };
    if track_start != head {
        if !seek_and_wait(unit, track_start) {
            crate::console!("disk driver {}: seek to track {} failed. Halting...\n", unit, track_start);
            machine::halt(1);
        }
        head = track_start;
    }

    let mut sector = sector_start;
    for index in 0..num_sectors {
        let offset = index * DISK_SECTOR_SIZE;
        let issued = match op {
            DiskOp::Read => device_output(
                unit,
                DiskCommand::ReadSector {
                    sector,
                    buf: &mut buf[offset..offset + DISK_SECTOR_SIZE],
                },
            ),
            DiskOp::Write => device_output(
                unit,
                DiskCommand::WriteSector {
                    sector,
                    data: &buf[offset..offset + DISK_SECTOR_SIZE],
                },
            ),
        };
        if issued != DEV_OK {
            result = issued;
            break;
        }
        match mailbox::wait_device(machine::DISK_DEV, unit) {
            Ok(status) if status == DEV_OK => {}
            Ok(status) => {
                // A bad sector ends the transfer; the requester sees the
                // status in its result slot.
                result = status;
                break;
            }
            Err(_) => {
                result = DEV_ERROR;
                break;
            }
        }
        if index + 1 < num_sectors {
            sector += 1;
            if sector >= DISK_TRACK_SIZE {
                sector = 0;
                let next = (head + 1) % tracks;
                if !seek_and_wait(unit, next) {
                    crate::console!("disk driver {}: seek to track {} failed. Halting...\n", unit, next);
                    machine::halt(1);
                }
                head = next;
            }
        }
    }

    let sem = {
        let mut drivers = DRIVERS.lock();
        drivers.head_track[unit] = head;
        drivers.table[slot].result = result;
        drivers.table[slot].buf = Some(buf);
        if let Some(pos) = drivers.disk_queue[unit].iter().position(|&s| s == slot) {
            drivers.disk_queue[unit].remove(pos);
        }
        drivers.table[slot].sem
    };
    let _ = sems::v_real(sem);
}
