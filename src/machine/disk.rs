//! Simulated disk devices.
//!
//! Each unit is an in-memory array of tracks. Read and write address a sector
//! within the current track; the head moves only on SEEK. `device_output`
//! performs the transfer immediately and schedules the completion interrupt,
//! which carries the status word the driver waits for.

use lazy_static::lazy_static;
use spin::Mutex;

use super::clock;
use super::interrupts::DISK_DEV;

pub const DISK_UNITS: usize = 2;
pub const DISK_SECTOR_SIZE: usize = 512;
/// Sectors per track.
pub const DISK_TRACK_SIZE: usize = 16;
const DISK_TRACKS: usize = 32;

// ──────────────────────────────────────────────────────────────
//  Status words
// ──────────────────────────────────────────────────────────────

/// Request accepted / transfer completed cleanly.
pub const DEV_OK: i32 = 0;
/// A request is already in flight on the unit.
pub const DEV_BUSY: i32 = 1;
/// Malformed request (bad unit, short buffer).
pub const DEV_INVALID: i32 = 2;
/// The transfer addressed a sector or track that does not exist.
pub const DEV_ERROR: i32 = 3;

const TRACKS_LATENCY_US: i64 = 10;
const SEEK_LATENCY_US: i64 = 200;
const TRANSFER_LATENCY_US: i64 = 100;

/// A disk request. The operation/register triple of the device ABI, rendered
/// as a typed command carrying its buffer.
pub enum DiskCommand<'a> {
    Tracks { out: &'a mut usize },
    Seek { track: usize },
    ReadSector { sector: usize, buf: &'a mut [u8] },
    WriteSector { sector: usize, data: &'a [u8] },
}

pub(crate) struct DiskUnit {
    storage: Vec<u8>,
    tracks: usize,
    head: usize,
    busy: bool,
}

impl DiskUnit {
    fn new(tracks: usize) -> Self {
        DiskUnit {
            storage: vec![0; tracks * DISK_TRACK_SIZE * DISK_SECTOR_SIZE],
            tracks,
            head: 0,
            busy: false,
        }
    }

    fn sector_range(&self, sector: usize) -> std::ops::Range<usize> {
        let start = (self.head * DISK_TRACK_SIZE + sector) * DISK_SECTOR_SIZE;
        start..start + DISK_SECTOR_SIZE
    }

    /// Execute a command. Returns (accept code, completion status, latency).
    fn execute(&mut self, cmd: DiskCommand) -> (i32, i32, i64) {
        match cmd {
            DiskCommand::Tracks { out } => {
                *out = self.tracks;
                (DEV_OK, DEV_OK, TRACKS_LATENCY_US)
            }
            DiskCommand::Seek { track } => {
                if track >= self.tracks {
                    return (DEV_OK, DEV_ERROR, SEEK_LATENCY_US);
                }
                self.head = track;
                (DEV_OK, DEV_OK, SEEK_LATENCY_US)
            }
            DiskCommand::ReadSector { sector, buf } => {
                if buf.len() < DISK_SECTOR_SIZE {
                    return (DEV_INVALID, DEV_ERROR, 0);
                }
                if sector >= DISK_TRACK_SIZE {
                    return (DEV_OK, DEV_ERROR, TRANSFER_LATENCY_US);
                }
                let range = self.sector_range(sector);
                buf[..DISK_SECTOR_SIZE].copy_from_slice(&self.storage[range]);
                (DEV_OK, DEV_OK, TRANSFER_LATENCY_US)
            }
            DiskCommand::WriteSector { sector, data } => {
                if data.len() < DISK_SECTOR_SIZE {
                    return (DEV_INVALID, DEV_ERROR, 0);
                }
                if sector >= DISK_TRACK_SIZE {
                    return (DEV_OK, DEV_ERROR, TRANSFER_LATENCY_US);
                }
                let range = self.sector_range(sector);
                self.storage[range].copy_from_slice(&data[..DISK_SECTOR_SIZE]);
                (DEV_OK, DEV_OK, TRANSFER_LATENCY_US)
            }
        }
    }
}

lazy_static! {
    static ref DISKS: Mutex<Vec<DiskUnit>> =
        Mutex::new((0..DISK_UNITS).map(|_| DiskUnit::new(DISK_TRACKS)).collect());
}

/// Issue a request to a disk unit. On acceptance the completion interrupt is
/// scheduled; its status word reports how the transfer went.
pub fn device_output(unit: usize, cmd: DiskCommand) -> i32 {
    let mut disks = DISKS.lock();
    let Some(disk) = disks.get_mut(unit) else {
        return DEV_INVALID;
    };
    if disk.busy {
        return DEV_BUSY;
    }
    let (accepted, status, latency) = disk.execute(cmd);
    if accepted != DEV_OK {
        return accepted;
    }
    disk.busy = true;
    drop(disks);
    clock::schedule_event(DISK_DEV, unit, status, latency);
    DEV_OK
}

/// Interrupt delivery for a unit clears its busy latch.
pub(crate) fn complete(unit: usize) {
    if let Some(disk) = DISKS.lock().get_mut(unit) {
        disk.busy = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_through_storage() {
        let mut unit = DiskUnit::new(4);
        let data = [0xabu8; DISK_SECTOR_SIZE];
        let (acc, st, _) = unit.execute(DiskCommand::Seek { track: 2 });
        assert_eq!((acc, st), (DEV_OK, DEV_OK));
        let (acc, st, _) = unit.execute(DiskCommand::WriteSector { sector: 5, data: &data });
        assert_eq!((acc, st), (DEV_OK, DEV_OK));

        let mut buf = [0u8; DISK_SECTOR_SIZE];
        let (acc, st, _) = unit.execute(DiskCommand::ReadSector { sector: 5, buf: &mut buf });
        assert_eq!((acc, st), (DEV_OK, DEV_OK));
        assert_eq!(buf, data);
    }

    #[test]
    fn out_of_range_addresses_report_device_error() {
        let mut unit = DiskUnit::new(4);
        let (_, st, _) = unit.execute(DiskCommand::Seek { track: 99 });
        assert_eq!(st, DEV_ERROR);
        let mut buf = [0u8; DISK_SECTOR_SIZE];
        let (_, st, _) = unit.execute(DiskCommand::ReadSector { sector: DISK_TRACK_SIZE, buf: &mut buf });
        assert_eq!(st, DEV_ERROR);
    }

    #[test]
    fn tracks_probe_reports_geometry() {
        let mut unit = DiskUnit::new(7);
        let mut count = 0;
        let (acc, st, _) = unit.execute(DiskCommand::Tracks { out: &mut count });
        assert_eq!((acc, st), (DEV_OK, DEV_OK));
        assert_eq!(count, 7);
    }

    #[test]
    fn short_buffers_are_rejected_outright() {
        let mut unit = DiskUnit::new(4);
        let mut buf = [0u8; 16];
        let (acc, _, _) = unit.execute(DiskCommand::ReadSector { sector: 0, buf: &mut buf });
        assert_eq!(acc, DEV_INVALID);
    }
}
