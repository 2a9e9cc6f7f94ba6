//! Raw sector I/O: data written across a track boundary reads back intact,
//! units are independent, and malformed requests are rejected.

use nucleus::machine::{DISK_SECTOR_SIZE, DISK_TRACK_SIZE};
use nucleus::usercalls as usr;
use nucleus::{boot, Launch};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn start(_arg: &str) -> i32 {
    let (sector_size, sectors_per_track, tracks) = usr::disk_size(0).unwrap();
    assert_eq!(sector_size as usize, DISK_SECTOR_SIZE);
    assert_eq!(sectors_per_track as usize, DISK_TRACK_SIZE);
    assert!(tracks > 0);

    // Four sectors starting at sector 14 span the track 3 / track 4 edge.
    let span = 4 * DISK_SECTOR_SIZE;
    let data = pattern(span, 5);
    assert_eq!(usr::disk_write(0, 3, 14, 4, &data), Ok(0));

    let mut back = vec![0u8; span];
    assert_eq!(usr::disk_read(0, 3, 14, 4, &mut back), Ok(0));
    assert_eq!(back, data);

    // The other unit holds its own bytes at the same address.
    let other = pattern(DISK_SECTOR_SIZE, 99);
    assert_eq!(usr::disk_write(1, 3, 14, 1, &other), Ok(0));
    let mut one = vec![0u8; DISK_SECTOR_SIZE];
    assert_eq!(usr::disk_read(1, 3, 14, 1, &mut one), Ok(0));
    assert_eq!(one, other);
    let mut again = vec![0u8; span];
    assert_eq!(usr::disk_read(0, 3, 14, 4, &mut again), Ok(0));
    assert_eq!(again, data);

    // Geometry violations and bad units never reach the driver.
    let mut buf = vec![0u8; DISK_SECTOR_SIZE];
    assert!(usr::disk_read(0, 3, DISK_TRACK_SIZE as i32, 1, &mut buf).is_err());
    assert!(usr::disk_read(0, tracks, 0, 1, &mut buf).is_err());
    assert!(usr::disk_read(5, 0, 0, 1, &mut buf).is_err());
    assert!(usr::disk_read(0, -1, 0, 1, &mut buf).is_err());
    assert!(usr::disk_write(0, 0, 0, -2, &buf).is_err());
    assert!(usr::disk_size(7).is_err());

    usr::terminate(0);
}

#[test]
fn sector_io_round_trips_across_tracks() {
    assert_eq!(boot(Launch::Full, "start", start), 0);
}
