//! Requests queued while the disk driver is busy are served in ascending
//! start-track order, not arrival order.

use std::sync::Mutex;

use nucleus::machine::{DISK_SECTOR_SIZE, DISK_TRACK_SIZE};
use nucleus::usercalls as usr;
use nucleus::{boot, Launch};

static SERVED: Mutex<Vec<i32>> = Mutex::new(Vec::new());

fn requester(arg: &str) -> i32 {
    let track: i32 = arg.parse().unwrap();
    let mut buf = vec![0u8; 4 * DISK_SECTOR_SIZE];
    let status = usr::disk_read(0, track, 0, 4, &mut buf).unwrap();
    assert_eq!(status, 0);
    assert_eq!(buf.len(), 4 * DISK_SECTOR_SIZE);
    SERVED.lock().unwrap().push(track);
    usr::terminate(0);
}

fn start(_arg: &str) -> i32 {
    let (sector_size, sectors_per_track, _tracks) = usr::disk_size(0).unwrap();
    assert_eq!(sector_size as usize, DISK_SECTOR_SIZE);
    assert_eq!(sectors_per_track as usize, DISK_TRACK_SIZE);

    // The first requester puts the driver to work on track 8; the other two
    // line up while it is busy and are served track-order 2 then 5.
    for track in ["8", "2", "5"] {
        usr::spawn("requester", requester, Some(track), nucleus::MIN_STACK, 3).unwrap();
    }
    for _ in 0..3 {
        usr::wait().unwrap();
    }
    usr::terminate(0);
}

#[test]
fn disk_queue_is_an_ascending_elevator() {
    let _ = env_logger::builder().is_test(true).try_init();
    assert_eq!(boot(Launch::Full, "start", start), 0);
    assert_eq!(*SERVED.lock().unwrap(), vec![8, 2, 5]);
}
