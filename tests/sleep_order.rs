//! Sleepers wake in deadline order no matter how the sleeps were issued,
//! and never before their deadline.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use nucleus::usercalls as usr;
use nucleus::{boot, Launch};

static WAKEUPS: Mutex<Vec<(i32, i64, i64)>> = Mutex::new(Vec::new());
static FAILED_SLEEPS: AtomicI32 = AtomicI32::new(0);

fn sleeper(arg: &str) -> i32 {
    let seconds: i32 = arg.parse().unwrap();
    let asked = usr::get_time_of_day();
    usr::sleep(seconds).unwrap();
    let woke = usr::get_time_of_day();
    WAKEUPS.lock().unwrap().push((seconds, asked, woke));
    usr::terminate(0);
}

fn start(_arg: &str) -> i32 {
    if usr::sleep(-1).is_err() {
        FAILED_SLEEPS.fetch_add(1, Ordering::SeqCst);
    }

    // Issued longest-first to prove the queue reorders by wake time.
    for seconds in ["3", "1", "2"] {
        usr::spawn("sleeper", sleeper, Some(seconds), nucleus::MIN_STACK, 3).unwrap();
    }
    for _ in 0..3 {
        usr::wait().unwrap();
    }
    usr::terminate(0);
}

#[test]
fn sleepers_wake_in_deadline_order() {
    let _ = env_logger::builder().is_test(true).try_init();
    assert_eq!(boot(Launch::Full, "start", start), 0);
    assert_eq!(FAILED_SLEEPS.load(Ordering::SeqCst), 1);

    let wakeups = WAKEUPS.lock().unwrap();
    let order: Vec<i32> = wakeups.iter().map(|w| w.0).collect();
    assert_eq!(order, vec![1, 2, 3]);
    for &(seconds, asked, woke) in wakeups.iter() {
        assert!(woke >= asked + i64::from(seconds) * 1_000_000);
    }
    let times: Vec<i64> = wakeups.iter().map(|w| w.2).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
}
