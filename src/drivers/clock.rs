//! The clock driver.
//!
//! A priority-2 kernel process that waits on the clock device and wakes
//! every sleeper whose time has come, in wake-time order.

use crate::machine;
use crate::machine::interrupts;
use crate::mailbox;
use crate::process;
use crate::syscalls::sems;

use super::DRIVERS;

pub(crate) fn clock_driver(_arg: &str) -> i32 {
    // Let the driver layer know we are up, then start taking ticks.
    let running = DRIVERS.lock().running_sem;
    let _ = sems::v_real(running);
    interrupts::enable_interrupts();

    while !process::is_zapped() {
        if mailbox::wait_device(machine::CLOCK_DEV, 0).is_err() {
            break;
        }
        let now = machine::sys_clock();
        loop {
            let due = {
                let mut drivers = DRIVERS.lock();
                match drivers.sleepers.front().copied() {
                    Some(slot) if drivers.table[slot].wake_time <= now => {
                        drivers.sleepers.pop_front();
                        Some(drivers.table[slot].sem)
                    }
                    _ => None,
                }
            };
            match due {
                Some(sem) => {
                    let _ = sems::v_real(sem);
                }
                None => break,
            }
        }
    }
    0
}
