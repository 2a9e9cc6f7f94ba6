//! User-mode wrappers for the system calls.
//!
//! Each wrapper packs a syscall record, traps into the kernel, and unpacks
//! the result slots. This is the only interface user code is expected to
//! touch; calling into the kernel modules directly from user mode halts the
//! machine.

use crate::machine;
use crate::machine::{SysArg, SysArgs};
use crate::process::{Pid, ProcEntry};

use super::{
    SYS_CPUTIME, SYS_DISKREAD, SYS_DISKSIZE, SYS_DISKWRITE, SYS_GETPID, SYS_GETTIMEOFDAY,
    SYS_SEMCREATE, SYS_SEMFREE, SYS_SEMP, SYS_SEMV, SYS_SLEEP, SYS_SPAWN, SYS_TERMINATE,
    SYS_WAIT,
};

/// Start a new user-mode process. Returns its pid.
pub fn spawn(
    name: &str,
    entry: ProcEntry,
    arg: Option<&str>,
    stack_size: usize,
    priority: u8,
) -> Result<Pid, i32> {
    let mut args = SysArgs::new(SYS_SPAWN);
    args.arg1 = SysArg::Entry(entry);
    args.arg2 = SysArg::Text(arg.unwrap_or("").to_string());
    args.arg3 = SysArg::Int(stack_size as i64);
    args.arg4 = SysArg::Int(priority as i64);
    args.arg5 = SysArg::Text(name.to_string());
    machine::trap(&mut args);
    if args.err_code() == 0 {
        Ok(args.arg1.int().unwrap_or(-1) as Pid)
    } else {
        Err(args.err_code() as i32)
    }
}

/// Wait for a child to terminate. Returns (pid, exit status).
pub fn wait() -> Result<(Pid, i32), i32> {
    let mut args = SysArgs::new(SYS_WAIT);
    machine::trap(&mut args);
    if args.err_code() == 0 {
        Ok((
            args.arg1.int().unwrap_or(-1) as Pid,
            args.arg2.int().unwrap_or(0) as i32,
        ))
    } else {
        Err(args.err_code() as i32)
    }
}

/// Terminate the calling process and everything it spawned.
pub fn terminate(code: i32) -> ! {
    let mut args = SysArgs::new(SYS_TERMINATE);
    args.arg1 = SysArg::Int(code as i64);
    machine::trap(&mut args);
    unreachable!("terminate() returned");
}

pub fn sem_create(initial: i32) -> Result<i32, i32> {
    let mut args = SysArgs::new(SYS_SEMCREATE);
    args.arg1 = SysArg::Int(initial as i64);
    machine::trap(&mut args);
    if args.err_code() == 0 {
        Ok(args.arg1.int().unwrap_or(-1) as i32)
    } else {
        Err(args.err_code() as i32)
    }
}

pub fn sem_p(id: i32) -> Result<(), i32> {
    let mut args = SysArgs::new(SYS_SEMP);
    args.arg1 = SysArg::Int(id as i64);
    machine::trap(&mut args);
    if args.err_code() == 0 { Ok(()) } else { Err(args.err_code() as i32) }
}

pub fn sem_v(id: i32) -> Result<(), i32> {
    let mut args = SysArgs::new(SYS_SEMV);
    args.arg1 = SysArg::Int(id as i64);
    machine::trap(&mut args);
    if args.err_code() == 0 { Ok(()) } else { Err(args.err_code() as i32) }
}

/// Free a semaphore. Returns 1 when waiters had to be zapped, 0 otherwise.
pub fn sem_free(id: i32) -> Result<i32, i32> {
    let mut args = SysArgs::new(SYS_SEMFREE);
    args.arg1 = SysArg::Int(id as i64);
    machine::trap(&mut args);
    match args.err_code() {
        -1 => Err(-1),
        n => Ok(n as i32),
    }
}

/// Microseconds on the time-of-day clock.
pub fn get_time_of_day() -> i64 {
    let mut args = SysArgs::new(SYS_GETTIMEOFDAY);
    machine::trap(&mut args);
    args.arg1.int().unwrap_or(0)
}

/// CPU microseconds consumed by the caller.
pub fn cpu_time() -> i64 {
    let mut args = SysArgs::new(SYS_CPUTIME);
    machine::trap(&mut args);
    args.arg1.int().unwrap_or(0)
}

pub fn get_pid() -> Pid {
    let mut args = SysArgs::new(SYS_GETPID);
    machine::trap(&mut args);
    args.arg1.int().unwrap_or(-1) as Pid
}

/// Block the caller for at least `seconds` seconds.
pub fn sleep(seconds: i32) -> Result<(), i32> {
    let mut args = SysArgs::new(SYS_SLEEP);
    args.arg1 = SysArg::Int(seconds as i64);
    machine::trap(&mut args);
    if args.err_code() == 0 { Ok(()) } else { Err(args.err_code() as i32) }
}

/// Read `sectors` sectors starting at (track, first_sector) into `buf`.
/// Returns the device status for the request (0 = clean transfer).
pub fn disk_read(
    unit: i32,
    track: i32,
    first_sector: i32,
    sectors: i32,
    buf: &mut [u8],
) -> Result<i32, i32> {
    let mut args = SysArgs::new(SYS_DISKREAD);
    args.arg2 = SysArg::Int(sectors as i64);
    args.arg3 = SysArg::Int(track as i64);
    args.arg4 = SysArg::Int(first_sector as i64);
    args.arg5 = SysArg::Int(unit as i64);
    machine::trap(&mut args);
    if args.err_code() != 0 {
        return Err(args.err_code() as i32);
    }
    let status = args.arg1.int().unwrap_or(0) as i32;
    if let Some(data) = args.arg2.take_bytes() {
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
    }
    Ok(status)
}

/// Write `sectors` sectors from `data` starting at (track, first_sector).
pub fn disk_write(
    unit: i32,
    track: i32,
    first_sector: i32,
    sectors: i32,
    data: &[u8],
) -> Result<i32, i32> {
    let mut args = SysArgs::new(SYS_DISKWRITE);
    args.arg1 = SysArg::Bytes(data.to_vec());
    args.arg2 = SysArg::Int(sectors as i64);
    args.arg3 = SysArg::Int(track as i64);
    args.arg4 = SysArg::Int(first_sector as i64);
    args.arg5 = SysArg::Int(unit as i64);
    machine::trap(&mut args);
    if args.err_code() != 0 {
        return Err(args.err_code() as i32);
    }
    Ok(args.arg1.int().unwrap_or(0) as i32)
}

/// Geometry of a disk unit: (sector size, sectors per track, tracks).
pub fn disk_size(unit: i32) -> Result<(i32, i32, i32), i32> {
    let mut args = SysArgs::new(SYS_DISKSIZE);
    args.arg1 = SysArg::Int(unit as i64);
    machine::trap(&mut args);
    if args.err_code() != 0 {
        return Err(args.err_code() as i32);
    }
    Ok((
        args.arg1.int().unwrap_or(0) as i32,
        args.arg2.int().unwrap_or(0) as i32,
        args.arg3.int().unwrap_or(0) as i32,
    ))
}
