//! The syscall manager.
//!
//! Owns the trap vector, the user process table, and the spawn/wait/
//! terminate service built on the process manager. The user-mode launcher
//! lives here: it is the only place the privilege bit is dropped.

pub mod sems;
pub mod usercalls;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::machine;
use crate::machine::interrupts;
use crate::machine::{SysArg, SysArgs};
use crate::mailbox;
use crate::process;
use crate::process::{ForkError, JoinError, Pid, ProcEntry, MAX_PROC, MIN_STACK};

pub const MAX_SYSCALLS: usize = 50;

pub const SYS_SPAWN: usize = 3;
pub const SYS_WAIT: usize = 4;
pub const SYS_TERMINATE: usize = 5;
pub const SYS_SEMCREATE: usize = 6;
pub const SYS_SEMP: usize = 7;
pub const SYS_SEMV: usize = 8;
pub const SYS_SEMFREE: usize = 9;
pub const SYS_GETTIMEOFDAY: usize = 10;
pub const SYS_CPUTIME: usize = 11;
pub const SYS_GETPID: usize = 12;
pub const SYS_SLEEP: usize = 13;
pub const SYS_DISKREAD: usize = 14;
pub const SYS_DISKWRITE: usize = 15;
pub const SYS_DISKSIZE: usize = 16;

type SysHandler = fn(&mut SysArgs);

static SYS_VEC: Mutex<[SysHandler; MAX_SYSCALLS]> =
    Mutex::new([nullsys as SysHandler; MAX_SYSCALLS]);

/// Target of every vector slot nobody has claimed.
fn nullsys(args: &mut SysArgs) {
    crate::console!("nullsys(): invalid syscall {}. Halting...\n", args.number);
    machine::halt(1);
}

/// Central trap handler: validate the number, dispatch through the vector.
fn dispatch_trap(args: &mut SysArgs) {
    let number = args.number;
    if number >= MAX_SYSCALLS {
        crate::console!("syscall_handler(): sys number {} is wrong. Halting...\n", number);
        machine::halt(1);
    }
    let handler = SYS_VEC.lock()[number];
    handler(args);
}

/// Route the machine's syscall trap here. The vector starts out all-null.
pub(crate) fn init_vector() {
    interrupts::set_syscall_gate(dispatch_trap);
}

pub(crate) fn install(number: usize, handler: SysHandler) {
    SYS_VEC.lock()[number] = handler;
}

// ──────────────────────────────────────────────────────────────
//  User process table
// ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct UserProc {
    pid: Pid,
    parent: Pid,
    entry: Option<ProcEntry>,
    /// One-slot box the parent pings once the entry point is stored.
    startup_mbox: i32,
    /// Zero-slot box this process parks on inside a semaphore P.
    sem_mbox: i32,
    children: Vec<Pid>,
}

struct UserTable {
    procs: Vec<UserProc>,
}

lazy_static! {
    static ref USER: Mutex<UserTable> = {
        let mut procs = Vec::with_capacity(MAX_PROC);
        procs.resize_with(MAX_PROC, UserProc::default);
        Mutex::new(UserTable { procs })
    };
}

fn init_user_table() {
    for slot in 0..MAX_PROC {
        let startup = match mailbox::create(1, 0) {
            Ok(id) => id,
            Err(err) => {
                crate::console!(
                    "services_start(): cannot create a startup mailbox: {}. Halting...\n",
                    err
                );
                machine::halt(1);
            }
        };
        let sem_box = match mailbox::create(0, 0) {
            Ok(id) => id,
            Err(err) => {
                crate::console!(
                    "services_start(): cannot create a semaphore mailbox: {}. Halting...\n",
                    err
                );
                machine::halt(1);
            }
        };
        let mut user = USER.lock();
        user.procs[slot].startup_mbox = startup;
        user.procs[slot].sem_mbox = sem_box;
    }
}

pub(crate) fn sem_mbox_of(pid: Pid) -> i32 {
    USER.lock().procs[pid as usize % MAX_PROC].sem_mbox
}

// ──────────────────────────────────────────────────────────────
//  Spawn / wait / terminate
// ──────────────────────────────────────────────────────────────

/// Trampoline every spawned process starts in. Waits for the parent to
/// store the entry point, drops to user mode, and terminates on return.
fn launch_user(arg: &str) -> i32 {
    let me = process::get_pid();
    let slot = me as usize % MAX_PROC;
    let startup = USER.lock().procs[slot].startup_mbox;
    let _ = mailbox::receive(startup, &mut []);
    let entry = USER.lock().procs[slot].entry.expect("spawned process has no entry point");

    interrupts::enter_user_mode();
    let _code = entry(arg);
    usercalls::terminate(9);
}

/// Fork a process that will run `entry` in user mode.
pub(crate) fn spawn_real(
    name: &str,
    entry: ProcEntry,
    arg: Option<&str>,
    stack_size: usize,
    priority: u8,
) -> Result<Pid, ForkError> {
    let pid = process::fork(name, launch_user, arg, stack_size, priority)?;
    let me = process::get_pid();
    let startup = {
        let mut user = USER.lock();
        let slot = pid as usize % MAX_PROC;
        let startup = user.procs[slot].startup_mbox;
        let sem_box = user.procs[slot].sem_mbox;
        user.procs[slot] = UserProc {
            pid,
            parent: me,
            entry: Some(entry),
            startup_mbox: startup,
            sem_mbox: sem_box,
            children: Vec::new(),
        };
        let parent_slot = me as usize % MAX_PROC;
        user.procs[parent_slot].children.push(pid);
        startup
    };
    // The launcher may or may not be parked yet; the one-slot box covers
    // both sides of the race.
    let _ = mailbox::cond_send(startup, &[]);
    Ok(pid)
}

/// Join on a child and unlink it from the user-level child list.
pub(crate) fn wait_real() -> Result<(Pid, i32), JoinError> {
    match process::join() {
        Ok((pid, code)) => {
            let me = process::get_pid();
            let mut user = USER.lock();
            let slot = me as usize % MAX_PROC;
            user.procs[slot].children.retain(|&c| c != pid);
            Ok((pid, code))
        }
        Err(JoinError::Zapped) => terminate_real(1),
        Err(err) => Err(err),
    }
}

/// Zap every child, then quit with `code`. Does not return.
pub(crate) fn terminate_real(code: i32) -> ! {
    let me = process::get_pid();
    let slot = me as usize % MAX_PROC;
    let children: Vec<Pid> = {
        let mut user = USER.lock();
        std::mem::take(&mut user.procs[slot].children)
    };
    for child in children {
        if process::proc_exists(child) {
            let _ = process::zap(child);
        }
    }
    process::quit(code)
}

// ──────────────────────────────────────────────────────────────
//  Handlers
// ──────────────────────────────────────────────────────────────

fn sys_spawn(args: &mut SysArgs) {
    let entry = args.arg1.entry();
    let arg_text = args.arg2.text().map(str::to_string);
    let stack = args.arg3.int().unwrap_or(0);
    let priority = args.arg4.int().unwrap_or(0);
    let name = args.arg5.text().unwrap_or("").to_string();

    args.arg1 = SysArg::Int(-1);
    args.arg4 = SysArg::Int(1);

    let Some(entry) = entry else { return };
    if name.is_empty() || stack < MIN_STACK as i64 || !(1..=5).contains(&priority) {
        return;
    }
    if let Ok(pid) = spawn_real(&name, entry, arg_text.as_deref(), stack as usize, priority as u8)
    {
        args.arg1 = SysArg::Int(pid as i64);
        args.arg4 = SysArg::Int(0);
    }
}

fn sys_wait(args: &mut SysArgs) {
    match wait_real() {
        Ok((pid, status)) => {
            args.arg1 = SysArg::Int(pid as i64);
            args.arg2 = SysArg::Int(status as i64);
            args.arg4 = SysArg::Int(0);
        }
        Err(_) => {
            args.arg1 = SysArg::Int(-2);
            args.arg4 = SysArg::Int(-1);
        }
    }
}

fn sys_terminate(args: &mut SysArgs) {
    let code = args.arg1.int().unwrap_or(0) as i32;
    terminate_real(code);
}

fn sys_get_time_of_day(args: &mut SysArgs) {
    args.arg1 = SysArg::Int(machine::sys_clock());
}

fn sys_cpu_time(args: &mut SysArgs) {
    args.arg1 = SysArg::Int(process::read_time());
}

fn sys_get_pid(args: &mut SysArgs) {
    args.arg1 = SysArg::Int(process::get_pid() as i64);
}

// ──────────────────────────────────────────────────────────────
//  Layer bootstrap
// ──────────────────────────────────────────────────────────────

/// Root process of the service layer: user table, semaphores, and the
/// syscall vector entries, then the driver layer underneath.
pub(crate) fn services_start(_arg: &str) -> i32 {
    machine::check_kernel_mode("services_start");

    init_user_table();
    install(SYS_SPAWN, sys_spawn);
    install(SYS_WAIT, sys_wait);
    install(SYS_TERMINATE, sys_terminate);
    install(SYS_GETTIMEOFDAY, sys_get_time_of_day);
    install(SYS_CPUTIME, sys_cpu_time);
    install(SYS_GETPID, sys_get_pid);
    sems::init();

    let pid = match process::fork("devices", crate::drivers::driver_start, None, 4 * MIN_STACK, 3)
    {
        Ok(pid) => pid,
        Err(err) => {
            crate::console!(
                "services_start(): cannot fork the driver layer: {}. Halting...\n",
                err
            );
            machine::halt(1);
        }
    };
    match process::join() {
        Ok((quit_pid, _)) if quit_pid == pid => {}
        other => log::warn!("services_start(): unexpected join result {:?}", other),
    }
    0
}
