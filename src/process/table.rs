use crate::machine::context::Context;
use crate::machine::ProcEntry;

pub const MAX_PROC: usize = 50;
pub const MAX_NAME: usize = 50;
pub const MAX_ARG: usize = 100;
pub const MIN_STACK: usize = 64 * 1024;

pub const HIGHEST_PRIORITY: u8 = 1;
pub const LOWEST_PRIORITY: u8 = 5;
pub const SENTINEL_PRIORITY: u8 = 6;
pub const SENTINEL_PID: Pid = 1;

/// Budget a running process gets before the clock handler rotates it out.
pub const TIME_SLICE_US: i64 = 80_000;

/// Lowest status value accepted by `block_me`; everything below is reserved
/// for the kernel's own states.
pub const MIN_BLOCK_STATUS: i32 = 10;

pub type Pid = i32;

/// Scheduling state of a descriptor. `Blocked` carries the caller-supplied
/// reason; zap marks are kept separately since they are additive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcState {
    #[default]
    Unused,
    Ready,
    JoinBlocked,
    ZapBlocked,
    Blocked(i32),
    Quit,
}

impl ProcState {
    /// A block that a cancellation is allowed to interrupt.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, ProcState::Blocked(k) if *k >= MIN_BLOCK_STATUS)
    }
}

/// One process descriptor. Lives in a fixed table; slot = pid mod MAX_PROC.
#[derive(Default)]
pub struct ProcSlot {
    pub pid: Pid,
    pub name: String,
    pub entry: Option<ProcEntry>,
    pub arg: String,
    pub context: Option<Context>,
    pub stack_size: usize,
    pub priority: u8,
    pub parent: Pid,
    /// Child slots in insertion order.
    pub children: Vec<usize>,
    pub state: ProcState,
    pub zapped: bool,
    /// Slots blocked in `zap` waiting for this process to quit.
    pub zappers: Vec<usize>,
    pub exit_code: i32,
    /// Accumulated CPU microseconds.
    pub cpu_time: i64,
    /// Timestamp of the last dispatch.
    pub slice_start: i64,
}

impl ProcSlot {
    pub fn in_use(&self) -> bool {
        self.pid != 0
    }

    pub fn clear(&mut self) {
        *self = ProcSlot::default();
    }
}
