//! Static configuration of the kernel.
//!
//! Every table in the kernel is sized from these constants. Nothing is
//! allocated at runtime.
use crate::utils::{bitmap_groups, TwoLevelPrioBitmap};

/// The number of kernel task slots (`IDLE`, `CLOCK`, `SYSTEM`, `HARDWARE`).
pub const NR_TASKS: usize = 4;

/// The number of slots for ordinary processes (drivers, servers, and user
/// processes).
pub const NR_PROCS: usize = 32;

/// The total number of process table slots.
pub const NR_TOTAL: usize = NR_TASKS + NR_PROCS;

/// The number of scheduling queues. Queue `0` is the most urgent one.
pub const NR_SCHED_QUEUES: usize = 16;

/// The queue of kernel tasks.
pub const TASK_Q: usize = 0;

/// The default queue of device drivers.
pub const DRIVER_Q: usize = 1;

/// The default queue of system servers.
pub const SERVER_Q: usize = 3;

/// The queue of user processes. Drivers and servers are placed in
/// `TASK_Q + 1..USER_Q`.
pub const USER_Q: usize = 7;

/// The queue of the idle process. Nothing else may live here.
pub const IDLE_Q: usize = NR_SCHED_QUEUES - 1;

/// The capacity of the kernel-wide notification pool.
pub const NR_NOTIFY_BUFS: usize = 32;

/// The default quantum of kernel tasks, in ticks.
pub const TASK_QUANTUM: u32 = 8;

/// The default quantum of ordinary processes, in ticks.
pub const PROC_QUANTUM: u32 = 8;

/// A set of process table slots.
pub type SlotSet = TwoLevelPrioBitmap<{ bitmap_groups(NR_TOTAL) }>;

const _: () = assert!(TASK_Q < DRIVER_Q && DRIVER_Q <= SERVER_Q && SERVER_Q < USER_Q);
const _: () = assert!(USER_Q < IDLE_Q);
const _: () = assert!(NR_SCHED_QUEUES <= crate::utils::WORD_LEN);
