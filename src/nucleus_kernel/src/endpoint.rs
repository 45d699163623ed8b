//! Endpoints: generation-checked names of process table slots.
//!
//! An endpoint packs a process number and the generation of the slot at the
//! time the process was created:
//!
//! ```text
//! endpoint = generation * GENERATION_SIZE + proc_nr
//! ```
//!
//! Kernel tasks always have generation 0, so their endpoints equal their
//! (negative) process numbers. The magic values [`Endpoint::ANY`],
//! [`Endpoint::NONE`], and [`Endpoint::SELF`] never decode to a valid slot.
use core::fmt;

use crate::{
    cfg::{NR_PROCS, NR_TASKS},
    utils::Init,
    ProcNr,
};

/// The largest number of kernel tasks the encoding can represent.
pub const MAX_NR_TASKS: i32 = 1023;

const ANY_MAGIC: i32 = 0x7ace;
const NONE_MAGIC: i32 = 0x6ace;
const SELF_MAGIC: i32 = 0x8ace;

/// The distance between two consecutive generations of the same slot.
pub const GENERATION_SIZE: i32 = MAX_NR_TASKS + SELF_MAGIC + 1;

/// Generations wrap back to 1 past this value.
pub const MAX_GENERATION: i32 = i32::MAX / GENERATION_SIZE - 1;

/// The address of a process, as used in `SEND`/`RECEIVE`/`NOTIFY`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Endpoint(i32);

impl Endpoint {
    /// Accept a message from any source (`RECEIVE` only).
    pub const ANY: Self = Self(ANY_MAGIC);
    /// No process. Used in snapshots of empty links.
    pub const NONE: Self = Self(NONE_MAGIC);
    /// The calling process itself.
    pub const SELF: Self = Self(SELF_MAGIC);

    /// Construct an endpoint from a generation and a process number.
    pub const fn new(generation: i32, proc_nr: ProcNr) -> Self {
        Self(generation * GENERATION_SIZE + proc_nr)
    }

    /// Construct an endpoint from its raw integer representation.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Get the raw integer representation.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Get the process number part.
    pub const fn proc_nr(self) -> ProcNr {
        // Widened so that arbitrary raw values from a trap can't overflow
        let shifted = self.0 as i64 + MAX_NR_TASKS as i64;
        (shifted.rem_euclid(GENERATION_SIZE as i64) - MAX_NR_TASKS as i64) as ProcNr
    }

    /// Get the generation part.
    pub const fn generation(self) -> i32 {
        let shifted = self.0 as i64 + MAX_NR_TASKS as i64;
        shifted.div_euclid(GENERATION_SIZE as i64) as i32
    }

    /// Get a flag indicating whether this is one of `ANY`, `NONE`, `SELF`.
    pub const fn is_magic(self) -> bool {
        matches!(self.0, ANY_MAGIC | NONE_MAGIC | SELF_MAGIC)
    }
}

impl Init for Endpoint {
    const INIT: Self = Self::NONE;
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            ANY_MAGIC => f.write_str("ANY"),
            NONE_MAGIC => f.write_str("NONE"),
            SELF_MAGIC => f.write_str("SELF"),
            _ => write!(f, "{}@{}", self.proc_nr(), self.generation()),
        }
    }
}

/// Get the next generation number for a slot that is being reclaimed.
pub(crate) const fn next_generation(generation: i32) -> i32 {
    if generation >= MAX_GENERATION {
        1
    } else {
        generation + 1
    }
}

/// Map a process number to its process table slot.
pub(crate) const fn slot_of(proc_nr: ProcNr) -> Option<usize> {
    if proc_nr >= -(NR_TASKS as i32) && proc_nr < NR_PROCS as i32 {
        Some((proc_nr + NR_TASKS as i32) as usize)
    } else {
        None
    }
}

/// Get the fixed slot of a kernel task.
pub(crate) const fn task_slot(proc_nr: ProcNr) -> usize {
    assert!(is_kernel_task(proc_nr) && proc_nr >= -(NR_TASKS as i32));
    (proc_nr + NR_TASKS as i32) as usize
}

/// Map a process table slot to its process number.
pub(crate) const fn proc_nr_of(slot: usize) -> ProcNr {
    slot as ProcNr - NR_TASKS as ProcNr
}

/// Get a flag indicating whether the process number belongs to a kernel task.
pub const fn is_kernel_task(proc_nr: ProcNr) -> bool {
    proc_nr < 0
}
