//! The IPC and scheduling core of a MINIX-style microkernel.
//!
//! Processes live in a fixed process table and talk to each other with
//! fixed-size [`Message`]s through three primitives:
//!
//!  - `SEND`, which blocks until the destination takes the message
//!    (rendezvous),
//!  - `RECEIVE`, which takes a message from a blocked sender or a pending
//!    notification, or blocks until one arrives, and
//!  - `NOTIFY`, which never blocks the sender. Notifications that can't be
//!    delivered immediately are queued, and repeated ones from the same source
//!    with the same type are merged.
//!
//! Delivery is coupled with scheduling: unblocking a process puts it on a
//! per-priority ready queue and may preempt the process slated to run next.
//!
//! The kernel is driven through [`Kernel`]. Architecture-specific parts
//! (interrupt masking, access to process memory) are supplied by a [`Port`].
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cfg;
mod check;
mod clock;
pub mod endpoint;
mod error;
mod ipc;
mod kernel;
mod klock;
pub mod message;
mod notify;
mod proc;
mod readyqueue;
mod state;
pub mod syscall;
mod sysinfo;
pub mod utils;

pub use self::{
    clock::TickReport,
    endpoint::Endpoint,
    error::*,
    kernel::{ExecContext, Kernel},
    message::Message,
    proc::{
        CallMask, MemMap, ProcAttr, ProcKind, RtsFlags, Segment, SendMask, CLOCK, HARDWARE, IDLE,
        SYSTEM,
    },
    syscall::{Function, IpcFlags},
    sysinfo::{IpcStatus, PendingNotification, ProcInfo, ProcTable},
};

/// A process number. Kernel tasks have negative numbers.
pub type ProcNr = i32;

/// An address in the address space of a process.
pub type VirAddr = usize;

/// Implemented by a port. Provides the architecture-specific services the
/// kernel needs.
///
/// # Safety
///
/// `try_enter_cpu_lock` must only succeed if the current context doesn't hold
/// CPU Lock already. While CPU Lock is held, nothing else on the same
/// processor may enter the kernel.
pub unsafe trait Port: Send + Sync + 'static {
    /// Disable interrupts for the current context. Returns `false` without
    /// doing anything if they are already disabled by the kernel.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel.
    unsafe fn try_enter_cpu_lock(&self) -> bool;

    /// Re-enable interrupts.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel, and only while CPU Lock is
    /// held.
    unsafe fn leave_cpu_lock(&self);

    /// Get a flag indicating whether the current context holds CPU Lock.
    fn is_cpu_lock_active(&self) -> bool;

    /// Read the message buffer at `addr` in the address space of `proc_nr`.
    /// The kernel only calls this for addresses it has validated (or for
    /// kernel tasks, whose buffers are in kernel space).
    fn read_message(&self, proc_nr: ProcNr, addr: VirAddr) -> Message;

    /// Write the message buffer at `addr` in the address space of `proc_nr`.
    fn write_message(&self, proc_nr: ProcNr, addr: VirAddr, msg: &Message);

    /// Store `code` as the return value of the call `proc_nr` is blocked in.
    /// Used when a blocked call fails asynchronously.
    fn set_result(&self, proc_nr: ProcNr, code: ResultCode);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::Init;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Mutex,
        },
    };

    /// A port backed by hash maps.
    #[derive(Default)]
    pub(crate) struct TestPort {
        cpu_lock: AtomicBool,
        memory: Mutex<HashMap<(ProcNr, VirAddr), Message>>,
        pub(crate) results: Mutex<HashMap<ProcNr, ResultCode>>,
    }

    impl TestPort {
        pub(crate) fn read(&self, proc_nr: ProcNr, addr: VirAddr) -> Message {
            self.read_message(proc_nr, addr)
        }

        pub(crate) fn write(&self, proc_nr: ProcNr, addr: VirAddr, msg: &Message) {
            self.write_message(proc_nr, addr, msg)
        }
    }

    unsafe impl Port for TestPort {
        unsafe fn try_enter_cpu_lock(&self) -> bool {
            !self.cpu_lock.swap(true, Ordering::Acquire)
        }

        unsafe fn leave_cpu_lock(&self) {
            assert!(self.cpu_lock.swap(false, Ordering::Release));
        }

        fn is_cpu_lock_active(&self) -> bool {
            self.cpu_lock.load(Ordering::Relaxed)
        }

        fn read_message(&self, proc_nr: ProcNr, addr: VirAddr) -> Message {
            let memory = self.memory.lock().unwrap();
            memory.get(&(proc_nr, addr)).copied().unwrap_or(Message::INIT)
        }

        fn write_message(&self, proc_nr: ProcNr, addr: VirAddr, msg: &Message) {
            self.memory.lock().unwrap().insert((proc_nr, addr), *msg);
        }

        fn set_result(&self, proc_nr: ProcNr, code: ResultCode) {
            self.results.lock().unwrap().insert(proc_nr, code);
        }
    }

    #[test]
    fn nested_lock_is_rejected() {
        let kernel = Kernel::new(TestPort::default());
        let _ = env_logger::try_init();
        assert_eq!(kernel.uptime(), Ok(0));

        // Simulate being inside the kernel already
        assert!(unsafe { kernel.port().try_enter_cpu_lock() });
        assert_eq!(kernel.uptime(), Err(BadContextError::BadContext));
        assert_eq!(
            kernel.sys_call(Endpoint::new(0, IDLE), syscall::ECHO, Endpoint::ANY, 0),
            ResultCode::BadContext
        );
        unsafe { kernel.port().leave_cpu_lock() };

        assert_eq!(kernel.uptime(), Ok(0));
        log::debug!("{kernel:?}");
    }
}
