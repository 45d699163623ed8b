//! Simulation environment for running the Nucleus core on a hosted
//! environment.
//!
//! [`StdPort`] implements [`Port`] with ordinary memory: the address space of
//! every process is a sparse map from addresses to message buffers, and the
//! result register of every process is a map entry that tests can inspect.
//! Each host thread acts as a processor with its own CPU Lock flag; the kernel
//! state itself is serialized by the kernel's internal lock.
#![deny(unsafe_op_in_unsafe_fn)]
use nucleus_kernel::{Kernel, Message, Port, ProcNr, ResultCode, VirAddr};
use spin::Mutex as SpinMutex;
use std::{
    cell::Cell,
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Used by [`init_logger`]
#[doc(hidden)]
pub extern crate env_logger;

thread_local! {
    /// Whether the current thread holds CPU Lock.
    static CPU_LOCK: Cell<bool> = Cell::new(false);
}

/// Initialize the logger for a test or a simulation. Can be called more than
/// once.
pub fn init_logger() {
    // `is_test(true)` would drop log messages from other threads
    let _ = env_logger::try_init();
}

/// The kernel as instantiated by this port.
pub type StdKernel = Kernel<StdPort>;

/// Boot a kernel on a fresh [`StdPort`].
pub fn boot() -> StdKernel {
    init_logger();
    Kernel::new(StdPort::new())
}

/// A [`Port`] backed by host memory.
#[derive(Debug, Default)]
pub struct StdPort {
    memory: SpinMutex<HashMap<(ProcNr, VirAddr), Message>>,
    results: SpinMutex<HashMap<ProcNr, ResultCode>>,
    lock_entries: AtomicUsize,
}

impl StdPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `msg` at `addr` in the address space of `proc_nr`, as the
    /// process itself would before trapping.
    pub fn write_user(&self, proc_nr: ProcNr, addr: VirAddr, msg: &Message) {
        self.memory.lock().insert((proc_nr, addr), *msg);
    }

    /// Load the message buffer at `addr` in the address space of `proc_nr`.
    /// Untouched buffers read as [`Message::default`].
    pub fn read_user(&self, proc_nr: ProcNr, addr: VirAddr) -> Message {
        self.memory
            .lock()
            .get(&(proc_nr, addr))
            .copied()
            .unwrap_or_default()
    }

    /// Take the result the kernel stored for a blocked call of `proc_nr`
    /// through [`Port::set_result`].
    pub fn take_result(&self, proc_nr: ProcNr) -> Option<ResultCode> {
        self.results.lock().remove(&proc_nr)
    }

    /// Get the number of times the kernel has entered CPU Lock.
    pub fn num_lock_entries(&self) -> usize {
        self.lock_entries.load(Ordering::Relaxed)
    }
}

unsafe impl Port for StdPort {
    unsafe fn try_enter_cpu_lock(&self) -> bool {
        if CPU_LOCK.with(|c| c.replace(true)) {
            log::trace!("CPU Lock is already held by this thread");
            false
        } else {
            self.lock_entries.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    unsafe fn leave_cpu_lock(&self) {
        let was_active = CPU_LOCK.with(|c| c.replace(false));
        debug_assert!(was_active, "CPU Lock is not held");
    }

    fn is_cpu_lock_active(&self) -> bool {
        CPU_LOCK.with(|c| c.get())
    }

    fn read_message(&self, proc_nr: ProcNr, addr: VirAddr) -> Message {
        self.read_user(proc_nr, addr)
    }

    fn write_message(&self, proc_nr: ProcNr, addr: VirAddr, msg: &Message) {
        log::trace!("write_message({proc_nr}, {addr:#x}, {msg:?})");
        self.write_user(proc_nr, addr, msg);
    }

    fn set_result(&self, proc_nr: ProcNr, code: ResultCode) {
        log::trace!("set_result({proc_nr}, {code:?})");
        self.results.lock().insert(proc_nr, code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nucleus_kernel::{Endpoint, IDLE};

    #[test]
    fn cpu_lock_is_per_thread() {
        let port = StdPort::new();
        assert!(!port.is_cpu_lock_active());
        assert!(unsafe { port.try_enter_cpu_lock() });
        assert!(port.is_cpu_lock_active());
        assert!(!unsafe { port.try_enter_cpu_lock() });

        std::thread::scope(|s| {
            s.spawn(|| assert!(!port.is_cpu_lock_active()));
        });

        unsafe { port.leave_cpu_lock() };
        assert!(!port.is_cpu_lock_active());
        assert_eq!(port.num_lock_entries(), 1);
    }

    #[test]
    fn user_memory() {
        let port = StdPort::new();
        assert_eq!(port.read_user(3, 0x40), Message::default());
        port.write_user(3, 0x40, &Message::new(9));
        assert_eq!(port.read_message(3, 0x40).m_type, 9);
        assert_eq!(port.read_user(4, 0x40), Message::default());
    }

    #[test]
    fn kernel_releases_cpu_lock() {
        let kernel = boot();
        assert_eq!(kernel.running(), Ok(Endpoint::new(0, IDLE)));
        assert!(!kernel.port().is_cpu_lock_active());
        assert_eq!(kernel.port().num_lock_entries(), 1);
    }
}
