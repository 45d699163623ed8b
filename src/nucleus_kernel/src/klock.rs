//! Kernel state locking mechanism
use core::{fmt, mem::ManuallyDrop, ops};

use crate::{error::BadContextError, Port};

/// Cell type that can be accessed through [`CpuLockGuard`] (which can be
/// obtained by [`lock_cpu`]).
///
/// On a single processor, CPU Lock alone provides mutual exclusion. The inner
/// spin lock extends this to hosted ports where several threads play the role
/// of the processor.
pub(crate) struct CpuLockCell<T>(spin::Mutex<T>);

impl<T> CpuLockCell<T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(spin::Mutex::new(x))
    }
}

impl<T: fmt::Debug> fmt::Debug for CpuLockCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(inner) = self.0.try_lock() {
            f.write_str("CpuLockCell(")?;
            inner.fmt(f)?;
            f.write_str(")")
        } else {
            f.write_str("CpuLockCell(< locked >)")
        }
    }
}

/// Attempt to enter a CPU Lock state and get an RAII guard.
/// Return `BadContext` if the current context is already in a CPU Lock state.
pub(crate) fn lock_cpu<'a, P: Port, T>(
    port: &'a P,
    cell: &'a CpuLockCell<T>,
) -> Result<CpuLockGuard<'a, P, T>, BadContextError> {
    // Safety: `try_enter_cpu_lock` is only meant to be called by the kernel
    if unsafe { port.try_enter_cpu_lock() } {
        Ok(CpuLockGuard {
            port,
            inner: ManuallyDrop::new(cell.0.lock()),
        })
    } else {
        Err(BadContextError::BadContext)
    }
}

/// RAII guard for a CPU Lock state.
///
/// The contents of the [`CpuLockCell`] can be borrowed from this type.
pub(crate) struct CpuLockGuard<'a, P: Port, T> {
    port: &'a P,
    inner: ManuallyDrop<spin::MutexGuard<'a, T>>,
}

impl<P: Port, T> Drop for CpuLockGuard<'_, P, T> {
    fn drop(&mut self) {
        // Safety: `inner` is not used again
        unsafe { ManuallyDrop::drop(&mut self.inner) };

        // Safety: CPU Lock is currently active, and it's us (the kernel) who
        // are currently controlling the CPU Lock state
        unsafe { self.port.leave_cpu_lock() };
    }
}

impl<P: Port, T> ops::Deref for CpuLockGuard<'_, P, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<P: Port, T> ops::DerefMut for CpuLockGuard<'_, P, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
