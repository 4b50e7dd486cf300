//! Kernel state locking mechanism
//!
//! CPU Lock is modeled by a spinlock guarding [`KernelState`]. A thread-local
//! flag tracks whether the current thread holds it so that a nested attempt
//! is reported as `BadContext` instead of spinning forever.
use std::{cell::Cell, ops};

use crate::{error::BadContextError, Kernel, KernelState, Port};

/// The storage for the kernel state.
pub(crate) struct CpuLock<Traits: Port>(spin::Mutex<KernelState<Traits>>);

impl<Traits: Port> CpuLock<Traits> {
    pub(crate) fn new(state: KernelState<Traits>) -> Self {
        Self(spin::Mutex::new(state))
    }
}

thread_local! {
    static CPU_LOCK_ACTIVE: Cell<bool> = Cell::new(false);
}

/// Return `true` iff the current thread holds CPU Lock of any kernel
/// instance.
pub fn is_cpu_lock_active() -> bool {
    CPU_LOCK_ACTIVE.with(Cell::get)
}

/// Attempt to enter a CPU Lock state and get an RAII guard.
/// Return `BadContext` if the kernel is already in a CPU Lock state.
pub(crate) fn lock_cpu<Traits: Port>(
    kernel: &Kernel<Traits>,
) -> Result<CpuLockGuard<'_, Traits>, BadContextError> {
    if is_cpu_lock_active() {
        return Err(BadContextError::BadContext);
    }

    let guard = kernel.state.0.lock();
    CPU_LOCK_ACTIVE.with(|x| x.set(true));
    Ok(CpuLockGuard { guard })
}

/// RAII guard for a CPU Lock state.
///
/// [`CpuLockGuard::deref_mut`] provides the kernel state.
pub(crate) struct CpuLockGuard<'a, Traits: Port> {
    guard: spin::MutexGuard<'a, KernelState<Traits>>,
}

impl<Traits: Port> Drop for CpuLockGuard<'_, Traits> {
    #[inline]
    fn drop(&mut self) {
        CPU_LOCK_ACTIVE.with(|x| x.set(false));
    }
}

impl<Traits: Port> ops::Deref for CpuLockGuard<'_, Traits> {
    type Target = KernelState<Traits>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<Traits: Port> ops::DerefMut for CpuLockGuard<'_, Traits> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
