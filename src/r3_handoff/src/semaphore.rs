//! Binary semaphores
use std::fmt;

use crate::{
    error::{
        CreateSemaphoreError, GetSemaphoreError, PollSemaphoreError, SignalSemaphoreError,
        WaitSemaphoreError, WaitSemaphoreTimeoutError,
    },
    klock, state,
    timeout::{Ticks, WAIT_FOREVER},
    wait::{self, WaitPayload, WaitQueue, WaitQueueId},
    Kernel, KernelState, Port, Priority,
};

/// *Semaphore control block* - the state data of a semaphore.
#[derive(Debug)]
pub(crate) struct SemaphoreCb {
    /// `true` iff the semaphore holds a unit. Always `false` while
    /// `wait_queue` is non-empty.
    available: bool,

    pub(crate) wait_queue: WaitQueue,
}

/// A binary semaphore, holding zero or one unit.
///
/// Signaling a semaphore that already holds a unit has no effect. A unit is
/// never deposited while a task is waiting; it's handed over to the task that
/// started waiting first.
pub struct Semaphore<Traits: Port> {
    kernel: &'static Kernel<Traits>,
    index: usize,
}

impl<Traits: Port> Clone for Semaphore<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits: Port> Copy for Semaphore<Traits> {}

impl<Traits: Port> PartialEq for Semaphore<Traits> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.kernel, other.kernel) && self.index == other.index
    }
}

impl<Traits: Port> Eq for Semaphore<Traits> {}

impl<Traits: Port> fmt::Debug for Semaphore<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Semaphore").field(&self.index).finish()
    }
}

impl<Traits: Port> Semaphore<Traits> {
    /// Create an empty semaphore.
    pub fn new(kernel: &'static Kernel<Traits>) -> Result<Self, CreateSemaphoreError> {
        Self::with_initial_state(kernel, false)
    }

    /// Create a semaphore holding a unit.
    pub fn new_available(kernel: &'static Kernel<Traits>) -> Result<Self, CreateSemaphoreError> {
        Self::with_initial_state(kernel, true)
    }

    fn with_initial_state(
        kernel: &'static Kernel<Traits>,
        available: bool,
    ) -> Result<Self, CreateSemaphoreError> {
        let mut lock = klock::lock_cpu(kernel)?;
        lock.semaphores
            .try_reserve(1)
            .map_err(|_| CreateSemaphoreError::NoMemory)?;

        let index = lock.semaphores.len();
        lock.semaphores.push(SemaphoreCb {
            available,
            wait_queue: WaitQueue::new(),
        });

        log::debug!("created semaphore {index} (available = {available})");
        Ok(Self { kernel, index })
    }

    /// Get the kernel instance this semaphore belongs to.
    #[inline]
    pub fn kernel(self) -> &'static Kernel<Traits> {
        self.kernel
    }

    /// Signal the semaphore.
    ///
    /// If a task is waiting, the unit is handed over to it, and the current
    /// task yields if the woken task is more urgent. Not allowed in an
    /// interrupt context; use [`Self::signal_from_isr`] there.
    pub fn signal(self) -> Result<(), SignalSemaphoreError> {
        let mut lock = klock::lock_cpu(self.kernel)?;
        state::expect_non_interrupt_context(self.kernel)?;

        let woken = signal_core(self.kernel, &mut lock, self.index);
        drop(lock);

        if let Some(priority) = woken {
            if self.kernel.port().is_task_context() && self.kernel.preempts_current(priority) {
                self.kernel.port().yield_request(true);
            }
        }

        Ok(())
    }

    /// Signal the semaphore. Allowed in any context and never blocks.
    ///
    /// Returns `true` if a task more urgent than the current one was woken
    /// up. The caller should pass the flag to [`Port::yield_request`].
    pub fn signal_from_isr(self) -> Result<bool, SignalSemaphoreError> {
        let mut lock = klock::lock_cpu(self.kernel)?;
        let woken = signal_core(self.kernel, &mut lock, self.index);
        drop(lock);

        Ok(woken.map_or(false, |priority| self.kernel.preempts_current(priority)))
    }

    /// Wait until the semaphore holds a unit and take it.
    pub fn wait_one(self) -> Result<(), WaitSemaphoreError> {
        let mut lock = klock::lock_cpu(self.kernel)?;
        state::expect_waitable_context(self.kernel)?;

        if poll_core(&mut lock.semaphores[self.index]) {
            return Ok(());
        }

        // The wake-upper hands the unit over to us
        wait::wait(
            self.kernel,
            lock,
            WaitQueueId::Semaphore(self.index),
            WaitPayload::None,
        )?;
        Ok(())
    }

    /// Wait until the semaphore holds a unit and take it, giving up after
    /// `ticks` ticks.
    ///
    /// `0` makes this equivalent to [`Self::poll_one`]. [`WAIT_FOREVER`]
    /// makes this equivalent to [`Self::wait_one`].
    pub fn wait_one_timeout(self, ticks: Ticks) -> Result<(), WaitSemaphoreTimeoutError> {
        if ticks == WAIT_FOREVER {
            return match self.wait_one() {
                Ok(()) => Ok(()),
                Err(WaitSemaphoreError::BadContext) => Err(WaitSemaphoreTimeoutError::BadContext),
            };
        }

        let mut lock = klock::lock_cpu(self.kernel)?;
        state::expect_waitable_context(self.kernel)?;

        if poll_core(&mut lock.semaphores[self.index]) {
            return Ok(());
        }

        if ticks == 0 {
            return Err(WaitSemaphoreTimeoutError::Timeout);
        }

        wait::wait_timeout(
            self.kernel,
            lock,
            WaitQueueId::Semaphore(self.index),
            WaitPayload::None,
            ticks,
        )?;
        Ok(())
    }

    /// Take the unit if the semaphore holds one. Returns `Timeout` otherwise.
    /// Never blocks.
    pub fn poll_one(self) -> Result<(), PollSemaphoreError> {
        let mut lock = klock::lock_cpu(self.kernel)?;
        if poll_core(&mut lock.semaphores[self.index]) {
            Ok(())
        } else {
            Err(PollSemaphoreError::Timeout)
        }
    }

    /// Return `true` iff the semaphore holds a unit.
    pub fn is_available(self) -> Result<bool, GetSemaphoreError> {
        let lock = klock::lock_cpu(self.kernel)?;
        Ok(lock.semaphores[self.index].available)
    }

    /// Discard the unit if the semaphore holds one.
    pub fn drain(self) -> Result<(), GetSemaphoreError> {
        let mut lock = klock::lock_cpu(self.kernel)?;
        lock.semaphores[self.index].available = false;
        Ok(())
    }
}

/// Take the unit if `semaphore_cb` holds one.
#[inline]
fn poll_core(semaphore_cb: &mut SemaphoreCb) -> bool {
    std::mem::replace(&mut semaphore_cb.available, false)
}

/// Hand a unit over to the first waiting task, or deposit it if there's none.
///
/// Returns the priority of the woken task.
fn signal_core<Traits: Port>(
    kernel: &Kernel<Traits>,
    state: &mut KernelState<Traits>,
    index: usize,
) -> Option<Priority> {
    let woken = wait::wake_up_one(kernel, state, WaitQueueId::Semaphore(index));

    if woken.is_none() {
        // Absorbed if already available
        state.semaphores[index].available = true;
    } else {
        debug_assert!(!state.semaphores[index].available);
    }

    log::trace!("signaled semaphore {index} (woken = {woken:?})");
    woken
}
