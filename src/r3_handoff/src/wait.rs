//! Wait queues
//!
//! A task that can't complete an operation right away creates a *wait
//! record* ([`WaitCb`]) and links it to the wait queue of the object it's
//! waiting on. Wait queues are FIFO: a wake-upper always picks the task that
//! started waiting first.
//!
//! The wake-upper is responsible for completing the effect of the operation
//! on behalf of the waiting task (e.g., handing over a semaphore unit or
//! moving a queued command) before calling [`complete_wait`]. Since all of
//! this happens with CPU Lock active, and the waiting task only checks the
//! outcome with CPU Lock active, a wake-up can't slip in between the check
//! and the suspension.
use std::collections::VecDeque;

use crate::{
    error::{WaitError, WaitTimeoutError},
    klock::{self, CpuLockGuard},
    state, timeout,
    timeout::Ticks,
    timer_service::TimerCommand,
    Kernel, KernelState, Port, Priority,
};

/// Identifies a wait queue in [`KernelState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitQueueId {
    /// Tasks in [`Kernel::sleep`]. Never woken up except by timeouts.
    Sleep,
    /// Tasks waiting for the semaphore with the given index.
    Semaphore(usize),
    /// Tasks waiting for a free slot in the timer command queue.
    TimerCommandSend,
    /// The timer service task waiting for a command.
    TimerCommandRecv,
}

/// The object-specific data attached to a wait record.
pub(crate) enum WaitPayload {
    None,
    /// A command waiting to be enqueued. Taken by the wake-upper.
    TimerCommand(Option<TimerCommand>),
}

/// *Wait control block* - the state data of a waiting task.
pub(crate) struct WaitCb<Traits: Port> {
    task: Traits::TaskHandle,
    priority: Priority,

    /// The wait queue this record is linked to.
    pub(crate) queue: WaitQueueId,

    pub(crate) payload: WaitPayload,

    /// The outcome of the wait operation. `Some(_)` iff the wait is complete
    /// and unlinked from `queue`.
    result: Option<Result<(), WaitTimeoutError>>,

    /// The position of the timeout in the timeout heap.
    pub(crate) timeout_pos: Option<usize>,
}

/// A FIFO queue of wait records, identified by their keys in
/// [`KernelState::waits`].
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    waits: VecDeque<usize>,
}

impl WaitQueue {
    pub(crate) const fn new() -> Self {
        Self {
            waits: VecDeque::new(),
        }
    }

    /// Unlink the wait record that was linked first.
    #[inline]
    pub(crate) fn pop_front(&mut self) -> Option<usize> {
        self.waits.pop_front()
    }

    fn push_back(&mut self, wait: usize) {
        self.waits.push_back(wait);
    }

    /// Unlink the specified wait record.
    pub(crate) fn remove(&mut self, wait: usize) {
        if let Some(i) = self.waits.iter().position(|&w| w == wait) {
            self.waits.remove(i);
        } else {
            debug_assert!(false, "wait record {wait} is not in the queue");
        }
    }
}

/// Block the current task on the wait queue `queue` until it's woken up by
/// [`complete_wait`].
pub(crate) fn wait<'a, Traits: Port>(
    kernel: &'a Kernel<Traits>,
    lock: CpuLockGuard<'a, Traits>,
    queue: WaitQueueId,
    payload: WaitPayload,
) -> Result<(), WaitError> {
    match wait_inner(kernel, lock, queue, payload, None) {
        Ok(()) => Ok(()),
        Err(WaitTimeoutError::BadContext) => Err(WaitError::BadContext),
        Err(WaitTimeoutError::Timeout) => unreachable!("unbounded wait timed out"),
    }
}

/// Block the current task on the wait queue `queue` until it's woken up by
/// [`complete_wait`] or `ticks` ticks elapse.
pub(crate) fn wait_timeout<'a, Traits: Port>(
    kernel: &'a Kernel<Traits>,
    lock: CpuLockGuard<'a, Traits>,
    queue: WaitQueueId,
    payload: WaitPayload,
    ticks: Ticks,
) -> Result<(), WaitTimeoutError> {
    wait_inner(kernel, lock, queue, payload, Some(ticks))
}

fn wait_inner<'a, Traits: Port>(
    kernel: &'a Kernel<Traits>,
    mut lock: CpuLockGuard<'a, Traits>,
    queue: WaitQueueId,
    payload: WaitPayload,
    ticks: Option<Ticks>,
) -> Result<(), WaitTimeoutError> {
    state::expect_waitable_context(kernel)?;
    let task = kernel
        .port()
        .current_task()
        .ok_or(WaitTimeoutError::BadContext)?;
    let priority = kernel.port().task_priority(&task);

    let state = &mut *lock;
    let key = state.waits.insert(WaitCb {
        task,
        priority,
        queue,
        payload,
        result: None,
        timeout_pos: None,
    });
    state.wait_queue_mut(queue).push_back(key);

    if let Some(ticks) = ticks {
        timeout::insert_wait_timeout(kernel, state, key, ticks);
    }

    log::trace!("wait {key} on {queue:?} (timeout = {ticks:?})");

    loop {
        if let Some(result) = lock.waits[key].result {
            lock.waits.remove(key);
            log::trace!("wait {key} on {queue:?} completed with {result:?}");
            return result;
        }

        drop(lock);
        kernel.port().park();
        lock = klock::lock_cpu(kernel)?;
    }
}

/// Complete the wait operation represented by the wait record `wait`, which
/// must already be unlinked from its wait queue, and resume the waiting task.
///
/// Returns the priority of the resumed task.
pub(crate) fn complete_wait<Traits: Port>(
    kernel: &Kernel<Traits>,
    state: &mut KernelState<Traits>,
    wait: usize,
    result: Result<(), WaitTimeoutError>,
) -> Priority {
    timeout::remove_wait_timeout(state, wait);

    let wait_cb = &mut state.waits[wait];
    debug_assert!(wait_cb.result.is_none());
    wait_cb.result = Some(result);
    kernel.port().unpark(&wait_cb.task);
    wait_cb.priority
}

/// Wake up the task that started waiting on `queue` first.
///
/// Returns the priority of the resumed task.
pub(crate) fn wake_up_one<Traits: Port>(
    kernel: &Kernel<Traits>,
    state: &mut KernelState<Traits>,
    queue: WaitQueueId,
) -> Option<Priority> {
    let wait = state.wait_queue_mut(queue).pop_front()?;
    Some(complete_wait(kernel, state, wait, Ok(())))
}
