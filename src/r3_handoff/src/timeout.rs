//! Manages the system clock and the timeouts of bounded waits.
//!
//! The system clock advances by one tick each time the port calls
//! [`PortToKernel::timer_tick`]. The tick count is a 64-bit value and is
//! assumed never to wrap around.
//!
//! Every bounded wait registers a timeout in the timeout heap, a min-heap
//! ordered by arrival time. The wait record remembers the timeout's position
//! in the heap so that the timeout can be removed as soon as the wait is
//! completed by other means.
//!
//! [`PortToKernel::timer_tick`]: crate::PortToKernel::timer_tick
use std::sync::atomic::Ordering;

use slab::Slab;

use crate::{
    error::WaitTimeoutError,
    utils::binary_heap::{BinaryHeap, BinaryHeapCtx},
    wait, Kernel, KernelState, Port, Priority,
};

/// A duration measured in ticks.
pub type Ticks = u32;

/// A block time that represents an unbounded wait.
pub const WAIT_FOREVER: Ticks = Ticks::MAX;

/// A kernel-global state for timed event management.
pub(crate) struct TimeoutGlobals {
    /// The heap (priority queue) containing outstanding timeouts, sorted by
    /// arrival time.
    heap: Vec<TimeoutRef>,
}

/// An entry of the timeout heap.
#[derive(Debug)]
struct TimeoutRef {
    /// The tick count at which the timeout fires.
    at: u64,
    /// The key of the wait record in [`KernelState::waits`].
    wait: usize,
}

/// Keeps [`wait::WaitCb::timeout_pos`] up-to-date.
struct TimeoutHeapCtx<'a, Traits: Port> {
    waits: &'a mut Slab<wait::WaitCb<Traits>>,
}

impl<Traits: Port> BinaryHeapCtx<TimeoutRef> for TimeoutHeapCtx<'_, Traits> {
    #[inline]
    fn lt(&mut self, x: &TimeoutRef, y: &TimeoutRef) -> bool {
        x.at < y.at
    }

    #[inline]
    fn on_move(&mut self, e: &mut TimeoutRef, new_index: usize) {
        self.waits[e.wait].timeout_pos = Some(new_index);
    }
}

impl TimeoutGlobals {
    pub(crate) const fn new() -> Self {
        Self { heap: Vec::new() }
    }
}

/// Register a timeout for the wait record `wait`, which fires `after` ticks
/// from now.
pub(crate) fn insert_wait_timeout<Traits: Port>(
    kernel: &Kernel<Traits>,
    state: &mut KernelState<Traits>,
    wait: usize,
    after: Ticks,
) {
    let at = kernel.tick_count() + u64::from(after);
    state.timeout.heap.heap_push(
        TimeoutRef { at, wait },
        TimeoutHeapCtx {
            waits: &mut state.waits,
        },
    );
}

/// Unregister the timeout of the wait record `wait` if it has one.
pub(crate) fn remove_wait_timeout<Traits: Port>(state: &mut KernelState<Traits>, wait: usize) {
    if let Some(pos) = state.waits[wait].timeout_pos.take() {
        let removed = state.timeout.heap.heap_remove(
            pos,
            TimeoutHeapCtx {
                waits: &mut state.waits,
            },
        );
        debug_assert_eq!(removed.map(|r| r.wait), Some(wait));
    }
}

/// Advance the system clock by one tick and complete the waits whose timeouts
/// have arrived.
///
/// Returns the priority of the most urgent task woken up, if any.
pub(crate) fn handle_tick<Traits: Port>(
    kernel: &Kernel<Traits>,
    state: &mut KernelState<Traits>,
) -> Option<Priority> {
    // Only modified with CPU Lock active
    let now = kernel.tick_count.load(Ordering::Relaxed) + 1;
    kernel.tick_count.store(now, Ordering::Release);

    let mut woken: Option<Priority> = None;

    while state.timeout.heap.first().map_or(false, |first| first.at <= now) {
        let Some(TimeoutRef { wait, .. }) = state.timeout.heap.heap_pop(TimeoutHeapCtx {
            waits: &mut state.waits,
        }) else {
            break;
        };
        state.waits[wait].timeout_pos = None;

        // The wait is still linked to its wait queue
        let queue = state.waits[wait].queue;
        state.wait_queue_mut(queue).remove(wait);

        let priority = wait::complete_wait(kernel, state, wait, Err(WaitTimeoutError::Timeout));
        woken = woken.max(Some(priority));
    }

    woken
}
