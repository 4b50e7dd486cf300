//! The interface between the kernel and a port (the task scheduler)
use std::fmt;

use crate::error::CreateTaskError;

/// Task priority. A larger value is more urgent.
pub type Priority = u8;

/// The priority of the least urgent task.
pub const IDLE_PRIORITY: Priority = 0;

/// The entry point of a task.
pub type TaskEntry = Box<dyn FnOnce() + Send + 'static>;

/// The static properties of a task, passed to [`Port::create_task`].
#[derive(Debug, Clone)]
pub struct TaskAttr {
    /// The name of the task. Used for diagnostics only.
    pub name: &'static str,
    /// The stack size in bytes.
    pub stack_size: usize,
    /// The priority of the task.
    pub priority: Priority,
}

/// Implemented by a port. Provides the scheduler facilities consumed by the
/// kernel.
///
/// All methods may be called with CPU Lock active.
pub trait Port: Send + Sync + Sized + 'static {
    /// A reference to a task.
    type TaskHandle: Clone + Send + Sync + fmt::Debug + 'static;

    /// Create a task. The task starts running when [`Port::start_scheduler`]
    /// has been called (immediately if it already has).
    fn create_task(
        &self,
        attr: TaskAttr,
        entry: TaskEntry,
    ) -> Result<Self::TaskHandle, CreateTaskError>;

    /// Transfer control to the scheduler.
    ///
    /// The port must call [`PortToKernel::timer_tick`] at the rate given by
    /// [`PortToKernel::tick_rate_hz`] from an interrupt context.
    ///
    /// A port for real hardware does not return from this method. A hosted
    /// port may return when the simulation is shut down.
    fn start_scheduler(&'static self, kernel: &'static dyn PortToKernel);

    /// Request a reschedule if `flag` is `true`.
    fn yield_request(&self, flag: bool);

    /// Get the currently running task. Returns `None` in an interrupt context
    /// or before the scheduler starts.
    fn current_task(&self) -> Option<Self::TaskHandle>;

    /// Get the priority of `task`.
    fn task_priority(&self, task: &Self::TaskHandle) -> Priority;

    /// Get the name of `task`.
    fn task_name(&self, task: &Self::TaskHandle) -> &'static str;

    /// Get the priority of the current task, or `None` if the current context
    /// is not a task context.
    fn current_priority(&self) -> Option<Priority> {
        self.current_task().map(|task| self.task_priority(&task))
    }

    /// Return `true` iff the current context is a task context.
    fn is_task_context(&self) -> bool;

    /// Return `true` iff the current context is an interrupt context.
    fn is_interrupt_context(&self) -> bool;

    /// Suspend the current task until [`Port::unpark`] is called for it.
    ///
    /// A call to `unpark` that happens before `park` makes the next `park`
    /// return immediately. `park` may also return spuriously.
    fn park(&self);

    /// Resume `task` suspended by [`Port::park`].
    fn unpark(&self, task: &Self::TaskHandle);
}

/// Methods intended to be called by a port.
pub trait PortToKernel: Send + Sync {
    /// Advance the system clock by one tick. Must be called from an interrupt
    /// context.
    fn timer_tick(&self);

    /// The number of ticks per second.
    fn tick_rate_hz(&self) -> u32;
}
