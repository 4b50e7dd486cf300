//! Tasks
use std::{fmt, marker::PhantomData};

use crate::{
    error::CreateTaskError,
    port::{Port, Priority, TaskAttr, TaskEntry, IDLE_PRIORITY},
    Kernel,
};

/// Represents a single task in a system.
///
/// Tasks are scheduled by the port. This type only names a task and exposes
/// its static properties.
pub struct Task<Traits: Port> {
    kernel: &'static Kernel<Traits>,
    handle: Traits::TaskHandle,
}

impl<Traits: Port> Clone for Task<Traits> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel,
            handle: self.handle.clone(),
        }
    }
}

impl<Traits: Port> fmt::Debug for Task<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Task").field(&self.handle).finish()
    }
}

impl<Traits: Port> Task<Traits> {
    /// Construct a `TaskBuilder` to create a task.
    pub const fn build() -> TaskBuilder<Traits> {
        TaskBuilder::new()
    }

    /// Get the currently running task. Returns `None` outside a task context.
    pub fn current(kernel: &'static Kernel<Traits>) -> Option<Self> {
        let handle = kernel.port().current_task()?;
        Some(Self { kernel, handle })
    }

    pub(crate) fn from_handle(kernel: &'static Kernel<Traits>, handle: Traits::TaskHandle) -> Self {
        Self { kernel, handle }
    }

    /// Get the port's handle of the task.
    #[inline]
    pub fn handle(&self) -> &Traits::TaskHandle {
        &self.handle
    }

    pub fn name(&self) -> &'static str {
        self.kernel.port().task_name(&self.handle)
    }

    pub fn priority(&self) -> Priority {
        self.kernel.port().task_priority(&self.handle)
    }
}

/// Builder type for [`Task`].
#[must_use = "must call `finish()` to create a task"]
pub struct TaskBuilder<Traits> {
    _phantom: PhantomData<fn() -> Traits>,
    name: &'static str,
    start: Option<TaskEntry>,
    stack_size: Option<usize>,
    priority: Priority,
}

impl<Traits: Port> TaskBuilder<Traits> {
    const fn new() -> Self {
        Self {
            _phantom: PhantomData,
            name: "",
            start: None,
            stack_size: None,
            priority: IDLE_PRIORITY,
        }
    }

    /// Specify the task's name. Used for diagnostics only.
    pub fn name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// [**Required**] Specify the task's entry point.
    pub fn start(self, start: impl FnOnce() + Send + 'static) -> Self {
        Self {
            start: Some(Box::new(start)),
            ..self
        }
    }

    /// Specify the task's stack size. Defaults to
    /// [`KernelCfg::get_min_stack_size`].
    ///
    /// [`KernelCfg::get_min_stack_size`]: crate::KernelCfg::get_min_stack_size
    pub fn stack_size(self, stack_size: usize) -> Self {
        Self {
            stack_size: Some(stack_size),
            ..self
        }
    }

    /// Specify the task's priority. A larger value is more urgent. The value
    /// must be in range `0..`[`num_priority_levels`]. Defaults to
    /// [`IDLE_PRIORITY`].
    ///
    /// [`num_priority_levels`]: crate::KernelCfg::num_priority_levels
    pub fn priority(self, priority: Priority) -> Self {
        Self { priority, ..self }
    }

    /// Complete the definition of a task and create it.
    pub fn finish(self, kernel: &'static Kernel<Traits>) -> Result<Task<Traits>, CreateTaskError> {
        let cfg = kernel.cfg();
        let stack_size = self.stack_size.unwrap_or(cfg.get_min_stack_size());

        if usize::from(self.priority) >= cfg.get_num_priority_levels()
            || stack_size < cfg.get_min_stack_size()
        {
            return Err(CreateTaskError::BadParam);
        }

        let start = self.start.ok_or(CreateTaskError::BadParam)?;

        let attr = TaskAttr {
            name: self.name,
            stack_size,
            priority: self.priority,
        };
        log::debug!("creating a task with {attr:?}");

        let handle = kernel.port().create_task(attr, start)?;
        Ok(Task::from_handle(kernel, handle))
    }
}
