//! A port for unit tests. It never runs tasks; the test thread plays the
//! boot context, or an interrupt context inside [`TestPort::enter_interrupt`].
use std::{
    cell::Cell,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::CreateTaskError,
    port::{Port, PortToKernel, Priority, TaskAttr, TaskEntry},
};

thread_local! {
    static IN_INTERRUPT: Cell<bool> = Cell::new(false);
}

#[derive(Debug, Default)]
pub(crate) struct TestPort {
    /// The number of tasks created so far.
    pub(crate) num_tasks: AtomicUsize,
}

impl TestPort {
    /// Run `f` in a simulated interrupt context.
    pub(crate) fn enter_interrupt<R>(&self, f: impl FnOnce() -> R) -> R {
        IN_INTERRUPT.with(|x| x.set(true));
        let result = f();
        IN_INTERRUPT.with(|x| x.set(false));
        result
    }
}

impl Port for TestPort {
    type TaskHandle = (&'static str, Priority);

    fn create_task(
        &self,
        attr: TaskAttr,
        _entry: TaskEntry,
    ) -> Result<Self::TaskHandle, CreateTaskError> {
        self.num_tasks.fetch_add(1, Ordering::Relaxed);
        Ok((attr.name, attr.priority))
    }

    fn start_scheduler(&'static self, _kernel: &'static dyn PortToKernel) {}

    fn yield_request(&self, _flag: bool) {}

    fn current_task(&self) -> Option<Self::TaskHandle> {
        None
    }

    fn task_priority(&self, task: &Self::TaskHandle) -> Priority {
        task.1
    }

    fn task_name(&self, task: &Self::TaskHandle) -> &'static str {
        task.0
    }

    fn is_task_context(&self) -> bool {
        false
    }

    fn is_interrupt_context(&self) -> bool {
        IN_INTERRUPT.with(Cell::get)
    }

    fn park(&self) {
        unreachable!("no task runs on the test port");
    }

    fn unpark(&self, _task: &Self::TaskHandle) {}
}
