//! Simulation environment for running `r3_handoff` on a hosted environment.
//!
//! Each task is backed by an OS thread. Another thread stands in for the
//! interrupt controller: it calls [`PortToKernel::timer_tick`] at the
//! configured tick rate and runs the handlers pended by
//! [`StdPort::pend_interrupt`]. Tasks are not multiplexed on a single virtual
//! CPU; task priorities only decide whether [`Port::yield_request`] is worth
//! honoring.
//!
//! [`Port::start_scheduler`] (called by `Kernel::start_scheduler`) returns
//! when [`StdPort::shutdown`] is called or a task or an interrupt handler
//! panics, in which case the panic is propagated to the caller. Task threads
//! that are still alive at that point are left behind, suspended forever
//! once they wait for anything, since the tick stops.
//!
//! # Examples
//!
//! ```no_run
//! use r3_handoff::{Kernel, KernelCfg, Task};
//! use r3_handoff_port_std::StdPort;
//!
//! let kernel = Kernel::new(StdPort::new(), KernelCfg::new()).unwrap();
//! Task::build()
//!     .name("Main")
//!     .start(move || {
//!         kernel.sleep(100).unwrap();
//!         kernel.port().shutdown();
//!     })
//!     .finish(kernel)
//!     .unwrap();
//! kernel.start_scheduler().unwrap();
//! ```
#![deny(unsafe_code)]
use once_cell::sync::OnceCell;
use r3_handoff::{CreateTaskError, Port, PortToKernel, Priority, TaskAttr, TaskEntry};
use spin::Mutex as SpinMutex;
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// The smallest stack size given to a task thread. Stack sizes requested by
/// the kernel are sized for an embedded target and are too small for a
/// hosted thread.
pub const MIN_HOST_STACK_SIZE: usize = 256 * 1024;

/// The role of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    /// Any thread not managed by the port, e.g., the main thread.
    Boot,
    /// The backing thread for an interrupt context.
    Interrupt,
    /// The backing thread for a task.
    Task,
}

thread_local! {
    /// The current thread's role. It's automatically assigned after the
    /// creation of a thread managed by the port.
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Boot);

    /// The task backed by the current thread.
    static CURRENT_TASK: RefCell<Option<TaskRef>> = RefCell::new(None);
}

/// A reference to a task created by [`StdPort`].
#[derive(Clone)]
pub struct TaskRef(Arc<TaskInner>);

struct TaskInner {
    name: &'static str,
    priority: Priority,
    stack_size: usize,
    /// The backing thread. Set by the thread itself when it starts running.
    thread: OnceCell<thread::Thread>,
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskRef")
            .field("name", &self.0.name)
            .field("priority", &self.0.priority)
            .finish()
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TaskRef {}

/// A request to the interrupt thread.
enum IrqCmd {
    /// Run the handler in an interrupt context.
    Pend(Box<dyn FnOnce() + Send>),
    Stop,
}

/// An event that ends [`Port::start_scheduler`].
enum Event {
    Shutdown,
    Panic(Box<dyn Any + Send>),
}

/// The hosted port.
pub struct StdPort {
    started: AtomicBool,
    /// Tasks created before the scheduler started.
    pending_tasks: SpinMutex<Vec<(TaskRef, TaskEntry)>>,
    irq_send: SpinMutex<Option<mpsc::Sender<IrqCmd>>>,
    event_send: SpinMutex<mpsc::Sender<Event>>,
    event_recv: SpinMutex<Option<mpsc::Receiver<Event>>>,
}

impl Default for StdPort {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StdPort")
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl StdPort {
    pub fn new() -> Self {
        let (event_send, event_recv) = mpsc::channel();
        Self {
            started: AtomicBool::new(false),
            pending_tasks: SpinMutex::new(Vec::new()),
            irq_send: SpinMutex::new(None),
            event_send: SpinMutex::new(event_send),
            event_recv: SpinMutex::new(Some(event_recv)),
        }
    }

    /// Initiate shutdown. [`Port::start_scheduler`] returns soon after this.
    ///
    /// Can be called from any thread. Has no effect if the scheduler has
    /// already stopped.
    pub fn shutdown(&self) {
        log::debug!("shutdown requested");
        let _ = self.event_send.lock().send(Event::Shutdown);
    }

    /// Run `handler` in an interrupt context.
    ///
    /// Returns `false` if the scheduler is not running.
    pub fn pend_interrupt(&self, handler: impl FnOnce() + Send + 'static) -> bool {
        match &*self.irq_send.lock() {
            Some(irq_send) => irq_send.send(IrqCmd::Pend(Box::new(handler))).is_ok(),
            None => false,
        }
    }

    /// Return `true` iff the scheduler has been started.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn spawn_task(&self, task: TaskRef, entry: TaskEntry) -> Result<(), CreateTaskError> {
        let event_send = self.event_send.lock().clone();
        let name = task.0.name;

        thread::Builder::new()
            .name(name.to_owned())
            .stack_size(task.0.stack_size.max(MIN_HOST_STACK_SIZE))
            .spawn(move || {
                THREAD_ROLE.with(|role| role.set(ThreadRole::Task));
                let _ = task.0.thread.set(thread::current());
                CURRENT_TASK.with(|current| *current.borrow_mut() = Some(task));

                log::trace!("task {name:?} started");
                if let Err(e) = catch_unwind(AssertUnwindSafe(entry)) {
                    log::error!("task {name:?} panicked");
                    let _ = event_send.send(Event::Panic(e));
                } else {
                    log::trace!("task {name:?} exited");
                }
            })
            .map(drop)
            .map_err(|e| {
                log::error!("failed to spawn a thread for task {name:?}: {e}");
                CreateTaskError::NoMemory
            })
    }

    /// Start the interrupt thread, which delivers ticks to `kernel` and runs
    /// pended handlers.
    fn spawn_interrupt_thread(
        &self,
        kernel: &'static dyn PortToKernel,
    ) -> thread::JoinHandle<()> {
        let (irq_send, irq_recv) = mpsc::channel();
        *self.irq_send.lock() = Some(irq_send);
        let event_send = self.event_send.lock().clone();

        let tick_period = Duration::from_secs(1) / kernel.tick_rate_hz().max(1);
        log::trace!("starting the interrupt thread (tick period = {tick_period:?})");

        thread::spawn(move || {
            THREAD_ROLE.with(|role| role.set(ThreadRole::Interrupt));

            let result = catch_unwind(AssertUnwindSafe(|| {
                let mut next_tick = Instant::now() + tick_period;
                loop {
                    let timeout = next_tick.saturating_duration_since(Instant::now());
                    match irq_recv.recv_timeout(timeout) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            kernel.timer_tick();
                            next_tick += tick_period;
                        }
                        Ok(IrqCmd::Pend(handler)) => handler(),
                        Ok(IrqCmd::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            }));

            if let Err(e) = result {
                log::error!("an interrupt handler panicked");
                let _ = event_send.send(Event::Panic(e));
            }
        })
    }
}

impl Port for StdPort {
    type TaskHandle = TaskRef;

    fn create_task(&self, attr: TaskAttr, entry: TaskEntry) -> Result<TaskRef, CreateTaskError> {
        let task = TaskRef(Arc::new(TaskInner {
            name: attr.name,
            priority: attr.priority,
            stack_size: attr.stack_size,
            thread: OnceCell::new(),
        }));

        // Check `started` with `pending_tasks` locked so that a task can't
        // fall between the two branches while the scheduler is starting
        let mut pending_tasks = self.pending_tasks.lock();
        if self.started.load(Ordering::Acquire) {
            drop(pending_tasks);
            self.spawn_task(task.clone(), entry)?;
        } else {
            pending_tasks.push((task.clone(), entry));
        }

        Ok(task)
    }

    fn start_scheduler(&'static self, kernel: &'static dyn PortToKernel) {
        let Some(event_recv) = self.event_recv.lock().take() else {
            log::error!("the scheduler can only be started once");
            return;
        };

        let irq_join_handle = self.spawn_interrupt_thread(kernel);

        let pending_tasks = {
            let mut pending_tasks = self.pending_tasks.lock();
            self.started.store(true, Ordering::Release);
            std::mem::take(&mut *pending_tasks)
        };
        log::trace!("starting {} task(s)", pending_tasks.len());

        let mut outcome = None;
        for (task, entry) in pending_tasks {
            if let Err(e) = self.spawn_task(task, entry) {
                outcome = Some(Event::Panic(Box::new(format!(
                    "couldn't start a task: {e:?}"
                ))));
                break;
            }
        }

        // Wait until the shutdown or a panic
        let outcome = outcome.unwrap_or_else(|| event_recv.recv().unwrap_or(Event::Shutdown));

        // Stop the interrupt thread
        log::trace!("stopping the interrupt thread");
        if let Some(irq_send) = self.irq_send.lock().take() {
            let _ = irq_send.send(IrqCmd::Stop);
        }
        if irq_join_handle.join().is_err() {
            log::error!("the interrupt thread terminated abnormally");
        }
        log::trace!("stopped the interrupt thread");

        // Propagate any panic that occurred in a task or an interrupt handler
        if let Event::Panic(e) = outcome {
            resume_unwind(e);
        }
    }

    fn yield_request(&self, flag: bool) {
        if flag && THREAD_ROLE.with(Cell::get) == ThreadRole::Task {
            thread::yield_now();
        }
    }

    fn current_task(&self) -> Option<TaskRef> {
        CURRENT_TASK.with(|current| current.borrow().clone())
    }

    fn task_priority(&self, task: &TaskRef) -> Priority {
        task.0.priority
    }

    fn task_name(&self, task: &TaskRef) -> &'static str {
        task.0.name
    }

    fn is_task_context(&self) -> bool {
        THREAD_ROLE.with(Cell::get) == ThreadRole::Task
    }

    fn is_interrupt_context(&self) -> bool {
        THREAD_ROLE.with(Cell::get) == ThreadRole::Interrupt
    }

    fn park(&self) {
        debug_assert!(self.is_task_context());
        thread::park();
    }

    fn unpark(&self, task: &TaskRef) {
        if let Some(thread) = task.0.thread.get() {
            thread.unpark();
        } else {
            // Not running yet, so it can't be waiting
            log::trace!("unpark: task {:?} has no thread", task.0.name);
        }
    }
}

/// Install `env_logger`, defaulting the filter to `default_filter` when
/// `RUST_LOG` is not set. Does nothing if a logger is already installed.
pub fn init_logger(default_filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .is_test(cfg!(test))
        .try_init();
}
