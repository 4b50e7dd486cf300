//! The worker task: a loop consuming semaphore signals
use std::{
    fmt,
    marker::PhantomData,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    error::{CreateTaskError, WaitSemaphoreTimeoutError},
    port::{Port, Priority, IDLE_PRIORITY},
    semaphore::Semaphore,
    task::Task,
    timeout::Ticks,
    Kernel,
};

/// A snapshot of a worker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStats {
    /// The number of loop iterations, whether or not the wait succeeded.
    pub iterations: u64,
    /// The number of units taken from the semaphore.
    pub acquisitions: u64,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    iterations: AtomicU64,
    acquisitions: AtomicU64,
}

/// A task that repeatedly waits on a semaphore with a bounded timeout and
/// counts what it gets.
///
/// A timeout is not an error; the loop simply goes on. The task never
/// exits.
pub struct Worker<Traits: Port> {
    task: Task<Traits>,
    counters: Arc<WorkerCounters>,
}

impl<Traits: Port> fmt::Debug for Worker<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Worker")
            .field("task", &self.task)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<Traits: Port> Clone for Worker<Traits> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<Traits: Port> Worker<Traits> {
    /// Construct a `WorkerBuilder` to create a worker.
    pub fn build() -> WorkerBuilder<Traits> {
        WorkerBuilder::new()
    }

    /// Get the worker's task.
    pub fn task(&self) -> &Task<Traits> {
        &self.task
    }

    /// Get a snapshot of the counters. The two counters are read separately
    /// and may be one iteration apart.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            iterations: self.counters.iterations.load(Ordering::Relaxed),
            acquisitions: self.counters.acquisitions.load(Ordering::Relaxed),
        }
    }
}

/// Builder type for [`Worker`].
#[must_use = "must call `finish()` to create a worker"]
pub struct WorkerBuilder<Traits: Port> {
    _phantom: PhantomData<fn() -> Traits>,
    semaphore: Option<Semaphore<Traits>>,
    poll_timeout: Ticks,
    name: &'static str,
    priority: Priority,
    stack_size: Option<usize>,
    on_acquire: Option<Box<dyn FnMut(u64) + Send>>,
}

impl<Traits: Port> WorkerBuilder<Traits> {
    pub const DEFAULT_POLL_TIMEOUT: Ticks = 10;

    fn new() -> Self {
        Self {
            _phantom: PhantomData,
            semaphore: None,
            poll_timeout: Self::DEFAULT_POLL_TIMEOUT,
            name: "Worker",
            priority: IDLE_PRIORITY,
            stack_size: None,
            on_acquire: None,
        }
    }

    /// [**Required**] Specify the semaphore to wait on.
    pub fn semaphore(self, semaphore: Semaphore<Traits>) -> Self {
        Self {
            semaphore: Some(semaphore),
            ..self
        }
    }

    /// Specify the timeout of each wait in ticks. Defaults to
    /// [`Self::DEFAULT_POLL_TIMEOUT`].
    pub fn poll_timeout(self, poll_timeout: Ticks) -> Self {
        Self {
            poll_timeout,
            ..self
        }
    }

    pub fn name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Specify the task priority. Defaults to [`IDLE_PRIORITY`].
    pub fn priority(self, priority: Priority) -> Self {
        Self { priority, ..self }
    }

    pub fn stack_size(self, stack_size: usize) -> Self {
        Self {
            stack_size: Some(stack_size),
            ..self
        }
    }

    /// Specify a function to call after each acquisition. It receives the
    /// updated acquisition count.
    pub fn on_acquire(self, f: impl FnMut(u64) + Send + 'static) -> Self {
        Self {
            on_acquire: Some(Box::new(f)),
            ..self
        }
    }

    /// Create the worker's task.
    pub fn finish(self, kernel: &'static Kernel<Traits>) -> Result<Worker<Traits>, CreateTaskError> {
        let semaphore = self.semaphore.ok_or(CreateTaskError::BadParam)?;
        let counters = Arc::new(WorkerCounters::default());

        let mut builder = Task::build().name(self.name).priority(self.priority);
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let body = WorkerBody {
            name: self.name,
            semaphore,
            poll_timeout: self.poll_timeout,
            counters: Arc::clone(&counters),
            on_acquire: self.on_acquire,
        };
        let task = builder.start(move || body.run()).finish(kernel)?;

        Ok(Worker { task, counters })
    }
}

struct WorkerBody<Traits: Port> {
    name: &'static str,
    semaphore: Semaphore<Traits>,
    poll_timeout: Ticks,
    counters: Arc<WorkerCounters>,
    on_acquire: Option<Box<dyn FnMut(u64) + Send>>,
}

impl<Traits: Port> WorkerBody<Traits> {
    fn run(mut self) {
        log::debug!("{}: polling every {} ticks", self.name, self.poll_timeout);

        loop {
            match self.semaphore.wait_one_timeout(self.poll_timeout) {
                Ok(()) => {
                    let count = self.counters.acquisitions.fetch_add(1, Ordering::Relaxed) + 1;
                    log::info!("semaphore counter = {count}");
                    if let Some(f) = &mut self.on_acquire {
                        f(count);
                    }
                }
                Err(WaitSemaphoreTimeoutError::Timeout) => {}
                Err(e) => log::error!("{}: wait failed: {e:?}", self.name),
            }

            self.counters.iterations.fetch_add(1, Ordering::Relaxed);
        }
    }
}
