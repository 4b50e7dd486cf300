//! A binary semaphore and a deferred software timer service for handing off
//! events from interrupt contexts to tasks.
//!
//! The kernel is port-agnostic. The task scheduler (task creation,
//! suspension, the tick interrupt) is supplied by a [`Port`]
//! implementation such as `r3_handoff_port_std`.
//!
//! # Contexts
//!
//! Code runs in one of three contexts:
//!
//!  - **Boot context**: before [`Kernel::start_scheduler`] hands control to
//!    the scheduler.
//!  - **Task context**: the body of a task. Only a task context is
//!    *waitable*, i.e., may block.
//!  - **Interrupt context**: an interrupt handler, including
//!    [`PortToKernel::timer_tick`]. Operations that may block return
//!    `BadContext` here; use the `_from_isr` variants instead.
//!
//! Timer callbacks run in the timer service task (a task context), never in
//! an interrupt context.
//!
//! # CPU Lock
//!
//! All kernel state is protected by a single lock, *CPU Lock*, held only for
//! short, bounded critical sections. It is never held while running
//! application code (task bodies, timer callbacks, deferred function calls).
//!
//! # Example
//!
//! ```ignore
//! let kernel = Kernel::new(port, KernelCfg::new())?;
//! let sem = Semaphore::new(kernel)?;
//! let timer = Timer::build()
//!     .name("Timer")
//!     .period(kernel.ms_to_ticks(1000))
//!     .mode(TimerMode::AutoReload)
//!     .callback(move |_| {
//!         let woken = sem.signal_from_isr().unwrap();
//!         kernel.port().yield_request(woken);
//!     })
//!     .finish(kernel)?;
//! timer.start(0)?;
//! kernel.start_scheduler()?;
//! ```
#![deny(unsafe_code)]
use std::{
    fmt,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use slab::Slab;

#[macro_use]
mod error;
mod cfg;
mod klock;
mod port;
mod semaphore;
mod state;
mod task;
mod timeout;
mod timer;
mod timer_service;
mod utils;
mod wait;
mod worker;

pub use self::{
    cfg::KernelCfg,
    error::*,
    klock::is_cpu_lock_active,
    port::{Port, PortToKernel, Priority, TaskAttr, TaskEntry, IDLE_PRIORITY},
    semaphore::Semaphore,
    task::{Task, TaskBuilder},
    timeout::{Ticks, WAIT_FOREVER},
    timer::{Timer, TimerBuilder, TimerHandler, TimerMode, TimerState},
    timer_service::TIMER_SERVICE_TASK_NAME,
    worker::{Worker, WorkerBuilder, WorkerStats},
};

/// A kernel instance.
///
/// Created by [`Kernel::new`] and never destroyed. All kernel objects refer
/// to it by a `&'static` reference.
pub struct Kernel<Traits: Port> {
    port: Traits,
    cfg: KernelCfg,

    /// The number of ticks elapsed since boot. Only modified with CPU Lock
    /// active.
    tick_count: AtomicU64,

    scheduler_started: AtomicBool,

    state: klock::CpuLock<Traits>,
}

/// The kernel state protected by CPU Lock.
pub(crate) struct KernelState<Traits: Port> {
    pub(crate) timeout: timeout::TimeoutGlobals,
    pub(crate) waits: Slab<wait::WaitCb<Traits>>,
    pub(crate) sleep_wait_queue: wait::WaitQueue,
    pub(crate) semaphores: Vec<semaphore::SemaphoreCb>,
    pub(crate) timer_service: timer_service::TimerServiceCb<Traits>,
}

impl<Traits: Port> KernelState<Traits> {
    fn new(cfg: &KernelCfg) -> Self {
        Self {
            timeout: timeout::TimeoutGlobals::new(),
            waits: Slab::new(),
            sleep_wait_queue: wait::WaitQueue::new(),
            semaphores: Vec::new(),
            timer_service: timer_service::TimerServiceCb::new(cfg.get_timer_queue_length()),
        }
    }

    /// Get the wait queue identified by `id`.
    pub(crate) fn wait_queue_mut(&mut self, id: wait::WaitQueueId) -> &mut wait::WaitQueue {
        match id {
            wait::WaitQueueId::Sleep => &mut self.sleep_wait_queue,
            wait::WaitQueueId::Semaphore(i) => &mut self.semaphores[i].wait_queue,
            wait::WaitQueueId::TimerCommandSend => &mut self.timer_service.send_wait_queue,
            wait::WaitQueueId::TimerCommandRecv => &mut self.timer_service.recv_wait_queue,
        }
    }
}

impl<Traits: Port> Kernel<Traits> {
    /// Construct a kernel instance. The instance lives for the rest of the
    /// program.
    pub fn new(port: Traits, cfg: KernelCfg) -> Result<&'static Self, CfgError> {
        cfg.validate()?;

        log::debug!("creating a kernel instance with {cfg:?}");

        Ok(Box::leak(Box::new(Self {
            port,
            cfg,
            tick_count: AtomicU64::new(0),
            scheduler_started: AtomicBool::new(false),
            state: klock::CpuLock::new(KernelState::new(&cfg)),
        })))
    }

    /// Get the port.
    #[inline]
    pub fn port(&self) -> &Traits {
        &self.port
    }

    /// Get the configuration.
    #[inline]
    pub fn cfg(&self) -> &KernelCfg {
        &self.cfg
    }

    /// Get the number of ticks elapsed since boot.
    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::Acquire)
    }

    /// Convert a duration in milliseconds to ticks, rounding down.
    #[inline]
    pub fn ms_to_ticks(&self, ms: u32) -> Ticks {
        self.cfg.ms_to_ticks(ms)
    }

    /// Return `true` iff [`Self::start_scheduler`] has been called.
    #[inline]
    pub fn is_scheduler_started(&self) -> bool {
        self.scheduler_started.load(Ordering::Acquire)
    }

    /// Create the timer service task and transfer control to the scheduler.
    ///
    /// Whether this method returns depends on the port. A port for real
    /// hardware never returns. `r3_handoff_port_std` returns when the
    /// simulation is shut down.
    pub fn start_scheduler(&'static self) -> Result<(), StartSchedulerError> {
        if self.scheduler_started.swap(true, Ordering::AcqRel) {
            return Err(StartSchedulerError::BadContext);
        }

        timer_service::start_service_task(self)?;

        log::debug!("starting the scheduler");
        self.port.start_scheduler(self);
        Ok(())
    }

    /// Block the current task for `ticks` ticks.
    pub fn sleep(&'static self, ticks: Ticks) -> Result<(), SleepError> {
        let lock = klock::lock_cpu(self)?;
        state::expect_waitable_context(self)?;

        if ticks == 0 {
            drop(lock);
            self.port.yield_request(true);
            return Ok(());
        }

        // Nobody signals `Sleep`, so this always ends with `Timeout`
        match wait::wait_timeout(
            self,
            lock,
            wait::WaitQueueId::Sleep,
            wait::WaitPayload::None,
            ticks,
        ) {
            Ok(()) | Err(WaitTimeoutError::Timeout) => Ok(()),
            Err(WaitTimeoutError::BadContext) => Err(SleepError::BadContext),
        }
    }

    /// Defer the execution of `f` to the timer service task, blocking for up
    /// to `block_time` ticks if the command queue is full.
    pub fn pend_function_call(
        &'static self,
        f: impl FnOnce() + Send + 'static,
        block_time: Ticks,
    ) -> Result<(), TimerCommandError> {
        let f = Box::new(f);
        timer_service::send_command(self, block_time, |_| {
            timer_service::TimerCommand::PendFunction(f)
        })?;
        Ok(())
    }

    /// Defer the execution of `f` to the timer service task. Never blocks.
    ///
    /// Returns `true` if the submission woke up a task more urgent than the
    /// current one, i.e., [`Port::yield_request`] should be called.
    pub fn pend_function_call_from_isr(
        &'static self,
        f: impl FnOnce() + Send + 'static,
    ) -> Result<bool, TimerCommandError> {
        let f = Box::new(f);
        Ok(timer_service::send_command_from_isr(self, |_| {
            timer_service::TimerCommand::PendFunction(f)
        })?)
    }

    /// Return `true` iff waking up a task of the priority `woken` should
    /// preempt the current context.
    pub(crate) fn preempts_current(&self, woken: Priority) -> bool {
        match self.port.current_priority() {
            Some(current) => woken > current,
            None => true,
        }
    }
}

impl<Traits: Port> PortToKernel for Kernel<Traits> {
    fn timer_tick(&self) {
        let woken = match klock::lock_cpu(self) {
            Ok(mut lock) => timeout::handle_tick(self, &mut lock),
            Err(e) => {
                log::error!("timer_tick: {e:?}");
                return;
            }
        };

        if let Some(priority) = woken {
            self.port.yield_request(self.preempts_current(priority));
        }
    }

    fn tick_rate_hz(&self) -> u32 {
        self.cfg.get_tick_rate_hz()
    }
}

impl<Traits: Port> fmt::Debug for Kernel<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("cfg", &self.cfg)
            .field("tick_count", &self.tick_count())
            .field("scheduler_started", &self.is_scheduler_started())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test_port;
