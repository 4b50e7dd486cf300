//! The timer service task and its command queue
//!
//! Timer operations issued by applications are not carried out on the spot.
//! They are encoded as [`TimerCommand`]s and sent to the *timer service
//! task*, which owns the set of armed timers. The service task repeats the
//! following steps:
//!
//!  1. Take a snapshot `now` of the tick count and fire every armed timer
//!     whose expiry tick is `<= now`, in expiry order. An auto-reload timer is
//!     re-armed for `now + period` before its callback is called, so a timer
//!     fires at most once in a pass no matter how late the pass is. Missed
//!     periods are skipped.
//!  2. Process all queued commands.
//!  3. Sleep until a command arrives or the earliest expiry tick is reached.
//!
//! Callbacks and deferred function calls run in the service task with CPU
//! Lock inactive. Interrupt handlers only ever enqueue commands.
use std::{collections::VecDeque, fmt, sync::Arc};

use crate::{
    error::{
        BadContextError, NoMemoryError, SendCommandError, StartSchedulerError, WaitError,
        WaitTimeoutError,
    },
    klock, state,
    task::Task,
    timeout::{Ticks, WAIT_FOREVER},
    timer::{Timer, TimerCb, TimerMode},
    utils::binary_heap::{BinaryHeap, BinaryHeapCtx},
    wait::{self, WaitPayload, WaitQueue, WaitQueueId},
    Kernel, KernelState, Port, Priority,
};

/// The name of the timer service task.
pub const TIMER_SERVICE_TASK_NAME: &str = "Tmr Svc";

/// A request to the timer service task.
pub(crate) enum TimerCommand {
    /// Arm the timer for `issued_at + period`.
    Start { timer: usize, issued_at: u64 },
    /// Same as `Start`. Re-arms the timer if it's already armed.
    Reset { timer: usize, issued_at: u64 },
    /// Disarm the timer.
    Stop { timer: usize },
    /// Update the period and arm the timer for `issued_at + period`.
    ChangePeriod {
        timer: usize,
        period: Ticks,
        issued_at: u64,
    },
    /// Call the function in the service task.
    PendFunction(Box<dyn FnOnce() + Send>),
}

impl fmt::Debug for TimerCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Start { timer, issued_at } => f
                .debug_struct("Start")
                .field("timer", timer)
                .field("issued_at", issued_at)
                .finish(),
            Self::Reset { timer, issued_at } => f
                .debug_struct("Reset")
                .field("timer", timer)
                .field("issued_at", issued_at)
                .finish(),
            Self::Stop { timer } => f.debug_struct("Stop").field("timer", timer).finish(),
            Self::ChangePeriod {
                timer,
                period,
                issued_at,
            } => f
                .debug_struct("ChangePeriod")
                .field("timer", timer)
                .field("period", period)
                .field("issued_at", issued_at)
                .finish(),
            Self::PendFunction(_) => f.write_str("PendFunction(..)"),
        }
    }
}

/// An entry of the armed timer heap.
#[derive(Debug)]
struct ActiveTimer {
    /// The expiry tick.
    at: u64,
    /// The index into [`TimerServiceCb::timers`].
    timer: usize,
}

/// Keeps [`TimerCb::heap_pos`] up-to-date.
struct TimerHeapCtx<'a, Traits: Port> {
    timers: &'a mut Vec<TimerCb<Traits>>,
}

impl<Traits: Port> BinaryHeapCtx<ActiveTimer> for TimerHeapCtx<'_, Traits> {
    #[inline]
    fn lt(&mut self, x: &ActiveTimer, y: &ActiveTimer) -> bool {
        // Break ties by creation order so that the firing order is
        // deterministic
        (x.at, x.timer) < (y.at, y.timer)
    }

    #[inline]
    fn on_move(&mut self, e: &mut ActiveTimer, new_index: usize) {
        self.timers[e.timer].heap_pos = Some(new_index);
    }
}

/// The state of the timer service, protected by CPU Lock.
pub(crate) struct TimerServiceCb<Traits: Port> {
    pub(crate) timers: Vec<TimerCb<Traits>>,

    /// Armed timers, ordered by expiry tick.
    active: Vec<ActiveTimer>,

    commands: VecDeque<TimerCommand>,
    capacity: usize,
    queue_allocated: bool,

    /// Tasks waiting for a free slot in `commands`. Each wait record holds
    /// the command to be enqueued. Non-empty only while `commands` is full.
    pub(crate) send_wait_queue: WaitQueue,

    /// The service task waiting for a command.
    pub(crate) recv_wait_queue: WaitQueue,

    /// The timer whose callback is running.
    pub(crate) running: Option<usize>,

    task: Option<Traits::TaskHandle>,
}

impl<Traits: Port> TimerServiceCb<Traits> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            timers: Vec::new(),
            active: Vec::new(),
            commands: VecDeque::new(),
            capacity,
            queue_allocated: false,
            send_wait_queue: WaitQueue::new(),
            recv_wait_queue: WaitQueue::new(),
            running: None,
            task: None,
        }
    }

    /// Allocate the command queue if it hasn't been allocated yet.
    pub(crate) fn ensure_queue(&mut self) -> Result<(), NoMemoryError> {
        if !self.queue_allocated {
            self.commands
                .try_reserve_exact(self.capacity)
                .map_err(|_| NoMemoryError::NoMemory)?;
            self.queue_allocated = true;
            log::debug!("allocated the timer command queue ({} entries)", self.capacity);
        }
        Ok(())
    }

    fn has_space(&mut self) -> bool {
        self.ensure_queue().is_ok() && self.commands.len() < self.capacity
    }

    /// Get the expiry tick of `timer` if it's armed.
    pub(crate) fn expiry_tick(&self, timer: usize) -> Option<u64> {
        self.timers[timer].heap_pos.map(|pos| self.active[pos].at)
    }

    /// Arm `timer` for `at`, disarming it first if it's already armed.
    fn arm(&mut self, timer: usize, at: u64) {
        self.disarm(timer);
        self.active.heap_push(
            ActiveTimer { at, timer },
            TimerHeapCtx {
                timers: &mut self.timers,
            },
        );
    }

    fn disarm(&mut self, timer: usize) {
        if let Some(pos) = self.timers[timer].heap_pos.take() {
            let removed = self.active.heap_remove(
                pos,
                TimerHeapCtx {
                    timers: &mut self.timers,
                },
            );
            debug_assert_eq!(removed.map(|e| e.timer), Some(timer));
        }
    }

    /// Remove the armed timer with the earliest expiry tick if it's `<= now`.
    fn pop_expired(&mut self, now: u64) -> Option<usize> {
        if self.active.first().map_or(true, |first| first.at > now) {
            return None;
        }

        let ActiveTimer { timer, .. } = self.active.heap_pop(TimerHeapCtx {
            timers: &mut self.timers,
        })?;
        self.timers[timer].heap_pos = None;
        Some(timer)
    }
}

/// Enqueue `command` and wake up the service task if it's waiting.
fn push_command<Traits: Port>(
    kernel: &Kernel<Traits>,
    state: &mut KernelState<Traits>,
    command: TimerCommand,
) -> Option<Priority> {
    log::trace!("enqueueing {command:?}");
    state.timer_service.commands.push_back(command);
    wait::wake_up_one(kernel, state, WaitQueueId::TimerCommandRecv)
}

/// Dequeue a command. The freed slot is passed on to the first blocked
/// submitter, if any.
///
/// Returns the command and the priority of the woken submitter.
fn pop_command<Traits: Port>(
    kernel: &Kernel<Traits>,
    state: &mut KernelState<Traits>,
) -> Option<(TimerCommand, Option<Priority>)> {
    let command = state.timer_service.commands.pop_front()?;

    let woken = if let Some(wait) = state.timer_service.send_wait_queue.pop_front() {
        if let WaitPayload::TimerCommand(blocked) = &mut state.waits[wait].payload {
            if let Some(blocked) = blocked.take() {
                state.timer_service.commands.push_back(blocked);
            }
        } else {
            unreachable!("a wait record in the send queue lacks a command");
        }
        Some(wait::complete_wait(kernel, state, wait, Ok(())))
    } else {
        None
    };

    Some((command, woken))
}

/// Send a command to the service task from a task or boot context, waiting
/// for up to `block_time` ticks for a free slot.
///
/// `make` receives the tick count at the time of submission.
pub(crate) fn send_command<Traits: Port>(
    kernel: &'static Kernel<Traits>,
    block_time: Ticks,
    make: impl FnOnce(u64) -> TimerCommand,
) -> Result<(), SendCommandError> {
    let mut lock = klock::lock_cpu(kernel)?;
    state::expect_non_interrupt_context(kernel)?;

    let command = make(kernel.tick_count());

    if lock.timer_service.has_space() {
        let woken = push_command(kernel, &mut lock, command);
        drop(lock);

        if let Some(priority) = woken {
            if kernel.port().is_task_context() && kernel.preempts_current(priority) {
                kernel.port().yield_request(true);
            }
        }
        return Ok(());
    }

    if block_time == 0 || !kernel.port().is_task_context() {
        log::warn!("timer command queue is full; dropping {command:?}");
        return Err(SendCommandError::Timeout);
    }

    // The service task moves the command to the queue when it frees a slot
    let payload = WaitPayload::TimerCommand(Some(command));
    if block_time == WAIT_FOREVER {
        wait::wait(kernel, lock, WaitQueueId::TimerCommandSend, payload).map_err(
            |e| match e {
                WaitError::BadContext => SendCommandError::BadContext,
            },
        )
    } else {
        wait::wait_timeout(
            kernel,
            lock,
            WaitQueueId::TimerCommandSend,
            payload,
            block_time,
        )
        .map_err(SendCommandError::from)
    }
}

/// Send a command to the service task. Allowed in any context and never
/// blocks.
///
/// Returns `true` if a task more urgent than the current one was woken up.
pub(crate) fn send_command_from_isr<Traits: Port>(
    kernel: &'static Kernel<Traits>,
    make: impl FnOnce(u64) -> TimerCommand,
) -> Result<bool, SendCommandError> {
    let mut lock = klock::lock_cpu(kernel)?;
    let command = make(kernel.tick_count());

    if !lock.timer_service.has_space() {
        log::warn!("timer command queue is full; dropping {command:?}");
        return Err(SendCommandError::QueueOverflow);
    }

    let woken = push_command(kernel, &mut lock, command);
    drop(lock);

    Ok(woken.map_or(false, |priority| kernel.preempts_current(priority)))
}

/// Create the service task. Called by [`Kernel::start_scheduler`].
pub(crate) fn start_service_task<Traits: Port>(
    kernel: &'static Kernel<Traits>,
) -> Result<(), StartSchedulerError> {
    klock::lock_cpu(kernel)?.timer_service.ensure_queue()?;

    let cfg = kernel.cfg();
    let task = Task::build()
        .name(TIMER_SERVICE_TASK_NAME)
        .priority(cfg.get_timer_task_priority())
        .stack_size(cfg.get_timer_task_stack_size())
        .start(move || service_task_body(kernel))
        .finish(kernel)
        .map_err(|e| {
            // `BadParam` is ruled out by `KernelCfg::validate`
            log::error!("failed to create the timer service task: {e:?}");
            StartSchedulerError::NoMemory
        })?;

    klock::lock_cpu(kernel)?.timer_service.task = Some(task.handle().clone());
    Ok(())
}

impl<Traits: Port> Kernel<Traits> {
    /// Get the timer service task. Returns `None` before
    /// [`Self::start_scheduler`] is called.
    pub fn timer_service_task(&'static self) -> Option<Task<Traits>> {
        let handle = klock::lock_cpu(self).ok()?.timer_service.task.clone()?;
        Some(Task::from_handle(self, handle))
    }
}

fn service_task_body<Traits: Port>(kernel: &'static Kernel<Traits>) {
    log::debug!("timer service task started");

    loop {
        let result = process_expired_timers(kernel)
            .and_then(|()| process_commands(kernel))
            .and_then(|()| wait_for_work(kernel));

        if let Err(e) = result {
            // The service task always runs in a task context with CPU Lock
            // inactive
            panic!("timer service task failed: {e:?}");
        }
    }
}

/// Fire the timers whose expiry ticks have been reached.
fn process_expired_timers<Traits: Port>(
    kernel: &'static Kernel<Traits>,
) -> Result<(), BadContextError> {
    let now = kernel.tick_count();

    loop {
        let mut lock = klock::lock_cpu(kernel)?;
        let timer_service = &mut lock.timer_service;

        let Some(timer) = timer_service.pop_expired(now) else {
            return Ok(());
        };

        let timer_cb = &timer_service.timers[timer];
        let handler = Arc::clone(&timer_cb.handler);
        if timer_cb.mode == TimerMode::AutoReload {
            let at = now + u64::from(timer_cb.period);
            timer_service.arm(timer, at);
        }
        timer_service.running = Some(timer);
        drop(lock);

        log::trace!("firing timer {timer} at tick {now}");
        handler.on_expiry(Timer::from_index(kernel, timer));

        klock::lock_cpu(kernel)?.timer_service.running = None;
    }
}

/// Carry out all queued commands.
fn process_commands<Traits: Port>(kernel: &'static Kernel<Traits>) -> Result<(), BadContextError> {
    loop {
        let mut lock = klock::lock_cpu(kernel)?;

        let Some((command, woken)) = pop_command(kernel, &mut lock) else {
            return Ok(());
        };

        log::trace!("processing {command:?}");

        let timer_service = &mut lock.timer_service;
        let pended = match command {
            TimerCommand::Start { timer, issued_at } | TimerCommand::Reset { timer, issued_at } => {
                let at = issued_at + u64::from(timer_service.timers[timer].period);
                timer_service.arm(timer, at);
                None
            }
            TimerCommand::Stop { timer } => {
                timer_service.disarm(timer);
                None
            }
            TimerCommand::ChangePeriod {
                timer,
                period,
                issued_at,
            } => {
                timer_service.timers[timer].period = period;
                timer_service.arm(timer, issued_at + u64::from(period));
                None
            }
            TimerCommand::PendFunction(f) => Some(f),
        };
        drop(lock);

        if let Some(priority) = woken {
            kernel
                .port()
                .yield_request(kernel.preempts_current(priority));
        }

        if let Some(f) = pended {
            f();
        }
    }
}

/// Block until a command arrives or the earliest armed timer expires.
fn wait_for_work<Traits: Port>(kernel: &'static Kernel<Traits>) -> Result<(), BadContextError> {
    let lock = klock::lock_cpu(kernel)?;
    if !lock.timer_service.commands.is_empty() {
        return Ok(());
    }

    let now = kernel.tick_count();
    let next_expiry = lock.timer_service.active.first().map(|first| first.at);
    match next_expiry {
        Some(at) if at <= now => Ok(()),
        Some(at) => {
            // Bounded even if the expiry is very far away
            let ticks = Ticks::try_from(at - now).unwrap_or(WAIT_FOREVER - 1);
            match wait::wait_timeout(
                kernel,
                lock,
                WaitQueueId::TimerCommandRecv,
                WaitPayload::None,
                ticks,
            ) {
                Ok(()) | Err(WaitTimeoutError::Timeout) => Ok(()),
                Err(WaitTimeoutError::BadContext) => Err(BadContextError::BadContext),
            }
        }
        None => match wait::wait(kernel, lock, WaitQueueId::TimerCommandRecv, WaitPayload::None) {
            Ok(()) => Ok(()),
            Err(WaitError::BadContext) => Err(BadContextError::BadContext),
        },
    }
}
