//! Software timers
//!
//! Timers are driven by the timer service task, which is created by
//! [`Kernel::start_scheduler`]. Every operation that changes whether a timer is
//! armed is a command sent to the service task and takes effect
//! asynchronously. Each comes in two forms: a task-context form that may
//! block for up to a given number of ticks when the command queue is full,
//! and an `_from_isr` form that never blocks.
use std::{fmt, marker::PhantomData, sync::Arc};

use crate::{
    error::{ChangeTimerPeriodError, CreateTimerError, GetTimerError, TimerCommandError},
    klock,
    timeout::Ticks,
    timer_service::{self, TimerCommand},
    Kernel, Port,
};

/// Specifies whether a timer re-arms itself after expiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerMode {
    /// The timer becomes dormant when it expires.
    OneShot,
    /// The timer is re-armed for one period after the tick at which it
    /// expired, before its callback is called.
    AutoReload,
}

/// The observable state of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerState {
    /// Not armed.
    Dormant,
    /// Waiting for its expiry tick.
    Armed,
    /// Its callback is being called. An auto-reload timer is already armed
    /// for the next period at this point.
    Running,
}

/// The callback of a timer. Called in the timer service task.
///
/// Implemented for all `Fn(Timer<Traits>)` closures.
pub trait TimerHandler<Traits: Port>: Send + Sync + 'static {
    fn on_expiry(&self, timer: Timer<Traits>);
}

impl<Traits: Port, F> TimerHandler<Traits> for F
where
    F: Fn(Timer<Traits>) + Send + Sync + 'static,
{
    #[inline]
    fn on_expiry(&self, timer: Timer<Traits>) {
        self(timer)
    }
}

/// *Timer control block* - the state data of a timer.
pub(crate) struct TimerCb<Traits: Port> {
    pub(crate) name: &'static str,
    pub(crate) period: Ticks,
    pub(crate) mode: TimerMode,
    pub(crate) id: usize,
    pub(crate) handler: Arc<dyn TimerHandler<Traits>>,

    /// The position in the armed timer heap. `Some(_)` iff the timer is
    /// armed.
    pub(crate) heap_pos: Option<usize>,
}

/// A software timer.
pub struct Timer<Traits: Port> {
    kernel: &'static Kernel<Traits>,
    index: usize,
}

impl<Traits: Port> Clone for Timer<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits: Port> Copy for Timer<Traits> {}

impl<Traits: Port> PartialEq for Timer<Traits> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.kernel, other.kernel) && self.index == other.index
    }
}

impl<Traits: Port> Eq for Timer<Traits> {}

impl<Traits: Port> fmt::Debug for Timer<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Timer").field(&self.index).finish()
    }
}

impl<Traits: Port> Timer<Traits> {
    /// Construct a `TimerBuilder` to create a timer.
    pub const fn build() -> TimerBuilder<Traits> {
        TimerBuilder::new()
    }

    pub(crate) fn from_index(kernel: &'static Kernel<Traits>, index: usize) -> Self {
        Self { kernel, index }
    }

    /// Get the kernel instance this timer belongs to.
    #[inline]
    pub fn kernel(self) -> &'static Kernel<Traits> {
        self.kernel
    }

    fn send(
        self,
        block_time: Ticks,
        make: impl FnOnce(usize, u64) -> TimerCommand,
    ) -> Result<(), TimerCommandError> {
        let timer = self.index;
        timer_service::send_command(self.kernel, block_time, |now| make(timer, now))?;
        Ok(())
    }

    fn send_from_isr(
        self,
        make: impl FnOnce(usize, u64) -> TimerCommand,
    ) -> Result<bool, TimerCommandError> {
        let timer = self.index;
        Ok(timer_service::send_command_from_isr(self.kernel, |now| {
            make(timer, now)
        })?)
    }

    /// Arm the timer for one period after now. Re-arms it if it's already
    /// armed.
    ///
    /// Blocks for up to `block_time` ticks if the command queue is full.
    pub fn start(self, block_time: Ticks) -> Result<(), TimerCommandError> {
        self.send(block_time, |timer, issued_at| TimerCommand::Start {
            timer,
            issued_at,
        })
    }

    /// The interrupt-safe form of [`Self::start`].
    ///
    /// Returns `true` if a task more urgent than the current one was woken
    /// up.
    pub fn start_from_isr(self) -> Result<bool, TimerCommandError> {
        self.send_from_isr(|timer, issued_at| TimerCommand::Start { timer, issued_at })
    }

    /// Disarm the timer.
    pub fn stop(self, block_time: Ticks) -> Result<(), TimerCommandError> {
        self.send(block_time, |timer, _| TimerCommand::Stop { timer })
    }

    /// The interrupt-safe form of [`Self::stop`].
    ///
    /// This form can also be used in the timer's own callback to stop the
    /// timer without waiting for the command queue.
    pub fn stop_from_isr(self) -> Result<bool, TimerCommandError> {
        self.send_from_isr(|timer, _| TimerCommand::Stop { timer })
    }

    /// Re-arm the timer for one period after now, or arm it if it's
    /// dormant.
    pub fn reset(self, block_time: Ticks) -> Result<(), TimerCommandError> {
        self.send(block_time, |timer, issued_at| TimerCommand::Reset {
            timer,
            issued_at,
        })
    }

    /// The interrupt-safe form of [`Self::reset`].
    pub fn reset_from_isr(self) -> Result<bool, TimerCommandError> {
        self.send_from_isr(|timer, issued_at| TimerCommand::Reset { timer, issued_at })
    }

    /// Change the period and arm the timer for one new period after now.
    /// A dormant timer is armed as well.
    pub fn change_period(
        self,
        period: Ticks,
        block_time: Ticks,
    ) -> Result<(), ChangeTimerPeriodError> {
        if period == 0 {
            return Err(ChangeTimerPeriodError::BadParam);
        }

        let timer = self.index;
        timer_service::send_command(self.kernel, block_time, |issued_at| {
            TimerCommand::ChangePeriod {
                timer,
                period,
                issued_at,
            }
        })?;
        Ok(())
    }

    /// The interrupt-safe form of [`Self::change_period`].
    pub fn change_period_from_isr(self, period: Ticks) -> Result<bool, ChangeTimerPeriodError> {
        if period == 0 {
            return Err(ChangeTimerPeriodError::BadParam);
        }

        let timer = self.index;
        Ok(timer_service::send_command_from_isr(
            self.kernel,
            |issued_at| TimerCommand::ChangePeriod {
                timer,
                period,
                issued_at,
            },
        )?)
    }

    /// Run `f` with the timer's control block.
    fn with_cb<R>(
        self,
        f: impl FnOnce(&mut timer_service::TimerServiceCb<Traits>, usize) -> R,
    ) -> Result<R, GetTimerError> {
        let mut lock = klock::lock_cpu(self.kernel)?;
        Ok(f(&mut lock.timer_service, self.index))
    }

    pub fn name(self) -> Result<&'static str, GetTimerError> {
        self.with_cb(|ts, i| ts.timers[i].name)
    }

    /// Get the application-defined identifier.
    pub fn id(self) -> Result<usize, GetTimerError> {
        self.with_cb(|ts, i| ts.timers[i].id)
    }

    /// Replace the application-defined identifier.
    pub fn set_id(self, id: usize) -> Result<(), GetTimerError> {
        self.with_cb(|ts, i| ts.timers[i].id = id)
    }

    /// Get the period. A pending [`Self::change_period`] command is not
    /// reflected until the service task processes it.
    pub fn period(self) -> Result<Ticks, GetTimerError> {
        self.with_cb(|ts, i| ts.timers[i].period)
    }

    pub fn mode(self) -> Result<TimerMode, GetTimerError> {
        self.with_cb(|ts, i| ts.timers[i].mode)
    }

    /// Change the mode. Takes effect at the next expiry.
    pub fn set_mode(self, mode: TimerMode) -> Result<(), GetTimerError> {
        self.with_cb(|ts, i| ts.timers[i].mode = mode)
    }

    pub fn state(self) -> Result<TimerState, GetTimerError> {
        self.with_cb(|ts, i| {
            if ts.running == Some(i) {
                TimerState::Running
            } else if ts.timers[i].heap_pos.is_some() {
                TimerState::Armed
            } else {
                TimerState::Dormant
            }
        })
    }

    /// Return `true` iff the timer is armed.
    pub fn is_active(self) -> Result<bool, GetTimerError> {
        self.with_cb(|ts, i| ts.timers[i].heap_pos.is_some())
    }

    /// Get the tick at which the timer expires next, or `None` if it's not
    /// armed.
    pub fn expiry_tick(self) -> Result<Option<u64>, GetTimerError> {
        self.with_cb(|ts, i| ts.expiry_tick(i))
    }
}

/// Builder type for [`Timer`].
#[must_use = "must call `finish()` to create a timer"]
pub struct TimerBuilder<Traits: Port> {
    _phantom: PhantomData<fn() -> Traits>,
    name: &'static str,
    period: Option<Ticks>,
    mode: TimerMode,
    id: usize,
    handler: Option<Arc<dyn TimerHandler<Traits>>>,
}

impl<Traits: Port> TimerBuilder<Traits> {
    const fn new() -> Self {
        Self {
            _phantom: PhantomData,
            name: "",
            period: None,
            mode: TimerMode::OneShot,
            id: 0,
            handler: None,
        }
    }

    /// Specify the timer's name. Used for diagnostics only.
    pub fn name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// [**Required**] Specify the period in ticks. Must be non-zero.
    pub fn period(self, period: Ticks) -> Self {
        Self {
            period: Some(period),
            ..self
        }
    }

    /// Specify the mode. Defaults to [`TimerMode::OneShot`].
    pub fn mode(self, mode: TimerMode) -> Self {
        Self { mode, ..self }
    }

    /// Specify the application-defined identifier, which the callback can
    /// retrieve by [`Timer::id`]. Defaults to `0`.
    pub fn id(self, id: usize) -> Self {
        Self { id, ..self }
    }

    /// [**Required**] Specify the callback.
    pub fn callback(self, f: impl Fn(Timer<Traits>) + Send + Sync + 'static) -> Self {
        self.handler(f)
    }

    /// [**Required**] Specify the callback as a [`TimerHandler`]. An
    /// alternative to [`Self::callback`].
    pub fn handler(self, handler: impl TimerHandler<Traits>) -> Self {
        Self {
            handler: Some(Arc::new(handler)),
            ..self
        }
    }

    /// Complete the definition of a timer and create it in the dormant state.
    ///
    /// The first timer allocates the timer service's command queue.
    pub fn finish(self, kernel: &'static Kernel<Traits>) -> Result<Timer<Traits>, CreateTimerError> {
        let period = match self.period {
            Some(period) if period > 0 => period,
            _ => return Err(CreateTimerError::BadParam),
        };
        let handler = self.handler.ok_or(CreateTimerError::BadParam)?;

        let mut lock = klock::lock_cpu(kernel)?;
        let timer_service = &mut lock.timer_service;
        timer_service.ensure_queue()?;
        timer_service
            .timers
            .try_reserve(1)
            .map_err(|_| CreateTimerError::NoMemory)?;

        let index = timer_service.timers.len();
        timer_service.timers.push(TimerCb {
            name: self.name,
            period,
            mode: self.mode,
            id: self.id,
            handler,
            heap_pos: None,
        });

        log::debug!(
            "created timer {index} ({:?}, period = {period}, {:?})",
            self.name,
            self.mode
        );
        Ok(Timer::from_index(kernel, index))
    }
}
