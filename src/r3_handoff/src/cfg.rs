//! Kernel configuration
use crate::{error::CfgError, port::Priority, timeout::Ticks};

/// The kernel configuration passed to [`Kernel::new`].
///
/// [`Kernel::new`]: crate::Kernel::new
///
/// # Examples
///
/// ```
/// use r3_handoff::KernelCfg;
/// let cfg = KernelCfg::new().tick_rate_hz(100).timer_queue_length(4);
/// assert_eq!(cfg.get_tick_rate_hz(), 100);
/// assert_eq!(cfg.get_timer_task_priority(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelCfg {
    tick_rate_hz: u32,
    num_priority_levels: usize,
    timer_queue_length: usize,
    timer_task_priority: Option<Priority>,
    timer_task_stack_size: usize,
    min_stack_size: usize,
}

impl Default for KernelCfg {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelCfg {
    pub const DEFAULT_TICK_RATE_HZ: u32 = 1000;
    pub const DEFAULT_NUM_PRIORITY_LEVELS: usize = 5;
    pub const DEFAULT_TIMER_QUEUE_LENGTH: usize = 10;
    pub const DEFAULT_TIMER_TASK_STACK_SIZE: usize = 4096;
    pub const DEFAULT_MIN_STACK_SIZE: usize = 2048;

    /// The largest number of priority levels that [`Priority`] can
    /// represent.
    pub const MAX_NUM_PRIORITY_LEVELS: usize = Priority::MAX as usize + 1;

    pub const fn new() -> Self {
        Self {
            tick_rate_hz: Self::DEFAULT_TICK_RATE_HZ,
            num_priority_levels: Self::DEFAULT_NUM_PRIORITY_LEVELS,
            timer_queue_length: Self::DEFAULT_TIMER_QUEUE_LENGTH,
            timer_task_priority: None,
            timer_task_stack_size: Self::DEFAULT_TIMER_TASK_STACK_SIZE,
            min_stack_size: Self::DEFAULT_MIN_STACK_SIZE,
        }
    }

    /// Specify the number of system clock ticks per second.
    pub const fn tick_rate_hz(self, x: u32) -> Self {
        Self {
            tick_rate_hz: x,
            ..self
        }
    }

    /// Specify the number of task priority levels. Valid priorities are
    /// `0..x`.
    pub const fn num_priority_levels(self, x: usize) -> Self {
        Self {
            num_priority_levels: x,
            ..self
        }
    }

    /// Specify the capacity of the timer service's command queue.
    pub const fn timer_queue_length(self, x: usize) -> Self {
        Self {
            timer_queue_length: x,
            ..self
        }
    }

    /// Specify the priority of the timer service task. Defaults to the most
    /// urgent priority.
    pub const fn timer_task_priority(self, x: Priority) -> Self {
        Self {
            timer_task_priority: Some(x),
            ..self
        }
    }

    /// Specify the stack size of the timer service task.
    pub const fn timer_task_stack_size(self, x: usize) -> Self {
        Self {
            timer_task_stack_size: x,
            ..self
        }
    }

    /// Specify the smallest stack size accepted for a task.
    pub const fn min_stack_size(self, x: usize) -> Self {
        Self {
            min_stack_size: x,
            ..self
        }
    }

    pub const fn get_tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    pub const fn get_num_priority_levels(&self) -> usize {
        self.num_priority_levels
    }

    pub const fn get_timer_queue_length(&self) -> usize {
        self.timer_queue_length
    }

    pub const fn get_timer_task_priority(&self) -> Priority {
        match self.timer_task_priority {
            Some(x) => x,
            None => self.num_priority_levels.saturating_sub(1) as Priority,
        }
    }

    pub const fn get_timer_task_stack_size(&self) -> usize {
        self.timer_task_stack_size
    }

    pub const fn get_min_stack_size(&self) -> usize {
        self.min_stack_size
    }

    /// Check the configuration values.
    pub fn validate(&self) -> Result<(), CfgError> {
        if self.tick_rate_hz == 0
            || self.num_priority_levels == 0
            || self.num_priority_levels > Self::MAX_NUM_PRIORITY_LEVELS
            || self.timer_queue_length == 0
            || self.timer_task_stack_size < self.min_stack_size
        {
            return Err(CfgError::BadParam);
        }

        if usize::from(self.get_timer_task_priority()) >= self.num_priority_levels {
            return Err(CfgError::BadParam);
        }

        Ok(())
    }

    /// Convert a duration in milliseconds to ticks, rounding down.
    pub fn ms_to_ticks(&self, ms: u32) -> Ticks {
        let ticks = u64::from(ms) * u64::from(self.tick_rate_hz) / 1000;
        Ticks::try_from(ticks).unwrap_or(Ticks::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = KernelCfg::new();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.get_tick_rate_hz(), 1000);
        assert_eq!(cfg.get_timer_queue_length(), 10);
        assert_eq!(cfg.get_timer_task_priority(), 4);
    }

    #[test]
    fn rejects_out_of_range_values() {
        for cfg in [
            KernelCfg::new().tick_rate_hz(0),
            KernelCfg::new().num_priority_levels(0),
            KernelCfg::new().num_priority_levels(257),
            KernelCfg::new().timer_queue_length(0),
            KernelCfg::new().timer_task_priority(5),
            KernelCfg::new().timer_task_stack_size(16),
        ] {
            assert_eq!(cfg.validate(), Err(CfgError::BadParam), "{cfg:?}");
        }
    }

    #[test]
    fn ms_to_ticks() {
        let cfg = KernelCfg::new();
        assert_eq!(cfg.ms_to_ticks(1000), 1000);
        assert_eq!(cfg.ms_to_ticks(0), 0);

        let cfg = KernelCfg::new().tick_rate_hz(100);
        assert_eq!(cfg.ms_to_ticks(1000), 100);
        assert_eq!(cfg.ms_to_ticks(15), 1);
        assert_eq!(cfg.ms_to_ticks(9), 0);
        assert_eq!(cfg.ms_to_ticks(u32::MAX), 429_496_729);
    }
}
