//! Result codes and the error types of the kernel services
use core::fmt;

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use r3_handoff::ResultCode;
            /// assert_eq!(ResultCode::QueueOverflow.as_str(), "QueueOverflow");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }

        impl fmt::Display for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the kernel services can
    /// return.
    ///
    /// Error codes are negative. The values follow their closest equivalents
    /// in μITRON4.0.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// A parameter is invalid in a way that is not covered by any other error
        /// codes.
        BadParam = -17,
        /// The backing storage of an object could not be allocated.
        NoMemory = -33,
        /// The current context disallows the operation.
        BadContext = -25,
        /// An operation or an object couldn't be enqueued because there are too
        /// many of such things that already have been enqueued.
        QueueOverflow = -43,
        /// The operation timed out.
        Timeout = -50,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode`
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl std::error::Error for $name {}

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                match x {
                    $(
                        $name::$vname => Self::$vname,
                    )*
                }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                    assert_eq!(ResultCode::$vname as i8, $name::$vname as i8);
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

// Narrow errors shared by several services. They are declared first so that
// the wider error types below can name them as their sub-errors.

define_error! {
    mod bad_context_error {}
    /// `BadContext`
    pub(crate) enum BadContextError {
        BadContext,
    }
}

define_error! {
    mod no_memory_error {}
    /// `NoMemory`
    pub(crate) enum NoMemoryError {
        NoMemory,
    }
}

define_error! {
    mod wait_error {}
    /// Error type for an unbounded wait operation.
    pub(crate) enum WaitError: BadContextError {
        BadContext,
    }
}

define_error! {
    mod wait_timeout_error {}
    /// Error type for a bounded wait operation.
    pub(crate) enum WaitTimeoutError: BadContextError {
        BadContext,
        Timeout,
    }
}

define_error! {
    mod send_command_error {}
    /// Error type for submitting a command to the timer service.
    pub(crate) enum SendCommandError: BadContextError, WaitTimeoutError {
        BadContext,
        Timeout,
        QueueOverflow,
    }
}

define_error! {
    mod cfg_error {}
    /// Error type for [`Kernel::new`].
    ///
    /// [`Kernel::new`]: crate::Kernel::new
    pub enum CfgError {
        /// A configuration value is out of range.
        BadParam,
    }
}

define_error! {
    mod create_task_error {}
    /// Error type for [`TaskBuilder::finish`].
    ///
    /// [`TaskBuilder::finish`]: crate::TaskBuilder::finish
    pub enum CreateTaskError: NoMemoryError {
        /// The priority is out of range, or the stack size is smaller than
        /// the configured minimum.
        BadParam,
        /// The port couldn't allocate the task.
        NoMemory,
    }
}

define_error! {
    mod start_scheduler_error {}
    /// Error type for [`Kernel::start_scheduler`].
    ///
    /// [`Kernel::start_scheduler`]: crate::Kernel::start_scheduler
    pub enum StartSchedulerError: BadContextError, NoMemoryError {
        /// The scheduler is already running, or CPU Lock is active.
        BadContext,
        /// The timer service task or its command queue couldn't be allocated.
        NoMemory,
    }
}

define_error! {
    mod sleep_error {}
    /// Error type for [`Kernel::sleep`].
    ///
    /// [`Kernel::sleep`]: crate::Kernel::sleep
    pub enum SleepError: BadContextError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod create_semaphore_error {}
    /// Error type for [`Semaphore::new`].
    ///
    /// [`Semaphore::new`]: crate::Semaphore::new
    pub enum CreateSemaphoreError: BadContextError, NoMemoryError {
        /// CPU Lock is active.
        BadContext,
        /// The control block couldn't be allocated.
        NoMemory,
    }
}

define_error! {
    mod get_semaphore_error {}
    /// Error type for [`Semaphore::is_available`] and [`Semaphore::drain`].
    ///
    /// [`Semaphore::is_available`]: crate::Semaphore::is_available
    /// [`Semaphore::drain`]: crate::Semaphore::drain
    pub enum GetSemaphoreError: BadContextError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod signal_semaphore_error {}
    /// Error type for [`Semaphore::signal`] and [`Semaphore::signal_from_isr`].
    ///
    /// [`Semaphore::signal`]: crate::Semaphore::signal
    /// [`Semaphore::signal_from_isr`]: crate::Semaphore::signal_from_isr
    pub enum SignalSemaphoreError: BadContextError {
        /// CPU Lock is active, or [`Semaphore::signal`] was called from an
        /// interrupt context.
        ///
        /// [`Semaphore::signal`]: crate::Semaphore::signal
        BadContext,
    }
}

define_error! {
    mod wait_semaphore_error {}
    /// Error type for [`Semaphore::wait_one`].
    ///
    /// [`Semaphore::wait_one`]: crate::Semaphore::wait_one
    pub enum WaitSemaphoreError: BadContextError, WaitError {
        /// CPU Lock is active, or the current context is not waitable.
        BadContext,
    }
}

define_error! {
    mod wait_semaphore_timeout_error {}
    /// Error type for [`Semaphore::wait_one_timeout`].
    ///
    /// [`Semaphore::wait_one_timeout`]: crate::Semaphore::wait_one_timeout
    pub enum WaitSemaphoreTimeoutError: BadContextError, WaitTimeoutError {
        /// CPU Lock is active, or the current context is not waitable.
        BadContext,
        /// The semaphore wasn't signaled before the timeout elapsed.
        Timeout,
    }
}

define_error! {
    mod poll_semaphore_error {}
    /// Error type for [`Semaphore::poll_one`].
    ///
    /// [`Semaphore::poll_one`]: crate::Semaphore::poll_one
    pub enum PollSemaphoreError: BadContextError {
        /// CPU Lock is active.
        BadContext,
        /// The semaphore was empty.
        Timeout,
    }
}

define_error! {
    mod create_timer_error {}
    /// Error type for [`TimerBuilder::finish`].
    ///
    /// [`TimerBuilder::finish`]: crate::TimerBuilder::finish
    pub enum CreateTimerError: BadContextError, NoMemoryError {
        /// The period is zero or missing, or no callback was given.
        BadParam,
        /// CPU Lock is active.
        BadContext,
        /// The timer service's command queue couldn't be allocated.
        NoMemory,
    }
}

define_error! {
    mod get_timer_error {}
    /// Error type for the timer queries such as [`Timer::state`].
    ///
    /// [`Timer::state`]: crate::Timer::state
    pub enum GetTimerError: BadContextError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod timer_command_error {}
    /// Error type for [`Timer::start`], [`Timer::stop`], [`Timer::reset`],
    /// their `_from_isr` variants, and [`Kernel::pend_function_call`].
    ///
    /// [`Timer::start`]: crate::Timer::start
    /// [`Timer::stop`]: crate::Timer::stop
    /// [`Timer::reset`]: crate::Timer::reset
    /// [`Kernel::pend_function_call`]: crate::Kernel::pend_function_call
    pub enum TimerCommandError: BadContextError, SendCommandError {
        /// CPU Lock is active, or a blocking variant was called from an
        /// interrupt context.
        BadContext,
        /// The command queue stayed full for the whole block time.
        Timeout,
        /// The command queue was full (interrupt-safe variants only).
        QueueOverflow,
    }
}

define_error! {
    mod change_timer_period_error {}
    /// Error type for [`Timer::change_period`] and
    /// [`Timer::change_period_from_isr`].
    ///
    /// [`Timer::change_period`]: crate::Timer::change_period
    /// [`Timer::change_period_from_isr`]: crate::Timer::change_period_from_isr
    pub enum ChangeTimerPeriodError: BadContextError, SendCommandError {
        /// The new period is zero.
        BadParam,
        /// CPU Lock is active, or the blocking variant was called from an
        /// interrupt context.
        BadContext,
        /// The command queue stayed full for the whole block time.
        Timeout,
        /// The command queue was full (interrupt-safe variant only).
        QueueOverflow,
    }
}
