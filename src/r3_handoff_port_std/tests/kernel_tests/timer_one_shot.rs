//! A one-shot timer fires once per arming. `reset` and `change_period` arm
//! a dormant timer.
use assert_matches::assert_matches;
use r3_handoff::{
    ChangeTimerPeriodError, KernelCfg, Semaphore, Task, Timer, TimerMode, TimerState,
    WaitSemaphoreTimeoutError,
};
use r3_handoff_port_std::StdPort;

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new(), |kernel| {
        let fired = Semaphore::new(kernel).unwrap();

        let timer = Timer::build()
            .name("OneShot")
            .period(30)
            .id(7)
            .callback(move |timer: Timer<StdPort>| {
                assert_eq!(timer.id(), Ok(7));
                assert_eq!(timer.is_active(), Ok(false));
                fired.signal().unwrap();
            })
            .finish(kernel)
            .unwrap();

        Task::build()
            .name("Task1")
            .priority(1)
            .start(move || {
                assert_eq!(timer.mode(), Ok(TimerMode::OneShot));

                // Fires once
                let start = kernel.tick_count();
                timer.start(0).unwrap();
                fired.wait_one_timeout(1000).unwrap();
                assert!(kernel.tick_count() - start >= 30);
                assert_matches!(
                    fired.wait_one_timeout(100),
                    Err(WaitSemaphoreTimeoutError::Timeout)
                );
                assert_eq!(timer.state(), Ok(TimerState::Dormant));

                // `reset` re-arms it
                timer.reset(0).unwrap();
                fired.wait_one_timeout(1000).unwrap();

                // `change_period` arms it with the new period
                assert_eq!(
                    timer.change_period(0, 0),
                    Err(ChangeTimerPeriodError::BadParam)
                );
                let start = kernel.tick_count();
                timer.change_period(60, 0).unwrap();
                fired.wait_one_timeout(1000).unwrap();
                assert!(kernel.tick_count() - start >= 60);
                assert_eq!(timer.period(), Ok(60));

                // A stop before the expiry cancels it
                timer.start(0).unwrap();
                timer.stop(0).unwrap();
                assert_matches!(
                    fired.wait_one_timeout(150),
                    Err(WaitSemaphoreTimeoutError::Timeout)
                );

                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
