//! An auto-reload timer fires once per period, in the timer service task.
use r3_handoff::{
    KernelCfg, Task, Timer, TimerMode, TimerState, TIMER_SERVICE_TASK_NAME,
};
use r3_handoff_port_std::StdPort;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

static COUNTER: AtomicU64 = AtomicU64::new(0);

const PERIOD: u32 = 20;

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new(), |kernel| {
        let timer = Timer::build()
            .name("Periodic")
            .period(PERIOD)
            .mode(TimerMode::AutoReload)
            .callback(move |timer: Timer<StdPort>| {
                let task = Task::current(timer.kernel()).unwrap();
                assert_eq!(task.name(), TIMER_SERVICE_TASK_NAME);
                assert_eq!(timer.state(), Ok(TimerState::Running));

                // Already re-armed for the next period
                let now = timer.kernel().tick_count();
                let next = timer.expiry_tick().unwrap().unwrap();
                assert!(next > now, "{next} <= {now}");

                COUNTER.fetch_add(1, Ordering::Relaxed);
            })
            .finish(kernel)
            .unwrap();

        Task::build()
            .name("Task1")
            .priority(1)
            .start(move || {
                assert_eq!(timer.state(), Ok(TimerState::Dormant));
                timer.start(0).unwrap();
                kernel.sleep(PERIOD * 10 + PERIOD / 2).unwrap();

                let count = COUNTER.load(Ordering::Relaxed);
                log::debug!("count = {count}");
                assert!((9..=11).contains(&count), "{count}");
                assert_eq!(timer.state(), Ok(TimerState::Armed));
                assert_eq!(timer.is_active(), Ok(true));

                timer.stop(0).unwrap();
                kernel.sleep(PERIOD).unwrap();
                assert_eq!(timer.state(), Ok(TimerState::Dormant));
                assert_eq!(timer.expiry_tick(), Ok(None));

                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
