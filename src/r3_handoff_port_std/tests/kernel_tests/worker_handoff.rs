//! The timer → semaphore → worker hand-off at a shortened period. The timer
//! stops itself after its threshold and the worker's acquisitions keep up
//! with the timer.
use r3_handoff::{
    KernelCfg, Port, Semaphore, Task, Timer, TimerMode, TimerState, Worker, IDLE_PRIORITY,
};
use r3_handoff_port_std::StdPort;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

static EXPIRIES: AtomicU64 = AtomicU64::new(0);

const TIMER_ID: usize = 1;
const PERIOD: u32 = 20;
const THRESHOLD: u64 = 10;

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new(), |kernel| {
        let sem = Semaphore::new(kernel).unwrap();

        let worker = Worker::build()
            .semaphore(sem)
            .poll_timeout(10)
            .priority(IDLE_PRIORITY)
            .finish(kernel)
            .unwrap();

        let timer = Timer::build()
            .name("Timer")
            .period(PERIOD)
            .mode(TimerMode::AutoReload)
            .id(TIMER_ID)
            .callback(move |timer: Timer<StdPort>| {
                assert_eq!(timer.id(), Ok(TIMER_ID));

                let woken = sem.signal_from_isr().unwrap();
                timer.kernel().port().yield_request(woken);

                if EXPIRIES.fetch_add(1, Ordering::Relaxed) + 1 > THRESHOLD {
                    timer.stop_from_isr().unwrap();
                }
            })
            .finish(kernel)
            .unwrap();
        timer.start(0).unwrap();

        Task::build()
            .name("Checker")
            .priority(1)
            .start(move || {
                while timer.is_active() != Ok(false) || EXPIRIES.load(Ordering::Relaxed) == 0 {
                    kernel.sleep(PERIOD).unwrap();
                }
                kernel.sleep(PERIOD * 3).unwrap();

                let expiries = EXPIRIES.load(Ordering::Relaxed);
                let stats = worker.stats();
                log::debug!("expiries = {expiries}, {stats:?}");

                assert_eq!(expiries, THRESHOLD + 1);
                assert_eq!(timer.state(), Ok(TimerState::Dormant));
                assert!(stats.acquisitions >= THRESHOLD - 1, "{stats:?}");
                assert!(stats.acquisitions <= expiries, "{stats:?}");
                assert!(stats.iterations > stats.acquisitions, "{stats:?}");

                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
