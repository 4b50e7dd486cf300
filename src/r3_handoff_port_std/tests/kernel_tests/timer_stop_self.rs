//! A timer stopped from within its own callback never fires again.
use r3_handoff::{KernelCfg, Port, Task, Timer, TimerMode, TimerState};
use r3_handoff_port_std::StdPort;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

static COUNTER: AtomicU64 = AtomicU64::new(0);

const PERIOD: u32 = 10;
const THRESHOLD: u64 = 3;

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new(), |kernel| {
        let timer = Timer::build()
            .period(PERIOD)
            .mode(TimerMode::AutoReload)
            .callback(|timer: Timer<StdPort>| {
                let count = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
                if count == THRESHOLD {
                    let woken = timer.stop_from_isr().unwrap();
                    timer.kernel().port().yield_request(woken);
                }
            })
            .finish(kernel)
            .unwrap();

        // Issued before the scheduler starts
        timer.start(0).unwrap();

        Task::build()
            .name("Task1")
            .priority(1)
            .start(move || {
                while COUNTER.load(Ordering::Relaxed) < THRESHOLD {
                    kernel.sleep(1).unwrap();
                }

                kernel.sleep(PERIOD * 5).unwrap();
                assert_eq!(COUNTER.load(Ordering::Relaxed), THRESHOLD);
                assert_eq!(timer.state(), Ok(TimerState::Dormant));

                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
