//! When the timer service task is held up for many periods, an auto-reload
//! timer fires once for the whole delay and is re-armed one period after
//! that pass. Missed periods are skipped, not made up.
use r3_handoff::{KernelCfg, Task, Timer, TimerMode};
use r3_handoff_port_std::StdPort;
use spin::Mutex as SpinMutex;

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

/// The tick snapshot of each expiry pass that fired the timer.
static FIRED_AT: SpinMutex<Vec<u64>> = SpinMutex::new(Vec::new());

const PERIOD: u32 = 5;
const STALL: u32 = 60;

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new(), |kernel| {
        let timer = Timer::build()
            .name("Fast")
            .period(PERIOD)
            .mode(TimerMode::AutoReload)
            .callback(move |timer: Timer<StdPort>| {
                // Re-armed for `pass + PERIOD` before this call
                let next = timer.expiry_tick().unwrap().unwrap();
                FIRED_AT.lock().push(next - u64::from(PERIOD));
            })
            .finish(kernel)
            .unwrap();

        Task::build()
            .name("Task1")
            .priority(1)
            .start(move || {
                timer.start(0).unwrap();
                kernel.sleep(PERIOD * 3).unwrap();

                // Hold up the service task
                kernel
                    .pend_function_call(move || kernel.sleep(STALL).unwrap(), 0)
                    .unwrap();

                kernel.sleep(STALL + PERIOD * 6).unwrap();
                timer.stop(0).unwrap();
                kernel.sleep(PERIOD * 2).unwrap();

                let fired_at = FIRED_AT.lock().clone();
                log::debug!("fired at {fired_at:?}");

                for pair in fired_at.windows(2) {
                    assert!(
                        pair[1] - pair[0] >= u64::from(PERIOD),
                        "caught up on missed periods: {fired_at:?}"
                    );
                }

                // The stall shows up as one long gap
                let longest_gap = fired_at
                    .windows(2)
                    .map(|pair| pair[1] - pair[0])
                    .max()
                    .unwrap_or(0);
                assert!(
                    longest_gap >= u64::from(STALL - PERIOD),
                    "{fired_at:?}"
                );

                // Firing resumed after the stall
                let last = *fired_at.last().unwrap();
                let first = fired_at[0];
                assert!(last - first >= u64::from(STALL + PERIOD), "{fired_at:?}");

                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
