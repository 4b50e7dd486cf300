//! Races interrupt-side signals against a waiter that blocks with short
//! timeouts. No signal delivered to a blocked waiter is lost, and the waiter
//! never takes more units than were signaled.
use r3_handoff::{KernelCfg, Semaphore, Task};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Duration,
};

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

static SIGNALS: AtomicU64 = AtomicU64::new(0);

const HANDOFF_ROUNDS: u64 = 200;
const FREE_RUN_ROUNDS: u64 = 300;

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new(), |kernel| {
        let sem = Semaphore::new(kernel).unwrap();

        Task::build()
            .name("Waiter")
            .priority(1)
            .start(move || {
                // Lockstep: each signal races the waiter's transition into
                // the blocked state, with a varying delay on the interrupt
                // side. Every round must end in an acquisition.
                for i in 0..HANDOFF_ROUNDS {
                    assert!(kernel.port().pend_interrupt(move || {
                        thread::sleep(Duration::from_micros(i % 5 * 20));
                        sem.signal_from_isr().unwrap();
                    }));

                    let mut timeouts = 0;
                    while sem.wait_one_timeout(2).is_err() {
                        timeouts += 1;
                        assert!(timeouts < 500, "signal {i} was lost");
                    }
                }
                assert_eq!(sem.is_available(), Ok(false));

                // Free-running: signals arrive independently of the waiter
                for _ in 0..FREE_RUN_ROUNDS {
                    assert!(kernel.port().pend_interrupt(move || {
                        SIGNALS.fetch_add(1, Ordering::Relaxed);
                        sem.signal_from_isr().unwrap();
                    }));
                }

                let mut acquisitions = 0;
                let mut idle_passes = 0;
                while idle_passes < 20 {
                    if sem.wait_one_timeout(1).is_ok() {
                        acquisitions += 1;
                        idle_passes = 0;
                    } else {
                        idle_passes += 1;
                    }
                }

                let signals = SIGNALS.load(Ordering::Relaxed);
                log::debug!("{acquisitions} acquisitions for {signals} signals");
                assert_eq!(signals, FREE_RUN_ROUNDS);
                assert!(acquisitions >= 1);
                assert!(acquisitions <= signals, "{acquisitions} > {signals}");
                assert_eq!(sem.is_available(), Ok(false));

                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
