//! Two consecutive signals with no intervening wait release only one wait.
use assert_matches::assert_matches;
use r3_handoff::{KernelCfg, Semaphore, Task, WaitSemaphoreTimeoutError};

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new(), |kernel| {
        let sem = Semaphore::new(kernel).unwrap();

        // Signaled twice before the scheduler starts
        sem.signal().unwrap();
        assert_eq!(sem.signal_from_isr(), Ok(false));

        Task::build()
            .name("Task1")
            .priority(1)
            .start(move || {
                assert_matches!(sem.wait_one_timeout(10), Ok(()));
                assert_matches!(
                    sem.wait_one_timeout(10),
                    Err(WaitSemaphoreTimeoutError::Timeout)
                );
                assert_eq!(sem.is_available(), Ok(false));

                sem.signal().unwrap();
                sem.signal().unwrap();
                sem.wait_one().unwrap();
                assert_eq!(sem.is_available(), Ok(false));

                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
