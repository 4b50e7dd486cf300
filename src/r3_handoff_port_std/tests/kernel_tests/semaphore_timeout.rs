//! Waits on an empty semaphore with a timeout.
use assert_matches::assert_matches;
use r3_handoff::{
    KernelCfg, PollSemaphoreError, Semaphore, Task, WaitSemaphoreTimeoutError,
};

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new(), |kernel| {
        let sem = Semaphore::new(kernel).unwrap();

        Task::build()
            .name("Task1")
            .priority(1)
            .start(move || {
                assert_matches!(sem.poll_one(), Err(PollSemaphoreError::Timeout));
                assert_matches!(
                    sem.wait_one_timeout(0),
                    Err(WaitSemaphoreTimeoutError::Timeout)
                );

                let start = kernel.tick_count();
                assert_matches!(
                    sem.wait_one_timeout(10),
                    Err(WaitSemaphoreTimeoutError::Timeout)
                );
                let elapsed = kernel.tick_count() - start;
                log::debug!("timed out after {elapsed} ticks");
                assert!((10..1000).contains(&elapsed), "{elapsed}");

                // A timed-out wait leaves nothing behind
                sem.signal().unwrap();
                assert_matches!(sem.wait_one_timeout(10), Ok(()));

                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
