//! Signals a semaphore from an interrupt handler to release a waiting task.
use assert_matches::assert_matches;
use r3_handoff::{
    KernelCfg, Port, Semaphore, SignalSemaphoreError, Task, TimerCommandError,
    WaitSemaphoreError, WAIT_FOREVER,
};

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new(), |kernel| {
        let sem = Semaphore::new(kernel).unwrap();
        let done = Semaphore::new(kernel).unwrap();

        Task::build()
            .name("Task1")
            .priority(1)
            .start(move || {
                assert!(kernel.port().pend_interrupt(move || {
                    assert!(kernel.port().is_interrupt_context());

                    // Blocking operations are rejected here
                    assert_matches!(sem.wait_one(), Err(WaitSemaphoreError::BadContext));
                    assert_matches!(sem.signal(), Err(SignalSemaphoreError::BadContext));
                    assert_matches!(
                        kernel.pend_function_call(|| {}, WAIT_FOREVER),
                        Err(TimerCommandError::BadContext)
                    );

                    let woken = sem.signal_from_isr().unwrap();
                    kernel.port().yield_request(woken);
                }));

                sem.wait_one().unwrap();
                assert_eq!(sem.is_available(), Ok(false));
                done.signal().unwrap();
            })
            .finish(kernel)
            .unwrap();

        Task::build()
            .name("Task2")
            .priority(0)
            .start(move || {
                assert_matches!(done.wait_one_timeout(1000), Ok(()));
                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
