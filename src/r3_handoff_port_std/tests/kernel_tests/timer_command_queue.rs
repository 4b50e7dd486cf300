//! Deferred function calls run in the timer service task in submission
//! order. A full command queue rejects or blocks submitters.
use assert_matches::assert_matches;
use r3_handoff::{
    KernelCfg, Semaphore, Task, TimerCommandError, TIMER_SERVICE_TASK_NAME, WAIT_FOREVER,
};
use spin::Mutex as SpinMutex;

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

static SEQ: SpinMutex<Vec<u32>> = SpinMutex::new(Vec::new());

fn record(kernel: &'static crate::System, i: u32) {
    let task = Task::current(kernel).unwrap();
    assert_eq!(task.name(), TIMER_SERVICE_TASK_NAME);
    SEQ.lock().push(i);
}

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new().timer_queue_length(2), |kernel| {
        let gate = Semaphore::new(kernel).unwrap();
        let isr_done = Semaphore::new(kernel).unwrap();
        let all_done = Semaphore::new(kernel).unwrap();

        Task::build()
            .name("Task1")
            .priority(1)
            .start(move || {
                // Occupy the service task until `gate` is signaled
                kernel
                    .pend_function_call(
                        move || {
                            record(kernel, 1);
                            gate.wait_one().unwrap();
                        },
                        0,
                    )
                    .unwrap();
                kernel.sleep(10).unwrap();

                // Fill the queue
                kernel.pend_function_call(move || record(kernel, 2), 0).unwrap();
                kernel.pend_function_call(move || record(kernel, 3), 0).unwrap();

                assert_matches!(
                    kernel.pend_function_call(move || record(kernel, 4), 0),
                    Err(TimerCommandError::Timeout)
                );

                assert!(kernel.port().pend_interrupt(move || {
                    assert_matches!(
                        kernel.pend_function_call_from_isr(move || record(kernel, 4)),
                        Err(TimerCommandError::QueueOverflow)
                    );
                    isr_done.signal_from_isr().unwrap();
                }));
                isr_done.wait_one_timeout(1000).unwrap();

                let start = kernel.tick_count();
                assert_matches!(
                    kernel.pend_function_call(move || record(kernel, 4), 5),
                    Err(TimerCommandError::Timeout)
                );
                assert!(kernel.tick_count() - start >= 5);

                // Blocks until `Task2` opens the gate
                kernel
                    .pend_function_call(
                        move || {
                            record(kernel, 5);
                            all_done.signal().unwrap();
                        },
                        WAIT_FOREVER,
                    )
                    .unwrap();

                all_done.wait_one_timeout(1000).unwrap();
                assert_eq!(*SEQ.lock(), [1, 2, 3, 5]);

                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();

        Task::build()
            .name("Task2")
            .start(move || {
                kernel.sleep(200).unwrap();
                gate.signal().unwrap();
            })
            .finish(kernel)
            .unwrap();
    });
}
