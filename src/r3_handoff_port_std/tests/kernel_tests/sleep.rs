//! Delays a task and checks the tick count.
use r3_handoff::{KernelCfg, SleepError, Task};

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new().tick_rate_hz(500), |kernel| {
        // Not a task context
        assert_eq!(kernel.sleep(1), Err(SleepError::BadContext));
        assert_eq!(kernel.ms_to_ticks(1000), 500);

        Task::build()
            .name("Task1")
            .start(move || {
                let task = Task::current(kernel).unwrap();
                assert_eq!(task.name(), "Task1");

                kernel.sleep(0).unwrap();

                let start = kernel.tick_count();
                kernel.sleep(kernel.ms_to_ticks(40)).unwrap();
                let elapsed = kernel.tick_count() - start;
                assert!(elapsed >= 20, "{elapsed}");

                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
