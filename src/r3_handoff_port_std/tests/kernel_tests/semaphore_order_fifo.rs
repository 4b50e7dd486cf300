//! Waiting tasks are released in the order they started waiting, one per
//! signal.
use r3_handoff::{KernelCfg, Semaphore, Task};
use spin::Mutex as SpinMutex;

use crate::KernelTestUtil;

static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();

static SEQ: SpinMutex<Vec<&'static str>> = SpinMutex::new(Vec::new());

#[test]
fn run() {
    TEST_UTIL.run(KernelCfg::new(), |kernel| {
        let sem = Semaphore::new(kernel).unwrap();

        // Each waiter starts waiting `delay` ticks after boot
        for (name, delay) in [("A", 0), ("B", 20), ("C", 40)] {
            Task::build()
                .name(name)
                .priority(1)
                .start(move || {
                    kernel.sleep(delay + 1).unwrap();
                    sem.wait_one().unwrap();
                    SEQ.lock().push(name);
                })
                .finish(kernel)
                .unwrap();
        }

        Task::build()
            .name("Signaler")
            .priority(1)
            .start(move || {
                kernel.sleep(100).unwrap();

                for expected_len in 1..=3 {
                    sem.signal().unwrap();
                    kernel.sleep(20).unwrap();
                    assert_eq!(SEQ.lock().len(), expected_len);
                }

                assert_eq!(*SEQ.lock(), ["A", "B", "C"]);
                assert_eq!(sem.is_available(), Ok(false));
                TEST_UTIL.success(kernel);
            })
            .finish(kernel)
            .unwrap();
    });
}
