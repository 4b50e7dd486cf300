//! A timer signals a binary semaphore once a second and a worker task takes
//! the signals. After ten seconds the timer stops itself and the program
//! reports whether the worker kept up.
use r3_handoff::{
    Kernel, KernelCfg, Port, Semaphore, Timer, TimerMode, Worker, IDLE_PRIORITY,
};
use r3_handoff_port_std::StdPort;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

type System = Kernel<StdPort>;

const TIMER_ID: usize = 1;
const TIMER_PERIOD_MS: u32 = 1000;
const WORKER_POLL_TIMEOUT: u32 = 10;
const STOP_THRESHOLD: u64 = 10;
const MIN_ACQUISITIONS: u64 = 9;

static EXPIRIES: AtomicU64 = AtomicU64::new(0);
static FAILED: AtomicBool = AtomicBool::new(false);

fn main() {
    r3_handoff_port_std::init_logger("info");

    let kernel: &'static System = match Kernel::new(StdPort::new(), KernelCfg::new()) {
        Ok(kernel) => kernel,
        Err(e) => {
            log::error!("invalid kernel configuration: {e:?}");
            std::process::exit(1);
        }
    };

    if let Err(e) = setup(kernel) {
        log::error!("setup failed: {e}");
        std::process::exit(1);
    }

    if let Err(e) = kernel.start_scheduler() {
        log::error!("could not start the scheduler: {e:?}");
        std::process::exit(1);
    }

    if FAILED.load(Ordering::Relaxed) {
        std::process::exit(1);
    }
}

fn setup(kernel: &'static System) -> Result<(), String> {
    let sem = Semaphore::new(kernel).map_err(|e| format!("semaphore: {e:?}"))?;

    let worker = Worker::build()
        .semaphore(sem)
        .poll_timeout(WORKER_POLL_TIMEOUT)
        .priority(IDLE_PRIORITY)
        .finish(kernel)
        .map_err(|e| format!("worker: {e:?}"))?;

    let timer = Timer::build()
        .name("Timer")
        .period(kernel.ms_to_ticks(TIMER_PERIOD_MS))
        .mode(TimerMode::AutoReload)
        .id(TIMER_ID)
        .callback(move |timer: Timer<StdPort>| timer_callback(timer, sem, &worker))
        .finish(kernel)
        .map_err(|e| format!("timer: {e:?}"))?;

    timer.start(0).map_err(|e| format!("timer start: {e:?}"))?;

    Ok(())
}

fn timer_callback(timer: Timer<StdPort>, sem: Semaphore<StdPort>, worker: &Worker<StdPort>) {
    let kernel = timer.kernel();

    match timer.id() {
        Ok(TIMER_ID) => {}
        other => {
            log::error!("timer id mismatch: {other:?}");
            finish(kernel, false);
            return;
        }
    }

    match sem.signal_from_isr() {
        Ok(woken) => kernel.port().yield_request(woken),
        Err(e) => log::error!("signal failed: {e:?}"),
    }

    if EXPIRIES.fetch_add(1, Ordering::Relaxed) + 1 > STOP_THRESHOLD {
        if let Err(e) = timer.stop_from_isr() {
            log::error!("could not stop the timer: {e:?}");
        }
        log::info!("Stop timer after 10s");

        let stats = worker.stats();
        log::info!("{stats:?}");
        finish(kernel, stats.acquisitions >= MIN_ACQUISITIONS);
    }
}

fn finish(kernel: &'static System, passed: bool) {
    if passed {
        log::info!("PASSED");
    } else {
        log::error!("FAILED");
        FAILED.store(true, Ordering::Relaxed);
    }
    kernel.port().shutdown();
}
