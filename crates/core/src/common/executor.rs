//! Worker-thread executor for a single [`Executable`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::common::Executable;
use crate::error::{Error, Result};

/// Drives one [`Executable`] on a dedicated worker thread.
///
/// `start` invokes `Executable::start` once and then spawns a thread
/// (named after the executable) that loops `Executable::execute` until
/// it returns `false` or [`stop`](Self::stop) clears the running flag.
/// `stop` clears the flag, calls `Executable::stop` so any wait inside
/// a final `execute` unblocks, and then joins the worker.
pub struct ThreadedExecutor {
    executable: Arc<dyn Executable>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedExecutor {
    pub fn new(executable: Arc<dyn Executable>) -> Self {
        Self {
            executable,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        if let Err(e) = self.executable.start() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let executable = self.executable.clone();
        let running = self.running.clone();
        let name = executable.name();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                tracing::debug!(stage = name, "worker started");
                while running.load(Ordering::SeqCst) {
                    if !executable.execute() {
                        tracing::debug!(stage = name, "stage surrendered");
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                }
                tracing::debug!(stage = name, "worker exited");
            })?;

        *self.worker.lock() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);

        // Stopping the executable before the join unblocks a worker
        // that is waiting inside its final execute (e.g. the encoder
        // blocked on its input queue).
        let result = self.executable.stop();

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::warn!(stage = self.executable.name(), "worker panicked");
            }
        }

        result
    }

    /// Whether the worker loop is still alive. Turns `false` once the
    /// executable surrenders or `stop` is called.
    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct CountedStage {
        iterations: AtomicU32,
        limit: u32,
        started: AtomicBool,
        stopped: AtomicBool,
    }

    impl CountedStage {
        fn new(limit: u32) -> Self {
            Self {
                iterations: AtomicU32::new(0),
                limit,
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }
        }
    }

    impl Executable for CountedStage {
        fn name(&self) -> &'static str {
            "CountedStage"
        }

        fn start(&self) -> Result<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn execute(&self) -> bool {
            let n = self.iterations.fetch_add(1, Ordering::SeqCst) + 1;
            thread::sleep(Duration::from_millis(1));
            n < self.limit
        }

        fn stop(&self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn runs_until_executable_surrenders() {
        let stage = Arc::new(CountedStage::new(5));
        let executor = ThreadedExecutor::new(stage.clone());
        executor.start().unwrap();

        // The stage surrenders after 5 iterations.
        for _ in 0..100 {
            if !executor.running() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!executor.running());
        assert_eq!(stage.iterations.load(Ordering::SeqCst), 5);

        executor.stop().unwrap();
        assert!(stage.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_interrupts_long_running_stage() {
        let stage = Arc::new(CountedStage::new(u32::MAX));
        let executor = ThreadedExecutor::new(stage.clone());
        executor.start().unwrap();
        assert!(executor.running());

        executor.stop().unwrap();
        assert!(!executor.running());
        assert!(stage.stopped.load(Ordering::SeqCst));
    }

    #[test]
    fn double_start_is_rejected() {
        let stage = Arc::new(CountedStage::new(u32::MAX));
        let executor = ThreadedExecutor::new(stage.clone());
        executor.start().unwrap();
        assert!(matches!(executor.start(), Err(Error::AlreadyRunning)));
        executor.stop().unwrap();
    }
}
