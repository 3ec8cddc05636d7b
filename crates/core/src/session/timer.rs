//! One-shot cancellable deferred call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Runs a closure once after a delay, unless cancelled first.
///
/// Used for the deferred pipeline start on PLAY and for protocol
/// keep-alive timeouts. Dropping the handle does not cancel; call
/// [`cancel`](Self::cancel) explicitly.
pub struct DelayedCall {
    cancelled: Arc<AtomicBool>,
}

impl DelayedCall {
    pub fn schedule<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        thread::spawn(move || {
            thread::sleep(delay);
            if !flag.load(Ordering::SeqCst) {
                f();
            }
        });

        Self { cancelled }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let observer = fired.clone();
        let _call = DelayedCall::schedule(Duration::from_millis(10), move || {
            observer.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_before_delay_suppresses_call() {
        let fired = Arc::new(AtomicUsize::new(0));
        let observer = fired.clone();
        let call = DelayedCall::schedule(Duration::from_millis(50), move || {
            observer.fetch_add(1, Ordering::SeqCst);
        });
        call.cancel();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
