//! Bounded buffer queue between pipeline stages.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::video::Buffer;

/// Default soft cap per inter-stage boundary.
pub const DEFAULT_LIMIT: usize = 8;

/// Bound on the internal dequeue wait so stage `execute` stays bounded.
const DEFAULT_WAIT: Duration = Duration::from_millis(50);

/// Bounded FIFO of buffers between two pipeline stages.
///
/// Overflow sheds the **oldest** entry and hands it back to its
/// producer: for live video a delayed frame is worse than a missing
/// one. Dequeues block with a short internal timeout so a stopping
/// executor is never stuck on an empty queue.
pub struct BufferQueue {
    inner: Mutex<VecDeque<Arc<Buffer>>>,
    filled: Condvar,
    limit: usize,
}

impl BufferQueue {
    /// Queue with the default soft cap of [`DEFAULT_LIMIT`].
    pub fn new() -> Arc<Self> {
        Self::with_limit(DEFAULT_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(limit)),
            filled: Condvar::new(),
            limit,
        })
    }

    /// Enqueue a buffer, shedding (and releasing) the oldest entry when
    /// the soft cap is reached. Wakes one waiter.
    pub fn push(&self, buffer: Arc<Buffer>) {
        let dropped = {
            let mut queue = self.inner.lock();
            let dropped = if queue.len() == self.limit {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(buffer);
            dropped
        };

        if let Some(dropped) = dropped {
            tracing::trace!(limit = self.limit, "queue full, shedding oldest buffer");
            dropped.release();
        }

        self.filled.notify_one();
    }

    /// Dequeue the front buffer, waiting up to the internal timeout for
    /// one to arrive. `None` means the wait elapsed with nothing queued.
    pub fn next(&self) -> Option<Arc<Buffer>> {
        self.next_timeout(DEFAULT_WAIT)
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<Arc<Buffer>> {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            self.filled.wait_for(&mut queue, timeout);
        }
        queue.pop_front()
    }

    /// Non-blocking dequeue.
    pub fn pop(&self) -> Option<Arc<Buffer>> {
        self.inner.lock().pop_front()
    }

    /// Wait until at least one buffer is queued. Returns whether the
    /// queue is non-empty after the wait.
    pub fn wait_to_be_filled(&self) -> bool {
        self.wait_to_be_filled_timeout(DEFAULT_WAIT)
    }

    pub fn wait_to_be_filled_timeout(&self, timeout: Duration) -> bool {
        let mut queue = self.inner.lock();
        if queue.is_empty() {
            self.filled.wait_for(&mut queue, timeout);
        }
        !queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::buffer::BufferDelegate;
    use std::sync::Weak;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct ReleaseCounter {
        released: AtomicUsize,
    }

    impl ReleaseCounter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                released: AtomicUsize::new(0),
            })
        }
    }

    impl BufferDelegate for ReleaseCounter {
        fn on_buffer_finished(&self, _buffer: &Buffer) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stamped(n: i64) -> Arc<Buffer> {
        Buffer::with_timestamp(vec![n as u8], n)
    }

    #[test]
    fn fifo_order() {
        let queue = BufferQueue::new();
        for n in 0..3 {
            queue.push(stamped(n));
        }
        for n in 0..3 {
            assert_eq!(queue.pop().unwrap().timestamp(), n);
        }
        assert!(queue.pop().is_none());
    }

    #[test]
    fn overflow_sheds_oldest_and_releases() {
        let counter = ReleaseCounter::new();
        let queue = BufferQueue::with_limit(8);

        for n in 0..20 {
            let buffer = stamped(n);
            buffer.set_delegate(Arc::downgrade(&counter) as Weak<dyn BufferDelegate>);
            queue.push(buffer);
        }

        // 20 pushed, cap 8: the 12 oldest were shed back to the
        // producer, the 8 newest remain observable in order.
        assert_eq!(counter.released.load(Ordering::SeqCst), 12);
        assert_eq!(queue.len(), 8);
        for n in 12..20 {
            assert_eq!(queue.pop().unwrap().timestamp(), n);
        }
    }

    #[test]
    fn suffix_is_min_of_count_and_cap() {
        for count in [1usize, 4, 8, 9, 17] {
            let queue = BufferQueue::with_limit(8);
            for n in 0..count {
                queue.push(stamped(n as i64));
            }
            assert_eq!(queue.len(), count.min(8));
        }
    }

    #[test]
    fn next_times_out_on_empty_queue() {
        let queue = BufferQueue::new();
        assert!(queue.next_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn next_wakes_on_push() {
        let queue = BufferQueue::new();
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.next_timeout(Duration::from_secs(2)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(stamped(42));
        let got = consumer.join().unwrap();
        assert_eq!(got.unwrap().timestamp(), 42);
    }

    #[test]
    fn wait_to_be_filled_reflects_state() {
        let queue = BufferQueue::new();
        assert!(!queue.wait_to_be_filled_timeout(Duration::from_millis(5)));
        queue.push(stamped(1));
        assert!(queue.wait_to_be_filled_timeout(Duration::from_millis(5)));
        // Waiting does not consume.
        assert_eq!(queue.len(), 1);
    }
}
