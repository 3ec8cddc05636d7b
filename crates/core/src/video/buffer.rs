//! Shared frame/packet buffer with an at-most-once release protocol.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::common::TimestampUs;

/// Opaque token for producer-owned frame memory (GL texture, gralloc
/// handle, …). The producer maps tokens back to its own slots.
pub type NativeHandle = u64;

/// Notified once when the last consumer is done with a buffer.
///
/// Producers implement this to recycle the underlying slot.
pub trait BufferDelegate: Send + Sync {
    fn on_buffer_finished(&self, buffer: &Buffer);
}

/// Unit of data flowing through the pipeline.
///
/// Backed either by owned bytes (encoder output, TS batches) or by an
/// opaque [`NativeHandle`] into producer-owned memory (capture frames).
/// Buffers are shared via `Arc` while in transit; the consumer that
/// finishes with a buffer calls [`release`](Self::release), which fires
/// the delegate **at most once** no matter how many clones exist.
pub struct Buffer {
    data: Vec<u8>,
    native_handle: Option<NativeHandle>,
    timestamp_us: AtomicI64,
    delegate: Mutex<Option<Weak<dyn BufferDelegate>>>,
}

impl Buffer {
    /// A buffer owning `data`, timestamp zero.
    pub fn from_vec(data: Vec<u8>) -> Arc<Self> {
        Self::with_timestamp(data, 0)
    }

    /// A buffer owning `data` with an explicit timestamp.
    pub fn with_timestamp(data: Vec<u8>, timestamp_us: TimestampUs) -> Arc<Self> {
        Arc::new(Self {
            data,
            native_handle: None,
            timestamp_us: AtomicI64::new(timestamp_us),
            delegate: Mutex::new(None),
        })
    }

    /// A buffer referencing producer-owned memory by handle.
    pub fn from_native_handle(handle: NativeHandle) -> Arc<Self> {
        Arc::new(Self {
            data: Vec::new(),
            native_handle: Some(handle),
            timestamp_us: AtomicI64::new(0),
            delegate: Mutex::new(None),
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A buffer is valid when it carries bytes or a native handle.
    /// The pipeline never forwards invalid buffers.
    pub fn is_valid(&self) -> bool {
        !self.data.is_empty() || self.native_handle.is_some()
    }

    pub fn native_handle(&self) -> Option<NativeHandle> {
        self.native_handle
    }

    /// Timestamp in microseconds on the shared monotonic clock.
    pub fn timestamp(&self) -> TimestampUs {
        self.timestamp_us.load(Ordering::Acquire)
    }

    pub fn set_timestamp(&self, timestamp_us: TimestampUs) {
        self.timestamp_us.store(timestamp_us, Ordering::Release);
    }

    pub fn set_delegate(&self, delegate: Weak<dyn BufferDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    /// Hand the buffer back to its producer.
    ///
    /// The delegate fires at most once; further calls (or clones
    /// releasing concurrently) are no-ops.
    pub fn release(&self) {
        let delegate = self.delegate.lock().take();
        if let Some(delegate) = delegate
            && let Some(delegate) = delegate.upgrade()
        {
            delegate.on_buffer_finished(self);
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.data.len())
            .field("native_handle", &self.native_handle)
            .field("timestamp_us", &self.timestamp())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingDelegate {
        finished: AtomicUsize,
    }

    impl BufferDelegate for CountingDelegate {
        fn on_buffer_finished(&self, _buffer: &Buffer) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn release_fires_delegate_once() {
        let delegate = Arc::new(CountingDelegate {
            finished: AtomicUsize::new(0),
        });
        let buffer = Buffer::from_native_handle(7);
        buffer.set_delegate(Arc::downgrade(&delegate) as Weak<dyn BufferDelegate>);

        buffer.release();
        buffer.release();
        assert_eq!(delegate.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_without_delegate_is_noop() {
        let buffer = Buffer::from_vec(vec![1, 2, 3]);
        buffer.release();
    }

    #[test]
    fn release_after_delegate_dropped_is_noop() {
        let buffer = Buffer::from_native_handle(1);
        {
            let delegate = Arc::new(CountingDelegate {
                finished: AtomicUsize::new(0),
            });
            buffer.set_delegate(Arc::downgrade(&delegate) as Weak<dyn BufferDelegate>);
        }
        buffer.release();
    }

    #[test]
    fn validity() {
        assert!(Buffer::from_vec(vec![0]).is_valid());
        assert!(Buffer::from_native_handle(0).is_valid());
        assert!(!Buffer::from_vec(Vec::new()).is_valid());
    }

    #[test]
    fn timestamp_roundtrip() {
        let buffer = Buffer::from_vec(vec![0]);
        buffer.set_timestamp(123_456);
        assert_eq!(buffer.timestamp(), 123_456);
    }
}
