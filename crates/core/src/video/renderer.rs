//! Capture pacing stage: feeds producer frames to the encoder at the
//! negotiated framerate.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::Duration;

use crate::common::{Executable, now_us};
use crate::error::{Error, Result};
use crate::video::Encoder;
use crate::video::producer::BufferProducer;

const RENDERER_THREAD_NAME: &str = "StreamRenderer";

/// Paces the buffer producer and hands each frame to the encoder's
/// input queue.
///
/// Each `execute` swaps the producer, stamps the current frame with the
/// capture time, queues it, and sleeps until the next frame deadline.
/// The deadline advances by the frame interval rather than from "now",
/// so capture does not drift when an iteration runs long.
pub struct StreamRenderer {
    producer: Arc<dyn BufferProducer>,
    encoder: Arc<dyn Encoder>,
    /// Next frame deadline in µs; 0 until the first iteration.
    next_frame_us: AtomicI64,
}

impl StreamRenderer {
    pub fn new(producer: Arc<dyn BufferProducer>, encoder: Arc<dyn Encoder>) -> Arc<Self> {
        Arc::new(Self {
            producer,
            encoder,
            next_frame_us: AtomicI64::new(0),
        })
    }

    fn frame_interval_us(&self) -> i64 {
        let framerate = self
            .encoder
            .configuration()
            .map(|config| config.framerate)
            .unwrap_or(30)
            .max(1);
        1_000_000 / framerate as i64
    }
}

impl Executable for StreamRenderer {
    fn name(&self) -> &'static str {
        RENDERER_THREAD_NAME
    }

    fn start(&self) -> Result<()> {
        if self.encoder.configuration().is_none() {
            return Err(Error::ConfigureRejected("encoder is not configured"));
        }
        self.next_frame_us.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn execute(&self) -> bool {
        let interval = self.frame_interval_us();

        self.producer.swap_buffers();
        match self.producer.current_buffer() {
            Some(buffer) => {
                buffer.set_timestamp(now_us());
                self.encoder.queue_buffer(buffer);
            }
            // All producer slots still in flight; skip this frame.
            None => tracing::trace!("no current buffer, skipping iteration"),
        }

        let now = now_us();
        let mut deadline = self.next_frame_us.load(Ordering::SeqCst);
        if deadline == 0 {
            deadline = now;
        }
        deadline += interval;
        if deadline < now {
            deadline = now;
        }
        self.next_frame_us.store(deadline, Ordering::SeqCst);

        let remaining = deadline - now;
        if remaining > 0 {
            thread::sleep(Duration::from_micros(remaining as u64));
        }

        true
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}
