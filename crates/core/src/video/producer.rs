//! Capture-side buffer producer contract.

use std::sync::Arc;

use crate::error::Result;
use crate::video::{Buffer, DisplayOutput};

/// Produces display frames for the renderer to feed into the encoder.
///
/// The producer owns the underlying frame memory. Frames handed out via
/// [`current_buffer`](Self::current_buffer) reference that memory by
/// native handle; the producer is notified through the buffer's release
/// delegate once the encoder is done with a frame and may then reuse
/// the slot.
pub trait BufferProducer: Send + Sync {
    /// Prepare the capture source for the negotiated output.
    fn setup(&self, output: &DisplayOutput) -> Result<()>;

    /// Advance to the next frame. A producer whose slots are all still
    /// in flight leaves the current buffer unset.
    fn swap_buffers(&self);

    /// The frame produced by the latest swap, if any.
    fn current_buffer(&self) -> Option<Arc<Buffer>>;

    /// The output this producer was set up with.
    fn output_mode(&self) -> DisplayOutput;
}
