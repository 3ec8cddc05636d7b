//! H.264 encoder stage over an opaque codec backend.
//!
//! The codec pulls raw frames through [`FrameSource::read_frame`] from
//! this stage's input queue; each frame handed out is remembered in a
//! pairing table and its input buffer is released back to the producer
//! exactly once, when the codec returns the frame. The stage's
//! `execute` pulls one encoded output per iteration and dispatches it
//! through the [`EncoderDelegate`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::common::Executable;
use crate::error::{Error, Result};
use crate::video::encoder::{
    CodecFrame, CodecSource, Encoder, EncoderConfig, EncoderDelegate, FrameSource,
};
use crate::video::{Buffer, BufferQueue};

const ENCODER_THREAD_NAME: &str = "H264Encoder";

/// Bound on a single wait for input inside the codec's read callback.
const READ_FRAME_WAIT: Duration = Duration::from_millis(50);

const DEFAULT_BITRATE: u32 = 5_000_000;
const DEFAULT_FRAMERATE: u32 = 30;
const DEFAULT_I_FRAME_INTERVAL_SECS: u32 = 15;

/// Encoder stage wiring an opaque [`CodecSource`] into the pipeline.
pub struct H264Encoder {
    codec: Arc<dyn CodecSource>,
    config: Mutex<Option<EncoderConfig>>,
    running: AtomicBool,
    input_queue: Arc<BufferQueue>,
    delegate: Mutex<Option<Weak<dyn EncoderDelegate>>>,
    /// In-flight input buffers, keyed by the frame id handed to the
    /// codec. Holds the single owning reference until the codec
    /// returns the frame.
    pending: Mutex<HashMap<u64, Arc<Buffer>>>,
    next_frame_id: AtomicU64,
    weak_self: Weak<H264Encoder>,
}

impl H264Encoder {
    pub fn new(codec: Arc<dyn CodecSource>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            codec,
            config: Mutex::new(None),
            running: AtomicBool::new(false),
            input_queue: BufferQueue::new(),
            delegate: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            next_frame_id: AtomicU64::new(1),
            weak_self: weak_self.clone(),
        })
    }

    fn delegate(&self) -> Option<Arc<dyn EncoderDelegate>> {
        self.delegate.lock().as_ref().and_then(Weak::upgrade)
    }

    #[cfg(test)]
    pub(crate) fn pending_frames(&self) -> usize {
        self.pending.lock().len()
    }
}

impl FrameSource for H264Encoder {
    fn read_frame(&self) -> Result<CodecFrame> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::EncoderNotConnected);
        }

        loop {
            let Some(buffer) = self.input_queue.next_timeout(READ_FRAME_WAIT) else {
                if !self.running.load(Ordering::SeqCst) {
                    return Err(Error::EncoderEndOfStream);
                }
                continue;
            };

            let Some(handle) = buffer.native_handle() else {
                tracing::warn!("ignoring input buffer without native handle");
                continue;
            };

            let frame_id = self.next_frame_id.fetch_add(1, Ordering::Relaxed);
            let timestamp_us = buffer.timestamp();
            self.pending.lock().insert(frame_id, buffer);

            return Ok(CodecFrame {
                frame_id,
                handle,
                timestamp_us,
            });
        }
    }

    fn frame_returned(&self, frame_id: u64) {
        let buffer = self.pending.lock().remove(&frame_id);
        match buffer {
            Some(buffer) => buffer.release(),
            None => tracing::warn!(frame_id, "codec returned a frame we don't remember"),
        }
    }
}

impl Encoder for H264Encoder {
    fn default_configuration(&self) -> EncoderConfig {
        EncoderConfig {
            width: 0,
            height: 0,
            framerate: DEFAULT_FRAMERATE,
            bitrate: DEFAULT_BITRATE,
            profile_idc: 0,
            level_idc: 0,
            constraint_set: 0,
            i_frame_interval_secs: DEFAULT_I_FRAME_INTERVAL_SECS,
            intra_refresh_mbs: 0,
        }
    }

    fn configure(&self, mut config: EncoderConfig) -> Result<()> {
        let mut current = self.config.lock();
        if current.is_some() {
            return Err(Error::ConfigureRejected("encoder is already configured"));
        }
        if config.width == 0 || config.height == 0 || config.framerate == 0 {
            return Err(Error::ConfigureRejected("invalid encoder dimensions"));
        }

        if config.intra_refresh_mbs == 0 {
            config.intra_refresh_mbs =
                EncoderConfig::cyclic_intra_refresh_mbs(config.width, config.height);
        }

        tracing::debug!(
            width = config.width,
            height = config.height,
            framerate = config.framerate,
            bitrate = config.bitrate,
            "configuring encoder"
        );

        self.codec
            .configure(&config, self.weak_self.clone() as Weak<dyn FrameSource>)?;

        *current = Some(config);
        Ok(())
    }

    fn configuration(&self) -> Option<EncoderConfig> {
        self.config.lock().clone()
    }

    fn queue_buffer(&self, buffer: Arc<Buffer>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if !buffer.is_valid() {
            tracing::warn!("dropping invalid input buffer");
            return;
        }
        self.input_queue.push(buffer);
    }

    fn set_delegate(&self, delegate: Weak<dyn EncoderDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    fn send_idr_frame(&self) {
        self.codec.request_idr_frame();
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Executable for H264Encoder {
    fn name(&self) -> &'static str {
        ENCODER_THREAD_NAME
    }

    fn start(&self) -> Result<()> {
        if self.config.lock().is_none() {
            return Err(Error::ConfigureRejected("encoder is not configured"));
        }
        // The codec may call read_frame directly from start, so the
        // running flag has to be up before the codec is.
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        if let Err(e) = self.codec.start() {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    fn execute(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            tracing::error!("tried to execute encoder while not started");
            return false;
        }

        match self.codec.read_output() {
            Ok(output) => {
                let buffer = Buffer::with_timestamp(output.data, output.timestamp_us);
                if let Some(delegate) = self.delegate() {
                    if output.codec_config {
                        delegate.on_buffer_with_codec_config(buffer);
                    } else {
                        delegate.on_buffer_available(buffer);
                    }
                }
                true
            }
            Err(Error::EncoderEndOfStream) => {
                tracing::info!("encoder reached end of stream");
                false
            }
            Err(Error::EncoderNotConnected) => {
                tracing::warn!("encoder source disconnected");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read encoded output");
                false
            }
        }
    }

    fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(Error::NotRunning);
        }
        self.codec.stop()
    }
}
