//! Software capture/codec flavor for development and tests.
//!
//! Stands in for the platform backends: the producer hands out
//! double-buffered native-handle frames, and the codec synthesizes an
//! H.264-shaped bitstream (SPS/PPS config once, then Annex-B access
//! units) without touching real pixels. Selected by
//! `AETHERCAST_SOURCE_TYPE=test`, which is also the default flavor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::video::buffer::BufferDelegate;
use crate::video::encoder::{CodecOutput, CodecSource, EncoderConfig, FrameSource};
use crate::video::producer::BufferProducer;
use crate::video::{Buffer, DisplayMode, DisplayOutput, NativeHandle};

/// Producer slots; matches the double buffering of the capture path.
const NUM_SLOTS: u64 = 2;

/// Synthetic access-unit payload size.
const AU_PAYLOAD_LEN: usize = 512;

/// Double-buffered producer handing out native-handle frames.
///
/// A slot stays unavailable until the encoder releases its buffer, so
/// back-pressure from a slow encoder shows up as skipped swaps exactly
/// like it does with a real capture source.
pub struct TestBufferProducer {
    output: Mutex<DisplayOutput>,
    free_slots: Mutex<VecDeque<NativeHandle>>,
    current: Mutex<Option<Arc<Buffer>>>,
    weak_self: Weak<TestBufferProducer>,
}

impl TestBufferProducer {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            output: Mutex::new(DisplayOutput::new(DisplayMode::Extend, 0, 0, 0)),
            free_slots: Mutex::new((0..NUM_SLOTS).collect()),
            current: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }
}

impl BufferProducer for TestBufferProducer {
    fn setup(&self, output: &DisplayOutput) -> Result<()> {
        if output.width == 0 || output.height == 0 {
            return Err(Error::ConfigureRejected("invalid display output"));
        }
        *self.output.lock() = *output;
        *self.free_slots.lock() = (0..NUM_SLOTS).collect();
        tracing::debug!(output = %output, "test producer set up");
        Ok(())
    }

    fn swap_buffers(&self) {
        let Some(slot) = self.free_slots.lock().pop_front() else {
            *self.current.lock() = None;
            return;
        };

        let buffer = Buffer::from_native_handle(slot);
        buffer.set_delegate(self.weak_self.clone() as Weak<dyn BufferDelegate>);
        *self.current.lock() = Some(buffer);
    }

    fn current_buffer(&self) -> Option<Arc<Buffer>> {
        self.current.lock().take()
    }

    fn output_mode(&self) -> DisplayOutput {
        *self.output.lock()
    }
}

impl BufferDelegate for TestBufferProducer {
    fn on_buffer_finished(&self, buffer: &Buffer) {
        if let Some(handle) = buffer.native_handle() {
            self.free_slots.lock().push_back(handle);
        }
    }
}

/// Codec stand-in emitting a deterministic H.264-shaped bitstream.
///
/// Pulls frames through the stage's [`FrameSource`] like a hardware
/// codec would, returns each frame as soon as it is "encoded", and
/// honors the IDR interval plus explicit IDR requests.
pub struct TestCodecSource {
    config: Mutex<Option<EncoderConfig>>,
    frames: Mutex<Option<Weak<dyn FrameSource>>>,
    started: AtomicBool,
    sent_config: AtomicBool,
    frame_count: AtomicU64,
    force_idr: AtomicBool,
}

impl TestCodecSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(None),
            frames: Mutex::new(None),
            started: AtomicBool::new(false),
            sent_config: AtomicBool::new(false),
            frame_count: AtomicU64::new(0),
            force_idr: AtomicBool::new(false),
        })
    }

    fn codec_config_bytes(config: &EncoderConfig) -> Vec<u8> {
        // SPS carrying the negotiated profile/constraint/level bytes,
        // then a minimal PPS, both Annex-B framed.
        let mut data = vec![
            0x00,
            0x00,
            0x00,
            0x01,
            0x67,
            config.profile_idc,
            config.constraint_set,
            config.level_idc,
        ];
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x38, 0x80]);
        data
    }

    fn frames_between_idrs(config: &EncoderConfig) -> u64 {
        (config.i_frame_interval_secs as u64 * config.framerate as u64).max(1)
    }
}

impl CodecSource for TestCodecSource {
    fn configure(&self, config: &EncoderConfig, frames: Weak<dyn FrameSource>) -> Result<()> {
        *self.config.lock() = Some(config.clone());
        *self.frames.lock() = Some(frames);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        if self.config.lock().is_none() {
            return Err(Error::ConfigureRejected("codec is not configured"));
        }
        self.sent_config.store(false, Ordering::SeqCst);
        self.frame_count.store(0, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(Error::NotRunning);
        }
        Ok(())
    }

    fn read_output(&self) -> Result<CodecOutput> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(Error::EncoderNotConnected);
        }

        let config = self
            .config
            .lock()
            .clone()
            .ok_or(Error::ConfigureRejected("codec is not configured"))?;

        if !self.sent_config.swap(true, Ordering::SeqCst) {
            return Ok(CodecOutput {
                data: Self::codec_config_bytes(&config),
                timestamp_us: 0,
                codec_config: true,
            });
        }

        let source = self
            .frames
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(Error::EncoderNotConnected)?;

        let frame = source.read_frame()?;

        let count = self.frame_count.fetch_add(1, Ordering::SeqCst);
        let idr = self.force_idr.swap(false, Ordering::SeqCst)
            || count % Self::frames_between_idrs(&config) == 0;

        let nal_header: u8 = if idr { 0x65 } else { 0x41 };
        let mut data = vec![0x00, 0x00, 0x00, 0x01, nal_header];
        let seed = (frame.handle as u8).wrapping_add(count as u8);
        data.extend((0..AU_PAYLOAD_LEN).map(|i| seed.wrapping_add(i as u8)));

        source.frame_returned(frame.frame_id);

        Ok(CodecOutput {
            data,
            timestamp_us: frame.timestamp_us,
            codec_config: false,
        })
    }

    fn request_idr_frame(&self) {
        self.force_idr.store(true, Ordering::SeqCst);
    }
}
