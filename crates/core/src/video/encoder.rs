//! Encoder contract between the session layer, the pipeline, and an
//! opaque platform codec.
//!
//! Three seams meet here:
//!
//! - [`Encoder`] is what the session layer drives: configure once,
//!   start/stop, queue raw frames, request IDRs.
//! - [`EncoderDelegate`] is what the encoder pushes output to: the
//!   codec-config buffer (SPS/PPS) once after start, then one Annex-B
//!   access unit per frame.
//! - [`CodecSource`] / [`FrameSource`] model the platform codec, which
//!   **pulls** input frames through a read callback and hands frames
//!   back when the hardware is done with them.

use std::sync::{Arc, Weak};

use crate::common::{Executable, TimestampUs};
use crate::error::Result;
use crate::video::{Buffer, NativeHandle};

/// Immutable per-session encoder parameters. Fixed at configure;
/// a second configure is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate: u32,
    pub profile_idc: u8,
    pub level_idc: u8,
    pub constraint_set: u8,
    /// Seconds between forced I-frames.
    pub i_frame_interval_secs: u32,
    /// Macroblocks refreshed per frame in cyclic intra-refresh mode.
    pub intra_refresh_mbs: u32,
}

impl EncoderConfig {
    /// Cyclic refresh of 10% of all macroblocks per frame: a whole
    /// frame recovers in about 10 frames after packet loss.
    pub fn cyclic_intra_refresh_mbs(width: u32, height: u32) -> u32 {
        (width.div_ceil(16) * height.div_ceil(16) * 10) / 100
    }
}

/// Receives encoder output.
pub trait EncoderDelegate: Send + Sync {
    /// Fired once before any access unit, carrying the SPS/PPS bytes.
    fn on_buffer_with_codec_config(&self, buffer: Arc<Buffer>);

    /// Fired per frame with one Annex-B access unit.
    fn on_buffer_available(&self, buffer: Arc<Buffer>);
}

/// The encoder stage contract the session layer drives.
pub trait Encoder: Executable {
    fn default_configuration(&self) -> EncoderConfig;

    /// May be called at most once per encoder instance.
    fn configure(&self, config: EncoderConfig) -> Result<()>;

    /// Fixed configuration, once configured.
    fn configuration(&self) -> Option<EncoderConfig>;

    /// Non-blocking; silently ignored when the encoder is not running.
    fn queue_buffer(&self, buffer: Arc<Buffer>);

    fn set_delegate(&self, delegate: Weak<dyn EncoderDelegate>);

    /// Request that the next output frame be an IDR.
    fn send_idr_frame(&self);

    fn running(&self) -> bool;
}

/// One raw frame handed to the codec, referencing producer memory.
///
/// `frame_id` keys the stage's pairing table; the codec passes it back
/// through [`FrameSource::frame_returned`] when the hardware no longer
/// reads the underlying memory.
#[derive(Debug, Clone, Copy)]
pub struct CodecFrame {
    pub frame_id: u64,
    pub handle: NativeHandle,
    pub timestamp_us: TimestampUs,
}

/// One encoded output pulled from the codec.
#[derive(Debug, Clone)]
pub struct CodecOutput {
    pub data: Vec<u8>,
    pub timestamp_us: TimestampUs,
    /// Codec-config (SPS/PPS) rather than an access unit.
    pub codec_config: bool,
}

/// The stage side of the codec's pull-model input.
///
/// Implemented by the encoder stage; called from the codec's context.
pub trait FrameSource: Send + Sync {
    /// Blocks (bounded) until an input frame is available. Errors are
    /// the [`EncoderEndOfStream`](crate::Error::EncoderEndOfStream) /
    /// [`EncoderNotConnected`](crate::Error::EncoderNotConnected)
    /// sentinels the codec distinguishes for teardown.
    fn read_frame(&self) -> Result<CodecFrame>;

    /// The codec is done with a previously read frame. Releases the
    /// paired input buffer back to its producer, exactly once.
    fn frame_returned(&self, frame_id: u64);
}

/// Opaque platform codec contract (hardware or software backend).
pub trait CodecSource: Send + Sync {
    /// Fix the encoding parameters and attach the input source the
    /// codec will pull frames from.
    fn configure(&self, config: &EncoderConfig, frames: Weak<dyn FrameSource>) -> Result<()>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Pull the next encoded output. Blocks (bounded) while encoding
    /// is in flight.
    fn read_output(&self) -> Result<CodecOutput>;

    /// Ask the codec to emit an IDR as its next output frame.
    fn request_idr_frame(&self);
}
