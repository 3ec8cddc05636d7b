//! Video data model: buffers, queues, formats, and the encoder stage.
//!
//! Data flows through shared [`Buffer`]s over bounded [`BufferQueue`]s:
//! the capture producer fills frames, the [`StreamRenderer`] paces
//! them, and the [`H264Encoder`] stage turns them into Annex-B access
//! units for the streaming layer.

pub mod buffer;
pub mod display;
pub mod encoder;
pub mod format;
pub mod h264encoder;
pub mod producer;
pub mod queue;
pub mod renderer;
pub mod testsource;

pub use buffer::{Buffer, BufferDelegate, NativeHandle};
pub use display::{DisplayMode, DisplayOutput};
pub use encoder::{CodecSource, Encoder, EncoderConfig, EncoderDelegate, FrameSource};
pub use format::{
    CeaRate, H264Level, H264Profile, H264VideoCodec, H264VideoFormat, ProfileLevel,
    RateAndResolution, RatesBitmap, find_optimal_video_format,
};
pub use h264encoder::H264Encoder;
pub use producer::BufferProducer;
pub use queue::BufferQueue;
pub use renderer::StreamRenderer;
