//! Session layer: owns the pipeline and drives it from RTSP/WFD
//! control decisions.
//!
//! The [`SourceMediaManager`] assembles the four pipeline stages at
//! configure time and exposes the PLAY/PAUSE/TEARDOWN lifecycle:
//!
//! ```text
//! Stopped ── play ──► (delay 300 ms) ──► Playing
//! Playing ── pause ──► Paused
//! Playing ── teardown ──► Stopped
//! Paused ── play ──► Playing
//! Paused ── teardown ──► Stopped
//! ```
//!
//! [`source::Source`] accepts the sink's RTSP connection on port 7236
//! and [`client::SourceClient`] ferries RTSP bytes between that socket
//! and an external WFD protocol engine.

pub mod client;
pub mod factory;
pub mod source;
pub mod timer;

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::common::{Executable, Pipeline};
use crate::error::{Error, Result};
use crate::network::Stream;
use crate::streaming::{
    MediaSender, MpegTsPacketizer, RtpSender, TransportDelegate, TransportDelegateSetter,
    TransportSender,
};
use crate::video::encoder::EncoderDelegate;
use crate::video::{
    BufferProducer, CeaRate, DisplayMode, DisplayOutput, Encoder, H264Level, H264Profile,
    H264VideoCodec, H264VideoFormat, RatesBitmap, StreamRenderer, find_optimal_video_format,
};

pub use client::{ProtocolEngine, RtspPeer, SourceClient};
pub use factory::MediaManagerFactory;
pub use source::Source;
pub use timer::DelayedCall;

/// Grace period between PLAY and the first RTP packet, giving the sink
/// time to bind its RTP listener; packets sent earlier bounce back as
/// ICMP port-unreachable.
pub const STREAM_DELAY_ON_PLAY: Duration = Duration::from_millis(300);

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(0);

/// Media-manager playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Paused,
    Playing,
}

/// Session-level observer for fatal source errors.
pub trait SessionDelegate: Send + Sync {
    fn on_source_network_error(&self);
}

/// Owns the streaming pipeline for one source session.
///
/// Collaborators (capture producer, encoder, network stream) are
/// injected; the manager wires them into a [`Pipeline`] at configure
/// time and never touches stage internals afterwards.
pub struct SourceMediaManager {
    session_id: u32,
    remote_address: IpAddr,
    state: Mutex<SessionState>,
    producer: Arc<dyn BufferProducer>,
    encoder: Arc<dyn Encoder>,
    /// Taken at configure; the RTP sender becomes the sole owner.
    output_stream: Mutex<Option<Box<dyn Stream>>>,
    sink_rtp_ports: Mutex<(u16, u16)>,
    format: Mutex<Option<H264VideoFormat>>,
    pipeline: Mutex<Pipeline>,
    rtp_sender: Mutex<Option<Arc<RtpSender>>>,
    media_sender: Mutex<Option<Arc<MediaSender>>>,
    play_delay: Mutex<Option<DelayedCall>>,
    delegate: Mutex<Option<Weak<dyn SessionDelegate>>>,
    weak_self: Weak<SourceMediaManager>,
}

impl SourceMediaManager {
    pub fn new(
        remote_address: IpAddr,
        producer: Arc<dyn BufferProducer>,
        encoder: Arc<dyn Encoder>,
        output_stream: Box<dyn Stream>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst) + 1,
            remote_address,
            state: Mutex::new(SessionState::Stopped),
            producer,
            encoder,
            output_stream: Mutex::new(Some(output_stream)),
            sink_rtp_ports: Mutex::new((0, 0)),
            format: Mutex::new(None),
            pipeline: Mutex::new(Pipeline::new(4)),
            rtp_sender: Mutex::new(None),
            media_sender: Mutex::new(None),
            play_delay: Mutex::new(None),
            delegate: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    pub fn session_id(&self) -> String {
        self.session_id.to_string()
    }

    pub fn set_delegate(&self, delegate: Weak<dyn SessionDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    pub fn reset_delegate(&self) {
        *self.delegate.lock() = None;
    }

    /// Ports announced by the sink in its M3 response (RTP, RTCP).
    pub fn set_sink_rtp_ports(&self, rtp: u16, rtcp: u16) {
        *self.sink_rtp_ports.lock() = (rtp, rtcp);
    }

    pub fn sink_rtp_ports(&self) -> (u16, u16) {
        *self.sink_rtp_ports.lock()
    }

    /// Codecs this source advertises: constrained baseline level 3.1
    /// with 720p up to 30 Hz, the profile every certified sink accepts.
    pub fn local_codecs() -> Vec<H264VideoCodec> {
        let mut cea = RatesBitmap::new();
        cea.set(CeaRate::Cea1280x720p24)
            .set(CeaRate::Cea1280x720p25)
            .set(CeaRate::Cea1280x720p30);

        vec![H264VideoCodec {
            profile: H264Profile::ConstrainedBaseline,
            level: H264Level::L3_1,
            cea,
        }]
    }

    /// Negotiate against the sink's advertised codecs and configure the
    /// pipeline for the resulting format.
    pub fn init_optimal_video_format(
        &self,
        sink_codecs: &[H264VideoCodec],
    ) -> Result<H264VideoFormat> {
        let mut format = find_optimal_video_format(&Self::local_codecs(), sink_codecs)
            .ok_or(Error::ConfigureRejected("no common video format with sink"))?;

        // Some WFD protocol stacks hand back 720p60 even when it was
        // never offered; coerce to the 720p30 we actually advertise.
        if format.rate_resolution == CeaRate::Cea1280x720p60 {
            tracing::warn!("sink negotiated 720p60, coercing to 720p30");
            format.rate_resolution = CeaRate::Cea1280x720p30;
        }

        tracing::debug!(format = %format, "optimal video format selected");

        self.configure(format)?;
        Ok(format)
    }

    pub fn format(&self) -> Option<H264VideoFormat> {
        *self.format.lock()
    }

    /// Build and wire the pipeline for the negotiated format.
    pub fn configure(&self, format: H264VideoFormat) -> Result<()> {
        let mut pipeline = self.pipeline.lock();
        if !pipeline.is_empty() {
            return Err(Error::ConfigureRejected("session is already configured"));
        }

        let rr = format.rate_and_resolution();
        tracing::debug!(
            width = rr.width,
            height = rr.height,
            framerate = rr.framerate,
            "configuring session"
        );

        let stream = self
            .output_stream
            .lock()
            .take()
            .ok_or(Error::ConfigureRejected("output stream already consumed"))?;

        let (sink_rtp_port, _) = self.sink_rtp_ports();
        stream.connect(self.remote_address, sink_rtp_port)?;

        // Mirror mode would need the capture side to rescale frames;
        // only extend delivers encoder-sized frames today.
        let output = DisplayOutput::new(DisplayMode::Extend, rr.width, rr.height, rr.framerate);
        self.producer.setup(&output)?;

        let pl = format.profile_level();
        let mut config = self.encoder.default_configuration();
        config.width = rr.width;
        config.height = rr.height;
        config.framerate = rr.framerate;
        config.profile_idc = pl.profile_idc;
        config.level_idc = pl.level_idc;
        config.constraint_set = pl.constraint_set;

        self.encoder.configure(config.clone())?;

        let renderer = StreamRenderer::new(self.producer.clone(), self.encoder.clone());

        let rtp_sender = RtpSender::new(stream);
        rtp_sender.set_delegate(self.weak_self.clone() as Weak<dyn TransportDelegate>);

        let media_sender = MediaSender::new(
            Box::new(MpegTsPacketizer::new()),
            rtp_sender.clone() as Arc<dyn TransportSender>,
            &config,
        )?;
        self.encoder
            .set_delegate(Arc::downgrade(&media_sender) as Weak<dyn EncoderDelegate>);

        pipeline.add(self.encoder.clone() as Arc<dyn Executable>)?;
        pipeline.add(renderer as Arc<dyn Executable>)?;
        pipeline.add(rtp_sender.clone() as Arc<dyn Executable>)?;
        pipeline.add(media_sender.clone() as Arc<dyn Executable>)?;

        *self.rtp_sender.lock() = Some(rtp_sender);
        *self.media_sender.lock() = Some(media_sender);
        *self.format.lock() = Some(format);

        Ok(())
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state(), SessionState::Paused | SessionState::Stopped)
    }

    fn cancel_play_delay(&self) {
        if let Some(delay) = self.play_delay.lock().take() {
            delay.cancel();
        }
    }

    /// Transition to Playing. The pipeline start is deferred by
    /// [`STREAM_DELAY_ON_PLAY`]; the state changes immediately since
    /// the control channel has no way to revise it later.
    pub fn play(&self) {
        if !self.is_paused() {
            return;
        }

        self.cancel_play_delay();

        let weak = self.weak_self.clone();
        let delay = DelayedCall::schedule(STREAM_DELAY_ON_PLAY, move || {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            let mut pipeline = manager.pipeline.lock();
            // A pause or teardown may have won the race with the timer;
            // state changes happen under the pipeline lock.
            if *manager.state.lock() != SessionState::Playing {
                return;
            }
            if let Err(e) = pipeline.start() {
                tracing::error!(error = %e, "deferred pipeline start failed");
            }
        });
        *self.play_delay.lock() = Some(delay);

        *self.state.lock() = SessionState::Playing;
        tracing::info!(session = self.session_id, "playing");
    }

    pub fn pause(&self) {
        if self.is_paused() {
            return;
        }

        self.cancel_play_delay();

        let mut pipeline = self.pipeline.lock();
        if pipeline.running()
            && let Err(e) = pipeline.stop()
        {
            tracing::warn!(error = %e, "failed to stop pipeline");
        }

        *self.state.lock() = SessionState::Paused;
        tracing::info!(session = self.session_id, "paused");
    }

    pub fn teardown(&self) {
        if self.state() == SessionState::Stopped {
            return;
        }

        self.cancel_play_delay();

        // Detach the transport back-reference before dropping into
        // Stopped so late network errors cannot call back into us.
        if let Some(rtp_sender) = self.rtp_sender.lock().as_ref() {
            rtp_sender.reset_delegate();
        }

        let mut pipeline = self.pipeline.lock();
        if pipeline.running()
            && let Err(e) = pipeline.stop()
        {
            tracing::warn!(error = %e, "failed to stop pipeline");
        }

        *self.state.lock() = SessionState::Stopped;
        tracing::info!(session = self.session_id, "torn down");
    }

    pub fn send_idr_picture(&self) {
        self.encoder.send_idr_frame();
    }

    /// Local RTP port for the M4 SET_PARAMETER exchange.
    pub fn local_rtp_port(&self) -> u16 {
        self.media_sender
            .lock()
            .as_ref()
            .map(|sender| sender.local_rtp_port())
            .unwrap_or(0)
    }
}

impl TransportDelegate for SourceMediaManager {
    fn on_transport_network_error(&self) {
        tracing::error!(session = self.session_id, "transport network error");
        if let Some(delegate) = self.delegate.lock().as_ref().and_then(Weak::upgrade) {
            delegate.on_source_network_error();
        }
    }
}

impl Drop for SourceMediaManager {
    fn drop(&mut self) {
        self.cancel_play_delay();
        let pipeline = self.pipeline.get_mut();
        if pipeline.running() {
            let _ = pipeline.stop();
        }
    }
}
