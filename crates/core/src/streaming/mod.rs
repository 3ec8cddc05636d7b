//! Streaming pipeline tail: MPEG-TS packetization and RTP transport.
//!
//! Encoded access units arrive from the encoder stage, are multiplexed
//! into 188-byte MPEG-TS packets per the Wi-Fi Display profile
//! (ISO/IEC 13818-1 with the PAT/PMT/PCR cadence of WFD D.4.2), and
//! leave as RTP/UDP datagrams (RFC 3550, payload type 33).
//!
//! | Component | Role |
//! |-----------|------|
//! | [`Packetizer`] / [`MpegTsPacketizer`](mpegts::MpegTsPacketizer) | access unit → contiguous TS packet batch |
//! | [`MediaSender`](mediasender::MediaSender) | drains encoder output, drives the packetizer, enforces the 100 ms PAT/PMT/PCR cadence |
//! | [`TransportSender`] / [`RtpSender`](rtpsender::RtpSender) | TS batch → MTU-bounded RTP datagrams |

pub mod mediasender;
pub mod mpegts;
pub mod rtpsender;

use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::video::Buffer;

pub use mediasender::MediaSender;
pub use mpegts::MpegTsPacketizer;
pub use rtpsender::RtpSender;

/// Flags controlling one `packetize` call.
pub mod flags {
    /// Emit PAT and PMT packets ahead of the access unit.
    pub const EMIT_PAT_AND_PMT: u32 = 1 << 0;
    /// Emit a PCR-only packet ahead of the access unit.
    pub const EMIT_PCR: u32 = 1 << 1;
    /// Prepend the stored SPS/PPS when the access unit contains an IDR.
    pub const PREPEND_SPS_PPS_TO_IDR: u32 = 1 << 2;
}

/// Identifies a track added to a packetizer.
pub type TrackId = usize;

/// Per-track identity, fixed for the track's life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    /// Only `video/avc` is supported.
    pub mime: String,
    pub profile_idc: u8,
    pub level_idc: u8,
    pub constraint_set: u8,
}

impl TrackFormat {
    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }

    pub fn is_h264(&self) -> bool {
        self.mime == "video/avc"
    }
}

/// Converts access units into transport-stream packet batches.
pub trait Packetizer: Send {
    /// Register a track. Only H.264 video is accepted.
    fn add_track(&mut self, format: TrackFormat) -> Result<TrackId>;

    /// Split a codec-config buffer on Annex-B start codes and store the
    /// NAL units as the track's CSD.
    fn submit_csd(&mut self, track: TrackId, buffer: &Arc<Buffer>) -> Result<()>;

    /// Emit the contiguous TS-packet batch for one access unit,
    /// honoring the [`flags`] bitmask. The result carries the access
    /// unit's timestamp.
    fn packetize(&mut self, track: TrackId, access_unit: &Arc<Buffer>, flags: u32)
    -> Result<Arc<Buffer>>;
}

/// Hands TS batches to the network.
pub trait TransportSender: Send + Sync {
    /// Queue one TS batch for delivery. `false` means the transport is
    /// in a network-error state and the batch was dropped.
    fn queue(&self, packets: Arc<Buffer>) -> bool;

    /// Local port announced to the sink in the M4 exchange.
    fn local_port(&self) -> u16;
}

/// Session-layer observer for transport failures.
pub trait TransportDelegate: Send + Sync {
    fn on_transport_network_error(&self);
}

/// Attach point for the transport delegate, kept weak to avoid an
/// ownership cycle with the session layer.
pub trait TransportDelegateSetter {
    fn set_delegate(&self, delegate: Weak<dyn TransportDelegate>);
    fn reset_delegate(&self);
}
