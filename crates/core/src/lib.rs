//! # aethercast — Miracast source streaming pipeline
//!
//! Streams the local display to a Wi-Fi-Display sink: raw frames are
//! encoded to H.264, multiplexed into an MPEG-TS transport stream per
//! the Miracast profile, and emitted as RTP/UDP towards the RTP port
//! the sink advertises, all driven by an RTSP/WFD control session on
//! TCP port 7236.
//!
//! ## Protocol references
//!
//! | Spec | Topic | How this crate uses it |
//! |------|-------|------------------------|
//! | ISO/IEC 13818-1 | MPEG-2 TS | 188-byte packets, PAT/PMT sections, PCR, PES with PTS |
//! | Wi-Fi Display 1.1 (D.4.2) | Miracast profile | PIDs, descriptor layout, 100 ms PAT/PMT/PCR cadence |
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Fixed header, sequence/timestamp semantics, SSRC |
//! | [RFC 3551](https://tools.ietf.org/html/rfc3551) | RTP profiles | Payload type 33 (MP2T) |
//!
//! ## Architecture
//!
//! ```text
//! [BufferProducer]──►[Encoder]──►[MediaSender]──►[RTPSender]──►(UDP)
//!       (capture)    (H.264)    (MPEG-TS pkg)   (RTP frag)
//!                       ▲
//!                       │ delegate: encoder output pushes to MediaSender
//! ```
//!
//! Each stage runs on its own worker thread
//! ([`common::ThreadedExecutor`]); stages communicate only through
//! bounded [`video::BufferQueue`]s that shed the oldest entry under
//! back-pressure. The session layer ([`session::SourceMediaManager`])
//! assembles the pipeline from a negotiated
//! [`video::H264VideoFormat`] and exposes PLAY/PAUSE/TEARDOWN.
//!
//! ## Crate layout
//!
//! - [`common`] — [`common::Executable`], worker executors, [`common::Pipeline`].
//! - [`video`] — buffers, queues, formats, the encoder stage and capture contracts.
//! - [`streaming`] — MPEG-TS packetizer, media sender, RTP sender.
//! - [`network`] — the outbound [`network::Stream`] contract and UDP implementation.
//! - [`session`] — media manager, RTSP listener/client, factory.
//! - [`error`] — [`Error`] enum and [`Result`] alias.

pub mod common;
pub mod error;
pub mod network;
pub mod session;
pub mod streaming;
pub mod video;

pub use common::{Executable, Pipeline, ThreadedExecutor};
pub use error::{Error, Result};
pub use session::{MediaManagerFactory, SessionState, Source, SourceClient, SourceMediaManager};
pub use streaming::{MediaSender, MpegTsPacketizer, Packetizer, RtpSender};
pub use video::{Buffer, BufferQueue, Encoder, EncoderConfig, H264VideoFormat};
