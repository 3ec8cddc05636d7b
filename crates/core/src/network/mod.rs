//! Outbound media transport contract.

pub mod udp;

use std::net::IpAddr;

use crate::common::TimestampUs;
use crate::error::Result;

pub use udp::UdpStream;

/// Why a stream write did not complete.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A local error; the datagram was not sent.
    #[error("stream write failed: {0}")]
    Failed(#[source] std::io::Error),
    /// The remote end is gone (e.g. ICMP port unreachable feedback).
    #[error("remote closed the connection")]
    RemoteClosed,
}

/// A connected datagram stream towards the sink.
///
/// The RTP sender is the sole owner of its stream; the session layer
/// only sees the local port it reports.
pub trait Stream: Send + Sync {
    /// Connect towards the given remote address and port.
    fn connect(&self, address: IpAddr, port: u16) -> Result<()>;

    /// Send one unit. `timestamp` is the media timestamp of the payload
    /// for transports (and reports) that care; UDP ignores it.
    fn write(&self, data: &[u8], timestamp: TimestampUs) -> std::result::Result<(), StreamError>;

    /// Local port, for the RTSP M4 exchange.
    fn local_port(&self) -> u16;

    /// Largest unit this stream will send without fragmenting.
    fn max_unit_size(&self) -> usize;
}
