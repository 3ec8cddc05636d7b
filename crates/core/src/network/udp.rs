//! UDP media stream.

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};

use crate::common::TimestampUs;
use crate::error::Result;
use crate::network::{Stream, StreamError};

/// 1500-byte Ethernet MTU minus IPv4 and UDP headers.
const MAX_UNIT_SIZE: usize = 1472;

/// Connected UDP socket towards the sink's RTP port.
///
/// Binds an ephemeral local port at construction; the port is
/// announced to the sink during the RTSP M4 exchange.
pub struct UdpStream {
    socket: UdpSocket,
}

impl UdpStream {
    /// Bind an ephemeral socket for outbound RTP.
    pub fn bind() -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self { socket })
    }
}

impl Stream for UdpStream {
    fn connect(&self, address: IpAddr, port: u16) -> Result<()> {
        let remote = SocketAddr::new(address, port);
        self.socket.connect(remote)?;
        tracing::debug!(%remote, local_port = self.local_port(), "UDP stream connected");
        Ok(())
    }

    fn write(&self, data: &[u8], _timestamp: TimestampUs) -> std::result::Result<(), StreamError> {
        match self.socket.send(data) {
            Ok(_) => Ok(()),
            // A connected UDP socket surfaces ICMP port-unreachable
            // feedback as a refused/reset error on a later send.
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
                ) =>
            {
                Err(StreamError::RemoteClosed)
            }
            Err(e) => Err(StreamError::Failed(e)),
        }
    }

    fn local_port(&self) -> u16 {
        self.socket
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(0)
    }

    fn max_unit_size(&self) -> usize {
        MAX_UNIT_SIZE
    }
}
