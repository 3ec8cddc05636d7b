//! RTP transport stage: TS batches out as MTU-bounded UDP datagrams.
//!
//! RTP fixed header (RFC 3550 §5.1), payload type 33 (MPEG-TS):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The payload is a whole number of 188-byte TS packets, no extra
//! framing. Every datagram derived from one TS batch carries the same
//! 90 kHz timestamp; sequence numbers increase by exactly one per
//! datagram and wrap at 2^16.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::RngExt;

use crate::common::Executable;
use crate::error::Result;
use crate::network::Stream;
use crate::streaming::{TransportDelegate, TransportDelegateSetter, TransportSender};
use crate::streaming::mpegts::TS_PACKET_SIZE;
use crate::video::{Buffer, BufferQueue};

const RTP_SENDER_THREAD_NAME: &str = "RTPSender";

const RTP_HEADER_SIZE: usize = 12;

/// MPEG-TS payload type (RFC 3551 §6).
const RTP_PAYLOAD_TYPE_MP2T: u8 = 33;

/// Fragments TS batches into RTP datagrams on the owned stream.
///
/// Sole owner of the network stream. On a fatal write error the sender
/// latches a network-error flag, notifies the transport delegate, and
/// surrenders its executor slot; further batches are dropped.
pub struct RtpSender {
    stream: Box<dyn Stream>,
    /// Whole TS packets per datagram, from the stream's unit size.
    max_ts_packets: usize,
    ssrc: u32,
    sequence: AtomicU16,
    queue: Arc<BufferQueue>,
    network_error: AtomicBool,
    delegate: Mutex<Option<Weak<dyn TransportDelegate>>>,
}

impl RtpSender {
    pub fn new(stream: Box<dyn Stream>) -> Arc<Self> {
        let max_ts_packets = (stream.max_unit_size() - RTP_HEADER_SIZE) / TS_PACKET_SIZE;
        // Random SSRC per RFC 3550 §8.1; MPEG-TS sinks ignore it but a
        // fixed value would collide across restarted sessions.
        let ssrc = rand::rng().random::<u32>();

        tracing::debug!(max_ts_packets, ssrc = format_args!("{:#010X}", ssrc), "RTP sender ready");

        Arc::new(Self {
            stream,
            max_ts_packets,
            ssrc,
            sequence: AtomicU16::new(0),
            queue: BufferQueue::new(),
            network_error: AtomicBool::new(false),
            delegate: Mutex::new(None),
        })
    }

    fn send_batch(&self, batch: &Arc<Buffer>) -> bool {
        let data = batch.data();
        if data.is_empty() || data.len() % TS_PACKET_SIZE != 0 {
            tracing::warn!(len = data.len(), "dropping malformed TS batch");
            return true;
        }

        // 90 kHz clock; constant across all datagrams of this batch.
        let rtp_timestamp = (batch.timestamp() as u64 * 9 / 100) as u32;

        for chunk in data.chunks(self.max_ts_packets * TS_PACKET_SIZE) {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

            let mut datagram = Vec::with_capacity(RTP_HEADER_SIZE + chunk.len());
            datagram.push(0x80); // V=2, no padding/extension/CSRC
            datagram.push(RTP_PAYLOAD_TYPE_MP2T); // marker clear
            datagram.extend_from_slice(&sequence.to_be_bytes());
            datagram.extend_from_slice(&rtp_timestamp.to_be_bytes());
            datagram.extend_from_slice(&self.ssrc.to_be_bytes());
            datagram.extend_from_slice(chunk);

            if let Err(e) = self.stream.write(&datagram, batch.timestamp()) {
                tracing::error!(error = %e, "RTP write failed");
                self.network_error.store(true, Ordering::SeqCst);
                if let Some(delegate) = self.delegate.lock().as_ref().and_then(Weak::upgrade) {
                    delegate.on_transport_network_error();
                }
                return false;
            }
        }

        true
    }
}

impl TransportSender for RtpSender {
    fn queue(&self, packets: Arc<Buffer>) -> bool {
        if self.network_error.load(Ordering::SeqCst) {
            return false;
        }
        self.queue.push(packets);
        true
    }

    fn local_port(&self) -> u16 {
        self.stream.local_port()
    }
}

impl TransportDelegateSetter for RtpSender {
    fn set_delegate(&self, delegate: Weak<dyn TransportDelegate>) {
        *self.delegate.lock() = Some(delegate);
    }

    fn reset_delegate(&self) {
        *self.delegate.lock() = None;
    }
}

impl Executable for RtpSender {
    fn name(&self) -> &'static str {
        RTP_SENDER_THREAD_NAME
    }

    fn start(&self) -> Result<()> {
        Ok(())
    }

    fn execute(&self) -> bool {
        let Some(batch) = self.queue.next() else {
            return true;
        };
        self.send_batch(&batch)
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}
