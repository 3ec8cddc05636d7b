//! End-to-end pipeline test: test capture source → encoder stage →
//! MPEG-TS packetizer → RTP sender.
//!
//! Runs the full four-stage pipeline against a capturing in-memory
//! stream and against a real UDP socket pair, then checks the RTP/TS
//! invariants on the wire bytes.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use aethercast::common::TimestampUs;
use aethercast::network::{Stream, StreamError, UdpStream};
use aethercast::session::{MediaManagerFactory, STREAM_DELAY_ON_PLAY, SessionState, SourceMediaManager};
use aethercast::video::testsource::{TestBufferProducer, TestCodecSource};
use aethercast::video::{CeaRate, H264Encoder, H264Level, H264Profile, H264VideoFormat};

const TS_PACKET_SIZE: usize = 188;
const RTP_HEADER_SIZE: usize = 12;

#[derive(Default)]
struct Capture {
    datagrams: Mutex<Vec<Vec<u8>>>,
}

struct CapturingStream(Arc<Capture>);

impl Stream for CapturingStream {
    fn connect(&self, _address: IpAddr, _port: u16) -> aethercast::Result<()> {
        Ok(())
    }

    fn write(&self, data: &[u8], _timestamp: TimestampUs) -> Result<(), StreamError> {
        self.0.datagrams.lock().push(data.to_vec());
        Ok(())
    }

    fn local_port(&self) -> u16 {
        16384
    }

    fn max_unit_size(&self) -> usize {
        1472
    }
}

fn format_720p30() -> H264VideoFormat {
    H264VideoFormat {
        profile: H264Profile::ConstrainedBaseline,
        level: H264Level::L3_1,
        rate_resolution: CeaRate::Cea1280x720p30,
    }
}

#[test]
fn pipeline_emits_wellformed_rtp_datagrams() {
    let capture = Arc::new(Capture::default());
    let manager = SourceMediaManager::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        TestBufferProducer::new(),
        H264Encoder::new(TestCodecSource::new()),
        Box::new(CapturingStream(capture.clone())),
    );

    manager.set_sink_rtp_ports(16384, 16385);
    manager.configure(format_720p30()).expect("configure");

    manager.play();
    assert_eq!(manager.state(), SessionState::Playing);

    // Let the deferred start elapse and a handful of 30 fps frames
    // flow through all four stages.
    thread::sleep(STREAM_DELAY_ON_PLAY + Duration::from_millis(700));
    manager.teardown();
    assert_eq!(manager.state(), SessionState::Stopped);

    let datagrams = capture.datagrams.lock();
    assert!(
        datagrams.len() >= 3,
        "expected several datagrams, got {}",
        datagrams.len()
    );

    let mut prev_sequence: Option<u16> = None;
    let mut prev_timestamp = 0u32;
    let mut saw_pat = false;

    for datagram in datagrams.iter() {
        // RTP fixed header with payload type 33 and no marker.
        assert!(datagram.len() > RTP_HEADER_SIZE);
        assert_eq!(datagram[0], 0x80);
        assert_eq!(datagram[1], 0x21);
        assert!(datagram.len() <= 1472);

        // Payload is a whole number of sync-aligned TS packets.
        let payload = &datagram[RTP_HEADER_SIZE..];
        assert_eq!(payload.len() % TS_PACKET_SIZE, 0);
        for packet in payload.chunks(TS_PACKET_SIZE) {
            assert_eq!(packet[0], 0x47);
            if packet[1] == 0x40 && packet[2] == 0x00 {
                saw_pat = true;
            }
        }

        // Sequence numbers increase by exactly 1 per datagram.
        let sequence = u16::from_be_bytes([datagram[2], datagram[3]]);
        if let Some(prev) = prev_sequence {
            assert_eq!(sequence, prev.wrapping_add(1));
        }
        prev_sequence = Some(sequence);

        // 90 kHz timestamps are non-decreasing across batches.
        let timestamp = u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]);
        assert!(timestamp >= prev_timestamp);
        prev_timestamp = timestamp;
    }

    // The periodic table emission must have produced at least one PAT.
    assert!(saw_pat, "no PAT packet seen on the wire");
}

#[test]
fn factory_source_streams_over_real_udp() {
    let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
    receiver
        .set_read_timeout(Some(Duration::from_secs(3)))
        .unwrap();
    let sink_port = receiver.local_addr().unwrap().port();

    let stream = UdpStream::bind().expect("bind sender");
    let manager = MediaManagerFactory::create_source(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        Box::new(stream),
    )
    .expect("create source");

    manager.set_sink_rtp_ports(sink_port, sink_port + 1);
    manager.configure(format_720p30()).expect("configure");
    assert_ne!(manager.local_rtp_port(), 0);

    manager.play();

    // First datagram arrives once the deferred start has elapsed.
    let mut buf = [0u8; 2048];
    let len = receiver.recv(&mut buf).expect("receive RTP");
    assert!(len > RTP_HEADER_SIZE);
    assert_eq!(buf[0], 0x80);
    assert_eq!(buf[1], 0x21);
    assert_eq!((len - RTP_HEADER_SIZE) % TS_PACKET_SIZE, 0);

    manager.teardown();
}
