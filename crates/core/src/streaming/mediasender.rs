//! Bridge stage between the encoder and the RTP transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;

use crate::common::{Executable, TimestampUs, now_us};
use crate::error::Result;
use crate::streaming::{
    Packetizer, TrackFormat, TrackId, TransportSender, flags,
};
use crate::video::encoder::{EncoderConfig, EncoderDelegate};
use crate::video::{Buffer, BufferQueue};

const MEDIA_SENDER_THREAD_NAME: &str = "MediaSender";

/// PAT/PMT and PCR must go out at least every 100 ms per the WiFi
/// Display spec.
const TABLE_EMIT_INTERVAL_US: i64 = 100_000;

/// Sentinel for "tables never emitted yet".
const NEVER: i64 = -1;

/// Drains encoder output, drives the packetizer, and hands timestamped
/// TS batches to the transport sender.
///
/// Receives encoder output as the encoder's delegate: codec-config
/// buffers become the packetizer's CSD, access units are queued for the
/// worker. The packetizer is owned here and only touched from the
/// worker thread.
pub struct MediaSender {
    packetizer: Mutex<Box<dyn Packetizer>>,
    sender: Arc<dyn TransportSender>,
    video_track: TrackId,
    queue: Arc<BufferQueue>,
    prev_table_emit_us: AtomicI64,
}

impl MediaSender {
    pub fn new(
        mut packetizer: Box<dyn Packetizer>,
        sender: Arc<dyn TransportSender>,
        config: &EncoderConfig,
    ) -> Result<Arc<Self>> {
        let video_track = packetizer.add_track(TrackFormat {
            mime: "video/avc".to_string(),
            profile_idc: config.profile_idc,
            level_idc: config.level_idc,
            constraint_set: config.constraint_set,
        })?;

        Ok(Arc::new(Self {
            packetizer: Mutex::new(packetizer),
            sender,
            video_track,
            queue: BufferQueue::new(),
            prev_table_emit_us: AtomicI64::new(NEVER),
        }))
    }

    /// Local RTP port of the underlying transport, for the M4 exchange.
    pub fn local_rtp_port(&self) -> u16 {
        self.sender.local_port()
    }

    /// Flags for the next access unit at time `now`.
    ///
    /// SPS/PPS prepending is always requested; parameter-set insertion
    /// lives here and nowhere else, so encoder backends must not inject
    /// their own. PAT/PMT/PCR are added whenever the last emission is
    /// 100 ms old (or has never happened).
    fn packetize_flags(&self, now: TimestampUs) -> u32 {
        let mut value = flags::PREPEND_SPS_PPS_TO_IDR;

        let prev = self.prev_table_emit_us.load(Ordering::Acquire);
        if prev == NEVER || prev + TABLE_EMIT_INTERVAL_US <= now {
            value |= flags::EMIT_PAT_AND_PMT | flags::EMIT_PCR;
            self.prev_table_emit_us.store(now, Ordering::Release);
        }

        value
    }

    fn process_buffer(&self, buffer: &Arc<Buffer>) {
        let packetize_flags = self.packetize_flags(now_us());

        let packets = {
            let mut packetizer = self.packetizer.lock();
            packetizer.packetize(self.video_track, buffer, packetize_flags)
        };

        match packets {
            Ok(packets) => {
                packets.set_timestamp(buffer.timestamp());
                self.sender.queue(packets);
            }
            // One dropped access unit; the stream carries on.
            Err(e) => tracing::error!(error = %e, "MPEG-TS packetizing failed"),
        }
    }
}

impl EncoderDelegate for MediaSender {
    fn on_buffer_available(&self, buffer: Arc<Buffer>) {
        self.queue.push(buffer);
    }

    fn on_buffer_with_codec_config(&self, buffer: Arc<Buffer>) {
        if let Err(e) = self
            .packetizer
            .lock()
            .submit_csd(self.video_track, &buffer)
        {
            tracing::error!(error = %e, "failed to store codec config");
        }
    }
}

impl Executable for MediaSender {
    fn name(&self) -> &'static str {
        MEDIA_SENDER_THREAD_NAME
    }

    fn start(&self) -> Result<()> {
        self.prev_table_emit_us.store(NEVER, Ordering::Release);
        Ok(())
    }

    fn execute(&self) -> bool {
        if !self.queue.wait_to_be_filled() {
            return true;
        }

        if let Some(buffer) = self.queue.pop() {
            self.process_buffer(&buffer);
        }

        true
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::MpegTsPacketizer;
    use crate::streaming::mpegts::TS_PACKET_SIZE;

    struct CapturingSender {
        batches: Mutex<Vec<Arc<Buffer>>>,
    }

    impl CapturingSender {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    impl TransportSender for CapturingSender {
        fn queue(&self, packets: Arc<Buffer>) -> bool {
            self.batches.lock().push(packets);
            true
        }

        fn local_port(&self) -> u16 {
            5000
        }
    }

    fn media_sender() -> (Arc<MediaSender>, Arc<CapturingSender>) {
        let sender = CapturingSender::new();
        let config = EncoderConfig {
            width: 1280,
            height: 720,
            framerate: 30,
            bitrate: 5_000_000,
            profile_idc: 66,
            level_idc: 31,
            constraint_set: 0xC0,
            i_frame_interval_secs: 15,
            intra_refresh_mbs: 360,
        };
        let media_sender = MediaSender::new(
            Box::new(MpegTsPacketizer::new()),
            sender.clone() as Arc<dyn TransportSender>,
            &config,
        )
        .unwrap();
        (media_sender, sender)
    }

    fn access_unit(timestamp_us: i64) -> Arc<Buffer> {
        let mut data = vec![0, 0, 0, 1, 0x41];
        data.extend(std::iter::repeat_n(0x22, 200));
        Buffer::with_timestamp(data, timestamp_us)
    }

    #[test]
    fn first_frame_emits_tables() {
        let (media_sender, sender) = media_sender();
        media_sender.start().unwrap();

        media_sender.on_buffer_available(access_unit(0));
        assert!(media_sender.execute());

        let batches = sender.batches.lock();
        assert_eq!(batches.len(), 1);
        // PAT, PMT, PCR, then the PES packets.
        let first = batches[0].data();
        assert_eq!(first[1], 0x40);
        assert_eq!(first[2], 0x00);
        assert_eq!(first[TS_PACKET_SIZE + 2], 0x00);
    }

    #[test]
    fn batch_timestamp_matches_access_unit() {
        let (media_sender, sender) = media_sender();
        media_sender.start().unwrap();

        media_sender.on_buffer_available(access_unit(777_000));
        media_sender.execute();

        assert_eq!(sender.batches.lock()[0].timestamp(), 777_000);
    }

    #[test]
    fn execute_without_input_continues() {
        let (media_sender, sender) = media_sender();
        media_sender.start().unwrap();
        assert!(media_sender.execute());
        assert!(sender.batches.lock().is_empty());
    }

    #[test]
    fn codec_config_is_not_packetized() {
        let (media_sender, sender) = media_sender();
        media_sender.start().unwrap();

        let csd = Buffer::from_vec(vec![0, 0, 0, 1, 0x67, 66, 0xC0, 31]);
        media_sender.on_buffer_with_codec_config(csd);
        assert!(media_sender.execute());
        assert!(sender.batches.lock().is_empty());
    }

    #[test]
    fn csd_is_prepended_to_idr_frames() {
        let (media_sender, sender) = media_sender();
        media_sender.start().unwrap();

        media_sender.on_buffer_with_codec_config(Buffer::from_vec(vec![
            0, 0, 0, 1, 0x67, 66, 0xC0, 31,
        ]));

        let mut idr = vec![0, 0, 0, 1, 0x65];
        idr.extend(std::iter::repeat_n(0x33, 50));
        media_sender.on_buffer_available(Buffer::with_timestamp(idr, 0));
        media_sender.execute();

        let batches = sender.batches.lock();
        let data = batches[0].data();
        // Skip PAT/PMT/PCR; the PES payload ends with the access unit
        // and starts with the prepended SPS.
        let pes = &data[3 * TS_PACKET_SIZE..];
        let payload_len = 8 + 55; // stored CSD + access unit
        let payload = &pes[TS_PACKET_SIZE - payload_len..];
        assert_eq!(&payload[..8], &[0, 0, 0, 1, 0x67, 66, 0xC0, 31]);
        assert_eq!(&payload[8..13], &[0, 0, 0, 1, 0x65]);
    }

    // The 100 ms table cadence: at 30 fps, tables go out on every
    // frame whose capture time is at least 100 ms past the previous
    // emission, which lands on every third frame.
    #[test]
    fn table_cadence_over_frame_sequence() {
        let (media_sender, _sender) = media_sender();
        media_sender.start().unwrap();

        let frame_time = |n: i64| n * 1_000_000 / 30;
        let mut table_frames = Vec::new();
        for n in 0..20i64 {
            let value = media_sender.packetize_flags(frame_time(n));
            if value & flags::EMIT_PAT_AND_PMT != 0 {
                assert_ne!(value & flags::EMIT_PCR, 0);
                table_frames.push(n);
            }
        }

        assert_eq!(table_frames, vec![0, 3, 6, 9, 12, 15, 18]);
        assert!(table_frames.len() >= 6 && table_frames.len() <= 8);

        // Every gap spans at least 100 ms.
        for pair in table_frames.windows(2) {
            assert!(frame_time(pair[1]) - frame_time(pair[0]) >= TABLE_EMIT_INTERVAL_US);
        }
    }

    #[test]
    fn prepend_flag_always_set() {
        let (media_sender, _sender) = media_sender();
        media_sender.start().unwrap();
        for n in 0..5 {
            let value = media_sender.packetize_flags(n * 10_000);
            assert_ne!(value & flags::PREPEND_SPS_PPS_TO_IDR, 0);
        }
    }
}
