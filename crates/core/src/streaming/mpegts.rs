//! MPEG-TS packetizer for the Wi-Fi Display profile.
//!
//! Serializes H.264 access units into 188-byte transport-stream
//! packets (ISO/IEC 13818-1), with PAT/PMT/PCR insertion per WFD
//! spec 1.1 chapter D.4.2. The on-wire bytes are what Miracast sinks
//! parse, so the layouts below are bit-exact:
//!
//! - PAT on PID 0, PMT on PID 0x100, PCR-only packets on PID 0x1000,
//!   video PES starting at PID 0x1011.
//! - Table sections carry an MPEG-2 CRC-32 (poly 0x04C11DB7, seed
//!   0xFFFFFFFF, no final XOR).
//! - The PCR runs on a 27 MHz clock; PES PTS on 90 kHz.

use std::sync::Arc;

use crate::common::{TimestampUs, now_us};
use crate::error::{Error, Result};
use crate::streaming::{Packetizer, TrackFormat, TrackId, flags};
use crate::video::Buffer;

pub const TS_PACKET_SIZE: usize = 188;

const PMT_PID: u16 = 0x100;
const PCR_PID: u16 = 0x1000;
const VIDEO_PID_START: u16 = 0x1011;

const H264_STREAM_TYPE: u8 = 0x1B;
const VIDEO_STREAM_ID_START: u8 = 0xE0;
const VIDEO_STREAM_ID_STOP: u8 = 0xEF;

const AVC_VIDEO_DESCRIPTOR_TAG: u8 = 40;
const AVC_TIMING_AND_HRD_DESCRIPTOR_TAG: u8 = 42;

const NAL_PREFIX: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// IDR slice NAL unit type.
const NAL_TYPE_IDR: u8 = 5;

/// Payload bytes in the first PES packet: TS header + 14-byte PES
/// header (start code, stream id, length, flags, 5-byte PTS).
const FIRST_PACKET_PAYLOAD: usize = TS_PACKET_SIZE - 4 - 14;
/// Payload bytes in each continuation packet.
const CONT_PACKET_PAYLOAD: usize = TS_PACKET_SIZE - 4;

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let poly: u32 = 0x04C1_1DB7;
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            crc = (crc << 1) ^ if crc & 0x8000_0000 != 0 { poly } else { 0 };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// MPEG-2 CRC-32: MSB-first, seed 0xFFFFFFFF, no final XOR.
pub fn crc32(data: &[u8]) -> u32 {
    data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[(((crc >> 24) ^ byte as u32) & 0xFF) as usize]
    })
}

/// Iterate the NAL units of an Annex-B bitstream, without start codes.
/// Handles both 4-byte and 3-byte start codes.
pub fn nal_units(data: &[u8]) -> Vec<&[u8]> {
    let mut starts: Vec<usize> = Vec::new();
    let mut boundaries: Vec<usize> = Vec::new();

    let mut i = 0;
    while i < data.len() {
        if data.len() - i >= 4 && data[i..i + 4] == NAL_PREFIX {
            boundaries.push(i);
            starts.push(i + 4);
            i += 4;
        } else if data.len() - i >= 3 && data[i..i + 3] == [0x00, 0x00, 0x01] {
            boundaries.push(i);
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .filter_map(|(n, &start)| {
            let end = boundaries.get(n + 1).copied().unwrap_or(data.len());
            (start < end).then(|| &data[start..end])
        })
        .collect()
}

/// Whether an Annex-B access unit contains an IDR slice.
pub fn contains_idr(data: &[u8]) -> bool {
    nal_units(data)
        .iter()
        .any(|nal| !nal.is_empty() && nal[0] & 0x1F == NAL_TYPE_IDR)
}

/// One PES stream inside the multiplex.
struct Track {
    format: TrackFormat,
    pid: u16,
    stream_type: u8,
    stream_id: u8,
    continuity_counter: u8,
    finalized: bool,
    /// Start-code-prefixed SPS/PPS NAL units, in submission order.
    csd: Vec<Vec<u8>>,
    descriptors: Vec<Vec<u8>>,
}

impl Track {
    fn new(format: TrackFormat, pid: u16, stream_type: u8, stream_id: u8) -> Self {
        Self {
            format,
            pid,
            stream_type,
            stream_id,
            continuity_counter: 0,
            finalized: false,
            csd: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    fn next_continuity_counter(&mut self) -> u8 {
        let prev = self.continuity_counter;
        self.continuity_counter = (self.continuity_counter + 1) & 0x0F;
        prev
    }

    fn submit_csd(&mut self, data: &[u8]) {
        if !self.format.is_h264() {
            return;
        }
        for nal in nal_units(data) {
            let mut stored = Vec::with_capacity(NAL_PREFIX.len() + nal.len());
            stored.extend_from_slice(&NAL_PREFIX);
            stored.extend_from_slice(nal);
            self.csd.push(stored);
        }
    }

    fn prepend_csd(&self, access_unit: &[u8]) -> Vec<u8> {
        let csd_len: usize = self.csd.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(csd_len + access_unit.len());
        for fragment in &self.csd {
            out.extend_from_slice(fragment);
        }
        out.extend_from_slice(access_unit);
        out
    }

    /// Build the PMT descriptors on first emission. The descriptor
    /// profile/constraint/level bytes come from the first submitted SPS
    /// when one exists; the SPS is authoritative over the TrackFormat.
    fn finalize(&mut self) {
        if self.finalized || !self.format.is_h264() {
            return;
        }

        let mut avc = vec![AVC_VIDEO_DESCRIPTOR_TAG, 4];
        match self.csd.first() {
            Some(sps) if sps.len() >= NAL_PREFIX.len() + 4 => {
                // Skip the start code and the NAL header byte; the next
                // three bytes are profile_idc, constraint_set, level_idc.
                avc.extend_from_slice(&sps[NAL_PREFIX.len() + 1..NAL_PREFIX.len() + 4]);
            }
            _ => {
                avc.push(self.format.profile_idc);
                avc.push(self.format.constraint_set);
                avc.push(self.format.level_idc);
            }
        }
        // AVC_still_present=0, AVC_24_hour_picture_flag=0, reserved.
        avc.push(0x3F);
        self.descriptors.push(avc);

        // hrd_management_valid=0, picture_and_timing_info_present=0,
        // fixed_frame_rate=0, temporal_poc=0, picture_to_display=0.
        self.descriptors.push(vec![
            AVC_TIMING_AND_HRD_DESCRIPTOR_TAG,
            2,
            0x7E,
            0x1F,
        ]);

        self.finalized = true;
    }
}

/// Stateful MPEG-TS serializer, one per session.
///
/// Not thread-safe; owned and driven by the media sender's worker.
pub struct MpegTsPacketizer {
    tracks: Vec<Track>,
    pat_continuity_counter: u8,
    pmt_continuity_counter: u8,
}

impl MpegTsPacketizer {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            pat_continuity_counter: 0,
            pmt_continuity_counter: 0,
        }
    }

    fn track(&self, track: TrackId) -> Result<&Track> {
        self.tracks.get(track).ok_or(Error::InvalidTrack(track))
    }

    /// Program Association Table: one program (0x0001) mapping to the
    /// PMT PID.
    fn write_pat(&mut self, out: &mut Vec<u8>) {
        self.pat_continuity_counter = (self.pat_continuity_counter + 1) & 0x0F;

        let packet_start = out.len();
        out.extend_from_slice(&[
            0x47,
            0x40, // PUSI, PID 0
            0x00,
            0x10 | self.pat_continuity_counter,
            0x00, // pointer_field
        ]);

        let section_start = out.len();
        out.extend_from_slice(&[
            0x00, // table_id
            0xB0, // section_syntax_indicator, section_length high
            0x0D, // section_length low
            0x00, // transport_stream_id
            0x00,
            0xC3, // version 1, current_next_indicator
            0x00, // section_number
            0x00, // last_section_number
            0x00, // program_number 0x0001
            0x01,
            0xE0 | (PMT_PID >> 8) as u8,
            (PMT_PID & 0xFF) as u8,
        ]);

        let crc = crc32(&out[section_start..]);
        out.extend_from_slice(&crc.to_be_bytes());
        out.resize(packet_start + TS_PACKET_SIZE, 0xFF);
    }

    /// Program Map Table: PCR PID plus one elementary-stream entry per
    /// track with its AVC descriptors.
    fn write_pmt(&mut self, out: &mut Vec<u8>) {
        self.pmt_continuity_counter = (self.pmt_continuity_counter + 1) & 0x0F;

        for track in &mut self.tracks {
            track.finalize();
        }

        let packet_start = out.len();
        out.extend_from_slice(&[
            0x47,
            0x40 | (PMT_PID >> 8) as u8,
            (PMT_PID & 0xFF) as u8,
            0x10 | self.pmt_continuity_counter,
            0x00, // pointer_field
        ]);

        let section_start = out.len();
        out.extend_from_slice(&[
            0x02, // table_id
            0x00, // section_length, patched below
            0x00,
            0x00, // program_number 0x0001
            0x01,
            0xC3, // version 1, current_next_indicator
            0x00, // section_number
            0x00, // last_section_number
            0xE0 | (PCR_PID >> 8) as u8,
            (PCR_PID & 0xFF) as u8,
            0xF0, // program_info_length = 0
            0x00,
        ]);

        for track in &self.tracks {
            out.push(track.stream_type);
            out.push(0xE0 | (track.pid >> 8) as u8);
            out.push((track.pid & 0xFF) as u8);

            let es_info_length: usize = track.descriptors.iter().map(Vec::len).sum();
            debug_assert!(es_info_length <= 0xFFF);
            out.push(0xF0 | (es_info_length >> 8) as u8);
            out.push((es_info_length & 0xFF) as u8);
            for descriptor in &track.descriptors {
                out.extend_from_slice(descriptor);
            }
        }

        let section_length = out.len() - (section_start + 3) + 4;
        out[section_start + 1] = 0xB0 | (section_length >> 8) as u8;
        out[section_start + 2] = (section_length & 0xFF) as u8;

        let crc = crc32(&out[section_start..]);
        out.extend_from_slice(&crc.to_be_bytes());
        out.resize(packet_start + TS_PACKET_SIZE, 0xFF);
    }

    /// PCR-only packet: adaptation field without payload, fixed
    /// continuity counter of 0 since it never carries payload bytes.
    fn write_pcr(&mut self, out: &mut Vec<u8>) {
        let pcr = now_us() as u64 * 27; // 27 MHz clock
        let pcr_base = pcr / 300;
        let pcr_ext = (pcr % 300) as u32;

        let packet_start = out.len();
        out.extend_from_slice(&[
            0x47,
            0x40 | (PCR_PID >> 8) as u8,
            (PCR_PID & 0xFF) as u8,
            0x20, // adaptation field only
            0xB7, // adaptation_field_length = 183
            0x10, // PCR_flag
            (pcr_base >> 25) as u8,
            (pcr_base >> 17) as u8,
            (pcr_base >> 9) as u8,
            (pcr_base >> 1) as u8,
            (((pcr_base & 1) as u8) << 7) | 0x7E | ((pcr_ext >> 8) & 1) as u8,
            (pcr_ext & 0xFF) as u8,
        ]);
        out.resize(packet_start + TS_PACKET_SIZE, 0xFF);
    }

    /// Leading TS packet of a PES: stuffing (if the payload is short)
    /// via the adaptation field, then the 14-byte PES header with a
    /// 5-byte PTS, then the first payload fragment.
    fn write_pes_first(
        track: &mut Track,
        out: &mut Vec<u8>,
        access_unit: &[u8],
        timestamp_us: TimestampUs,
    ) -> usize {
        let mut pes_packet_length = access_unit.len() + 8;
        if pes_packet_length >= 65536 {
            // Valid for video per ISO/IEC 13818-1 §2.4.3.7.
            tracing::debug!(
                len = pes_packet_length,
                "PES packet too long, writing length 0"
            );
            pes_packet_length = 0;
        }

        let pts = (timestamp_us as u64 * 9) / 100;

        let copy = access_unit.len().min(FIRST_PACKET_PAYLOAD);
        let padding = FIRST_PACKET_PAYLOAD - copy;

        let packet_start = out.len();
        out.push(0x47);
        out.push(0x40 | (track.pid >> 8) as u8);
        out.push((track.pid & 0xFF) as u8);
        out.push(if padding > 0 { 0x30 } else { 0x10 } | track.next_continuity_counter());

        if padding > 0 {
            out.push((padding - 1) as u8);
            if padding >= 2 {
                out.push(0x00);
                out.resize(out.len() + padding - 2, 0xFF);
            }
        }

        out.extend_from_slice(&[
            0x00, // packet_startcode_prefix
            0x00,
            0x01,
            track.stream_id,
            (pes_packet_length >> 8) as u8,
            (pes_packet_length & 0xFF) as u8,
            0x84, // data_alignment_indicator
            0x80, // PTS only
            0x05, // PES_header_data_length
            0x20 | ((((pts >> 30) & 0x7) as u8) << 1) | 1,
            (pts >> 22) as u8,
            ((((pts >> 15) & 0x7F) as u8) << 1) | 1,
            (pts >> 7) as u8,
            (((pts & 0x7F) as u8) << 1) | 1,
        ]);

        out.extend_from_slice(&access_unit[..copy]);
        debug_assert_eq!(out.len(), packet_start + TS_PACKET_SIZE);
        copy
    }

    fn write_pes_continuation(track: &mut Track, out: &mut Vec<u8>, fragment: &[u8]) {
        let copy = fragment.len().min(CONT_PACKET_PAYLOAD);
        let padding = CONT_PACKET_PAYLOAD - copy;

        let packet_start = out.len();
        out.push(0x47);
        out.push((track.pid >> 8) as u8); // PUSI clear
        out.push((track.pid & 0xFF) as u8);
        out.push(if padding > 0 { 0x30 } else { 0x10 } | track.next_continuity_counter());

        if padding > 0 {
            out.push((padding - 1) as u8);
            if padding >= 2 {
                out.push(0x00);
                out.resize(out.len() + padding - 2, 0xFF);
            }
        }

        out.extend_from_slice(&fragment[..copy]);
        debug_assert_eq!(out.len(), packet_start + TS_PACKET_SIZE);
    }

    fn pes_packet_count(access_unit_len: usize) -> usize {
        let remaining = access_unit_len.saturating_sub(FIRST_PACKET_PAYLOAD);
        1 + remaining / CONT_PACKET_PAYLOAD + usize::from(remaining % CONT_PACKET_PAYLOAD != 0)
    }
}

impl Default for MpegTsPacketizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Packetizer for MpegTsPacketizer {
    fn add_track(&mut self, format: TrackFormat) -> Result<TrackId> {
        if !format.is_video() {
            tracing::error!(mime = %format.mime, "audio tracks are not supported");
            return Err(Error::UnsupportedTrackFormat(format.mime));
        }
        if !format.is_h264() {
            tracing::error!(mime = %format.mime, "only video/avc is supported");
            return Err(Error::UnsupportedTrackFormat(format.mime));
        }

        let mut same_type_tracks = 0u8;
        let mut pid = VIDEO_PID_START;
        for track in &self.tracks {
            if track.stream_type == H264_STREAM_TYPE {
                same_type_tracks += 1;
            }
            if track.format.is_video() {
                pid += 1;
            }
        }

        let stream_id = VIDEO_STREAM_ID_START + same_type_tracks;
        if stream_id > VIDEO_STREAM_ID_STOP {
            return Err(Error::StreamIdsExhausted);
        }

        tracing::debug!(pid, stream_id, "video track added");
        self.tracks
            .push(Track::new(format, pid, H264_STREAM_TYPE, stream_id));
        Ok(self.tracks.len() - 1)
    }

    fn submit_csd(&mut self, track: TrackId, buffer: &Arc<Buffer>) -> Result<()> {
        self.track(track)?;
        self.tracks[track].submit_csd(buffer.data());
        tracing::debug!(
            track,
            fragments = self.tracks[track].csd.len(),
            "codec-specific data stored"
        );
        Ok(())
    }

    fn packetize(
        &mut self,
        track: TrackId,
        access_unit: &Arc<Buffer>,
        packetize_flags: u32,
    ) -> Result<Arc<Buffer>> {
        self.track(track)?;

        if !access_unit.is_valid() {
            return Err(Error::PacketizeFailed("invalid access unit"));
        }

        let timestamp_us = access_unit.timestamp();

        let prepended;
        let au: &[u8] = if packetize_flags & flags::PREPEND_SPS_PPS_TO_IDR != 0
            && self.tracks[track].format.is_h264()
            && contains_idr(access_unit.data())
        {
            prepended = self.tracks[track].prepend_csd(access_unit.data());
            &prepended
        } else {
            access_unit.data()
        };

        let mut packets = Self::pes_packet_count(au.len());
        if packetize_flags & flags::EMIT_PAT_AND_PMT != 0 {
            packets += 2;
        }
        if packetize_flags & flags::EMIT_PCR != 0 {
            packets += 1;
        }

        let mut out = Vec::with_capacity(packets * TS_PACKET_SIZE);

        if packetize_flags & flags::EMIT_PAT_AND_PMT != 0 {
            self.write_pat(&mut out);
            self.write_pmt(&mut out);
        }
        if packetize_flags & flags::EMIT_PCR != 0 {
            self.write_pcr(&mut out);
        }

        let track = &mut self.tracks[track];
        let mut offset = Self::write_pes_first(track, &mut out, au, timestamp_us);
        while offset < au.len() {
            let fragment_len = (au.len() - offset).min(CONT_PACKET_PAYLOAD);
            Self::write_pes_continuation(track, &mut out, &au[offset..offset + fragment_len]);
            offset += fragment_len;
        }

        debug_assert_eq!(out.len(), packets * TS_PACKET_SIZE);

        Ok(Buffer::with_timestamp(out, timestamp_us))
    }
}
