//! WFD H.264 video format negotiation types.
//!
//! Wi-Fi Display advertises codec capability as a profile, a level, and
//! a bitmap of CEA rate/resolution entries; source and sink exchange
//! these during the RTSP M3/M4 phase and the source picks the best
//! common format. Only the CEA table is modelled; the source never
//! advertises VESA or handheld entries.

/// CEA rate/resolution table entries, in WFD bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CeaRate {
    Cea640x480p60 = 0,
    Cea720x480p60,
    Cea720x480i60,
    Cea720x576p50,
    Cea720x576i50,
    Cea1280x720p30,
    Cea1280x720p60,
    Cea1920x1080p30,
    Cea1920x1080p60,
    Cea1920x1080i60,
    Cea1280x720p25,
    Cea1280x720p50,
    Cea1920x1080p25,
    Cea1920x1080p50,
    Cea1920x1080i50,
    Cea1280x720p24,
    Cea1920x1080p24,
}

impl CeaRate {
    pub const ALL: [CeaRate; 17] = [
        CeaRate::Cea640x480p60,
        CeaRate::Cea720x480p60,
        CeaRate::Cea720x480i60,
        CeaRate::Cea720x576p50,
        CeaRate::Cea720x576i50,
        CeaRate::Cea1280x720p30,
        CeaRate::Cea1280x720p60,
        CeaRate::Cea1920x1080p30,
        CeaRate::Cea1920x1080p60,
        CeaRate::Cea1920x1080i60,
        CeaRate::Cea1280x720p25,
        CeaRate::Cea1280x720p50,
        CeaRate::Cea1920x1080p25,
        CeaRate::Cea1920x1080p50,
        CeaRate::Cea1920x1080i50,
        CeaRate::Cea1280x720p24,
        CeaRate::Cea1920x1080p24,
    ];

    /// Width, height and framerate for this table entry. Interlaced
    /// entries report their field rate.
    pub fn rate_and_resolution(self) -> RateAndResolution {
        use CeaRate::*;
        let (width, height, framerate) = match self {
            Cea640x480p60 => (640, 480, 60),
            Cea720x480p60 | Cea720x480i60 => (720, 480, 60),
            Cea720x576p50 | Cea720x576i50 => (720, 576, 50),
            Cea1280x720p24 => (1280, 720, 24),
            Cea1280x720p25 => (1280, 720, 25),
            Cea1280x720p30 => (1280, 720, 30),
            Cea1280x720p50 => (1280, 720, 50),
            Cea1280x720p60 => (1280, 720, 60),
            Cea1920x1080p24 => (1920, 1080, 24),
            Cea1920x1080p25 => (1920, 1080, 25),
            Cea1920x1080p30 => (1920, 1080, 30),
            Cea1920x1080p50 | Cea1920x1080i50 => (1920, 1080, 50),
            Cea1920x1080p60 | Cea1920x1080i60 => (1920, 1080, 60),
        };
        RateAndResolution {
            width,
            height,
            framerate,
        }
    }
}

impl std::fmt::Display for CeaRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rr = self.rate_and_resolution();
        write!(f, "{}x{}p{}", rr.width, rr.height, rr.framerate)
    }
}

/// Concrete dimensions and framerate extracted from a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateAndResolution {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

/// Bitmap over [`CeaRate`] entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RatesBitmap(u32);

impl RatesBitmap {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn set(&mut self, rate: CeaRate) -> &mut Self {
        self.0 |= 1 << rate as u32;
        self
    }

    pub fn test(&self, rate: CeaRate) -> bool {
        self.0 & (1 << rate as u32) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn intersect(&self, other: &RatesBitmap) -> RatesBitmap {
        RatesBitmap(self.0 & other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = CeaRate> + '_ {
        CeaRate::ALL.into_iter().filter(|rate| self.test(*rate))
    }
}

/// H.264 profiles negotiable over WFD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum H264Profile {
    ConstrainedBaseline,
    ConstrainedHigh,
}

/// H.264 levels negotiable over WFD, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum H264Level {
    L3_1,
    L3_2,
    L4,
    L4_1,
    L4_2,
}

impl std::fmt::Display for H264Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            H264Level::L3_1 => "3.1",
            H264Level::L3_2 => "3.2",
            H264Level::L4 => "4",
            H264Level::L4_1 => "4.1",
            H264Level::L4_2 => "4.2",
        };
        f.write_str(s)
    }
}

/// One advertised codec: a profile/level pair with the rates it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H264VideoCodec {
    pub profile: H264Profile,
    pub level: H264Level,
    pub cea: RatesBitmap,
}

/// The single negotiated format a session streams with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H264VideoFormat {
    pub profile: H264Profile,
    pub level: H264Level,
    pub rate_resolution: CeaRate,
}

impl H264VideoFormat {
    pub fn rate_and_resolution(&self) -> RateAndResolution {
        self.rate_resolution.rate_and_resolution()
    }

    /// The on-wire `profile_idc`/`constraint_set`/`level_idc` bytes for
    /// this format, as carried in the SPS and the PMT AVC descriptor.
    pub fn profile_level(&self) -> ProfileLevel {
        let (profile_idc, constraint_set) = match self.profile {
            H264Profile::ConstrainedBaseline => (66, 0xC0),
            H264Profile::ConstrainedHigh => (100, 0x0C),
        };
        let level_idc = match self.level {
            H264Level::L3_1 => 31,
            H264Level::L3_2 => 32,
            H264Level::L4 => 40,
            H264Level::L4_1 => 41,
            H264Level::L4_2 => 42,
        };
        ProfileLevel {
            profile_idc,
            constraint_set,
            level_idc,
        }
    }
}

impl std::fmt::Display for H264VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let profile = match self.profile {
            H264Profile::ConstrainedBaseline => "cbp",
            H264Profile::ConstrainedHigh => "chp",
        };
        write!(f, "{} {} level {}", self.rate_resolution, profile, self.level)
    }
}

/// `profile_idc`, `constraint_set*` flags and `level_idc` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileLevel {
    pub profile_idc: u8,
    pub constraint_set: u8,
    pub level_idc: u8,
}

/// Pick the best format both sides support.
///
/// Codec pairs are matched by profile; within the intersected rate
/// bitmaps, candidates rank by (profile, area, framerate). The level is
/// the lower of the pair's, so the stream never exceeds what either
/// side decodes.
pub fn find_optimal_video_format(
    local: &[H264VideoCodec],
    sink: &[H264VideoCodec],
) -> Option<H264VideoFormat> {
    let mut best: Option<(H264VideoFormat, (H264Profile, u64, u32))> = None;

    for local_codec in local {
        for sink_codec in sink {
            if local_codec.profile != sink_codec.profile {
                continue;
            }

            let common = local_codec.cea.intersect(&sink_codec.cea);
            for rate in common.iter() {
                let rr = rate.rate_and_resolution();
                let rank = (
                    local_codec.profile,
                    rr.width as u64 * rr.height as u64,
                    rr.framerate,
                );
                if best.as_ref().is_none_or(|(_, current)| rank > *current) {
                    best = Some((
                        H264VideoFormat {
                            profile: local_codec.profile,
                            level: local_codec.level.min(sink_codec.level),
                            rate_resolution: rate,
                        },
                        rank,
                    ));
                }
            }
        }
    }

    best.map(|(format, _)| format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(profile: H264Profile, level: H264Level, rates: &[CeaRate]) -> H264VideoCodec {
        let mut cea = RatesBitmap::new();
        for rate in rates {
            cea.set(*rate);
        }
        H264VideoCodec {
            profile,
            level,
            cea,
        }
    }

    #[test]
    fn bitmap_set_test_intersect() {
        let mut a = RatesBitmap::new();
        a.set(CeaRate::Cea1280x720p30).set(CeaRate::Cea1280x720p25);
        let mut b = RatesBitmap::new();
        b.set(CeaRate::Cea1280x720p30).set(CeaRate::Cea1920x1080p30);

        let common = a.intersect(&b);
        assert!(common.test(CeaRate::Cea1280x720p30));
        assert!(!common.test(CeaRate::Cea1280x720p25));
        assert!(!common.test(CeaRate::Cea1920x1080p30));
    }

    #[test]
    fn rate_extraction_720p30() {
        let rr = CeaRate::Cea1280x720p30.rate_and_resolution();
        assert_eq!((rr.width, rr.height, rr.framerate), (1280, 720, 30));
    }

    #[test]
    fn profile_level_bytes() {
        let format = H264VideoFormat {
            profile: H264Profile::ConstrainedBaseline,
            level: H264Level::L3_1,
            rate_resolution: CeaRate::Cea1280x720p30,
        };
        let pl = format.profile_level();
        assert_eq!((pl.profile_idc, pl.constraint_set, pl.level_idc), (66, 0xC0, 31));

        let high = H264VideoFormat {
            profile: H264Profile::ConstrainedHigh,
            level: H264Level::L4_2,
            rate_resolution: CeaRate::Cea1920x1080p60,
        };
        let pl = high.profile_level();
        assert_eq!((pl.profile_idc, pl.constraint_set, pl.level_idc), (100, 0x0C, 42));
    }

    #[test]
    fn negotiation_picks_highest_common_rate() {
        let local = [codec(
            H264Profile::ConstrainedBaseline,
            H264Level::L3_1,
            &[
                CeaRate::Cea1280x720p24,
                CeaRate::Cea1280x720p25,
                CeaRate::Cea1280x720p30,
            ],
        )];
        let sink = [codec(
            H264Profile::ConstrainedBaseline,
            H264Level::L4,
            &[CeaRate::Cea1280x720p25, CeaRate::Cea1280x720p30],
        )];

        let format = find_optimal_video_format(&local, &sink).unwrap();
        assert_eq!(format.rate_resolution, CeaRate::Cea1280x720p30);
        assert_eq!(format.profile, H264Profile::ConstrainedBaseline);
        // Level is capped by the lower of the pair.
        assert_eq!(format.level, H264Level::L3_1);
    }

    #[test]
    fn negotiation_prefers_higher_profile() {
        let rates = [CeaRate::Cea1280x720p30];
        let local = [
            codec(H264Profile::ConstrainedBaseline, H264Level::L3_1, &rates),
            codec(H264Profile::ConstrainedHigh, H264Level::L3_1, &rates),
        ];
        let sink = [
            codec(H264Profile::ConstrainedBaseline, H264Level::L3_1, &rates),
            codec(H264Profile::ConstrainedHigh, H264Level::L3_1, &rates),
        ];

        let format = find_optimal_video_format(&local, &sink).unwrap();
        assert_eq!(format.profile, H264Profile::ConstrainedHigh);
    }

    #[test]
    fn negotiation_fails_without_common_rate() {
        let local = [codec(
            H264Profile::ConstrainedBaseline,
            H264Level::L3_1,
            &[CeaRate::Cea1280x720p30],
        )];
        let sink = [codec(
            H264Profile::ConstrainedBaseline,
            H264Level::L3_1,
            &[CeaRate::Cea1920x1080p30],
        )];
        assert!(find_optimal_video_format(&local, &sink).is_none());
    }

    #[test]
    fn negotiation_requires_matching_profile() {
        let rates = [CeaRate::Cea1280x720p30];
        let local = [codec(H264Profile::ConstrainedBaseline, H264Level::L3_1, &rates)];
        let sink = [codec(H264Profile::ConstrainedHigh, H264Level::L3_1, &rates)];
        assert!(find_optimal_video_format(&local, &sink).is_none());
    }
}
