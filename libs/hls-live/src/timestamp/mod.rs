//! Reads the presentation time of a segment's first sample from a short
//! prefix of the segment.

pub mod mp4;
pub mod ts;
pub mod vtt;

use url::Url;

use crate::errors::TimestampError;
use crate::playlist::ByteRange;
use crate::rollover::RolloverState;
use crate::time::MediaTime;

/// Bytes fetched from the start of a segment when looking for its timestamp.
pub const DEFAULT_PROBE_BYTES: u64 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFormat {
    Mp4,
    MpegTs,
    WebVtt,
}

impl SegmentFormat {
    /// Guess the container from the path extension.
    pub fn from_uri(uri: &Url) -> Option<Self> {
        let path = uri.path();
        let (_, extension) = path.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "ts" | "m2ts" | "mts" => Some(SegmentFormat::MpegTs),
            "vtt" | "webvtt" => Some(SegmentFormat::WebVtt),
            "mp4" | "m4s" | "m4v" | "m4a" | "m4f" | "cmfv" | "cmfa" => Some(SegmentFormat::Mp4),
            _ => None,
        }
    }

    /// Guess the container from the first bytes.
    pub fn sniff(prefix: &[u8]) -> Self {
        let text = prefix.strip_prefix(b"\xef\xbb\xbf").unwrap_or(prefix);
        if prefix.first() == Some(&ts::SYNC_BYTE) {
            SegmentFormat::MpegTs
        } else if text.starts_with(b"WEBVTT") {
            SegmentFormat::WebVtt
        } else {
            SegmentFormat::Mp4
        }
    }
}

/// A timestamp as found in the segment, before rollover correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTimestamp {
    /// MP4 decode time, from a clock that never wraps
    Media(MediaTime),
    /// 33-bit 90 kHz PTS
    Pts(u64),
    TextMapped(vtt::TimestampMap),
    /// WebVTT without `X-TIMESTAMP-MAP`
    TextUnmapped,
}

impl RawTimestamp {
    /// Place the timestamp on the stream's corrected clock, updating its
    /// rollover state.
    pub fn resolve(self, rollover: &mut RolloverState) -> MediaTime {
        match self {
            RawTimestamp::Media(time) => {
                rollover.observe(time);
                time
            }
            RawTimestamp::Pts(raw) => rollover.unroll(raw),
            RawTimestamp::TextMapped(map) => rollover.unroll(map.mpegts).saturating_sub(map.local),
            RawTimestamp::TextUnmapped => rollover.offset(),
        }
    }
}

/// Read the first timestamp of `segment`. `init` is the stream's init
/// segment, if the playlist has one.
pub fn read_timestamp(
    format: SegmentFormat,
    init: Option<&[u8]>,
    segment: &[u8],
) -> Result<RawTimestamp, TimestampError> {
    match format {
        SegmentFormat::Mp4 => mp4::start_time(init, segment).map(RawTimestamp::Media),
        SegmentFormat::MpegTs => ts::first_pts(segment).map(RawTimestamp::Pts),
        SegmentFormat::WebVtt => Ok(match vtt::timestamp_map(segment)? {
            Some(map) => RawTimestamp::TextMapped(map),
            None => RawTimestamp::TextUnmapped,
        }),
    }
}

/// Bytes to request when probing a segment: `probe_bytes` from the start of
/// its range, never past the range's end.
pub fn probe_range(byte_range: Option<ByteRange>, probe_bytes: u64) -> ByteRange {
    let probe_bytes = probe_bytes.max(1);
    match byte_range {
        Some(range) => ByteRange::new(
            range.start,
            range.end.min(range.start.saturating_add(probe_bytes - 1)),
        ),
        None => ByteRange::new(0, probe_bytes - 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollover::{rollover_period, ROLLOVER_TICKS};
    use crate::time::TS_TIMESCALE;

    #[test]
    fn test_format_from_uri() {
        let uri = |s: &str| Url::parse(s).unwrap();
        assert_eq!(
            SegmentFormat::from_uri(&uri("https://cdn.test/v/seg1.TS?token=1")),
            Some(SegmentFormat::MpegTs)
        );
        assert_eq!(
            SegmentFormat::from_uri(&uri("https://cdn.test/v/seg1.m4s")),
            Some(SegmentFormat::Mp4)
        );
        assert_eq!(
            SegmentFormat::from_uri(&uri("https://cdn.test/subs/en/1.vtt")),
            Some(SegmentFormat::WebVtt)
        );
        assert_eq!(SegmentFormat::from_uri(&uri("https://cdn.test/v/segment")), None);
    }

    #[test]
    fn test_sniff() {
        assert_eq!(
            SegmentFormat::sniff(&ts::tests::PTS_2S_PACKET),
            SegmentFormat::MpegTs
        );
        assert_eq!(
            SegmentFormat::sniff(vtt::tests::MAPPED_VTT.as_bytes()),
            SegmentFormat::WebVtt
        );
        assert_eq!(
            SegmentFormat::sniff(&mp4::tests::INIT_SEGMENT),
            SegmentFormat::Mp4
        );
    }

    #[test]
    fn test_probe_range() {
        let range = ByteRange::from_length(121_090, 616).unwrap();
        assert_eq!(
            probe_range(Some(range), DEFAULT_PROBE_BYTES),
            ByteRange::new(616, 616 + 2048 - 1)
        );
        assert_eq!(
            probe_range(Some(ByteRange::new(10, 99)), DEFAULT_PROBE_BYTES),
            ByteRange::new(10, 99)
        );
        assert_eq!(probe_range(None, DEFAULT_PROBE_BYTES), ByteRange::new(0, 2047));
    }

    #[test]
    fn test_ts_start_time() {
        let mut rollover = RolloverState::new();
        let raw = read_timestamp(SegmentFormat::MpegTs, None, &ts::tests::PTS_2S_PACKET).unwrap();
        assert_eq!(raw.resolve(&mut rollover).as_secs_f64(), 2.0);
    }

    #[test]
    fn test_text_resolves_against_video_rollover() {
        let mut rollover = RolloverState::new();
        let mut video = mp4::tests::INIT_SEGMENT.to_vec();
        video.extend_from_slice(&mp4::tests::fragment(190_889_000));
        read_timestamp(SegmentFormat::Mp4, None, &video)
            .unwrap()
            .resolve(&mut rollover);

        let text = read_timestamp(
            SegmentFormat::WebVtt,
            None,
            vtt::tests::MAPPED_VTT.as_bytes(),
        )
        .unwrap()
        .resolve(&mut rollover);

        let offset = rollover_period() + rollover_period();
        assert_eq!(rollover.offset(), offset);
        assert_eq!(text, offset + MediaTime::new(8_589_870_000, TS_TIMESCALE));
        let expected = 8_589_870_000.0 / 90_000.0 + 2.0 * ROLLOVER_TICKS as f64 / 90_000.0;
        assert!((text.as_secs_f64() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_unmapped_text_uses_current_offset() {
        let mut rollover = RolloverState::with_floor(1, None);
        let raw = read_timestamp(SegmentFormat::WebVtt, None, b"WEBVTT\n\n").unwrap();
        assert_eq!(raw, RawTimestamp::TextUnmapped);
        assert_eq!(raw.resolve(&mut rollover), rollover_period());
    }
}
