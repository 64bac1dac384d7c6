use crate::errors::TimestampError;
use crate::time::MediaTime;

const TIMESTAMP_MAP: &str = "X-TIMESTAMP-MAP=";

/// Links a WebVTT cue time to an MPEG-TS timestamp, so subtitles share the
/// media's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampMap {
    /// Raw 33-bit 90 kHz timestamp
    pub mpegts: u64,
    /// Cue time that `mpegts` corresponds to
    pub local: MediaTime,
}

/// Read the `X-TIMESTAMP-MAP` header of a WebVTT prefix, if it has one.
pub fn timestamp_map(data: &[u8]) -> Result<Option<TimestampMap>, TimestampError> {
    let text = String::from_utf8_lossy(data);
    let mut lines = text.lines();

    let signature = lines.next().unwrap_or_default().trim_start_matches('\u{feff}');
    if !signature.starts_with("WEBVTT") {
        return Err(TimestampError::NotWebVtt);
    }

    // header ends at the first blank line
    for line in lines.map(str::trim).take_while(|line| !line.is_empty()) {
        if let Some(value) = line.strip_prefix(TIMESTAMP_MAP) {
            return parse_map(value).map(Some);
        }
    }
    Ok(None)
}

fn parse_map(value: &str) -> Result<TimestampMap, TimestampError> {
    let invalid = || TimestampError::InvalidTimestampMap {
        value: value.to_string(),
    };

    let mut mpegts = None;
    let mut local = None;
    for pair in value.split(',') {
        let (key, val) = pair.trim().split_once(':').ok_or_else(invalid)?;
        match key {
            "MPEGTS" => mpegts = Some(val.parse::<u64>().map_err(|_| invalid())?),
            "LOCAL" => local = Some(parse_cue_time(val).ok_or_else(invalid)?),
            _ => {}
        }
    }

    match (mpegts, local) {
        (Some(mpegts), Some(local)) => Ok(TimestampMap { mpegts, local }),
        _ => Err(invalid()),
    }
}

/// Parse `hh:mm:ss.ttt` or `mm:ss.ttt`.
pub fn parse_cue_time(value: &str) -> Option<MediaTime> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, *s),
        [m, s] => (0, m.parse::<u64>().ok()?, *s),
        _ => return None,
    };
    if minutes >= 60 {
        return None;
    }
    let seconds = MediaTime::parse_secs(seconds, 1000)?;
    if seconds >= MediaTime::from_secs(60) {
        return None;
    }
    let whole = MediaTime::from_secs(hours.checked_mul(3600)?.checked_add(minutes * 60)?);
    whole.checked_add(seconds)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const MAPPED_VTT: &str = "WEBVTT\n\
        X-TIMESTAMP-MAP=MPEGTS:8589870000,LOCAL:00:00:00.000\n\
        \n\
        00:00.000 --> 00:01.000\n\
        Hello\n";

    #[test]
    fn test_reads_timestamp_map() {
        let map = timestamp_map(MAPPED_VTT.as_bytes()).unwrap().unwrap();
        assert_eq!(map.mpegts, 8_589_870_000);
        assert!(map.local.is_zero());
    }

    #[test]
    fn test_local_offset_and_attribute_order() {
        let data = "\u{feff}WEBVTT - captions\r\nX-TIMESTAMP-MAP=LOCAL:01:00:02.500,MPEGTS:900000\r\n\r\n";
        let map = timestamp_map(data.as_bytes()).unwrap().unwrap();
        assert_eq!(map.mpegts, 900_000);
        assert_eq!(map.local, MediaTime::new(3_602_500, 1000));
    }

    #[test]
    fn test_map_after_header_is_ignored() {
        let data = "WEBVTT\n\n00:00.000 --> 00:01.000\nX-TIMESTAMP-MAP=MPEGTS:1,LOCAL:00:00.000\n";
        assert_eq!(timestamp_map(data.as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(
            timestamp_map(b"1\n00:00.000 --> 00:01.000\n"),
            Err(TimestampError::NotWebVtt)
        );
        assert!(matches!(
            timestamp_map(b"WEBVTT\nX-TIMESTAMP-MAP=MPEGTS:abc,LOCAL:00:00.000\n"),
            Err(TimestampError::InvalidTimestampMap { .. })
        ));
        assert!(matches!(
            timestamp_map(b"WEBVTT\nX-TIMESTAMP-MAP=MPEGTS:100\n"),
            Err(TimestampError::InvalidTimestampMap { .. })
        ));
    }

    #[test]
    fn test_cue_time_forms() {
        assert_eq!(parse_cue_time("01:02.250"), Some(MediaTime::new(62_250, 1000)));
        assert_eq!(parse_cue_time("00:61:00.000"), None);
        assert_eq!(parse_cue_time("12"), None);
    }
}
