//! MPEG-TS timestamps are 33-bit counters of a 90 kHz clock and wrap roughly
//! every 26.5 hours. [`RolloverState`] tracks how many wraps a stream has
//! gone through so every raw timestamp lands on one increasing timeline.

use crate::time::{MediaTime, TS_TIMESCALE};

/// Ticks in one full turn of the 33-bit MPEG-TS clock.
pub const ROLLOVER_TICKS: u64 = 1 << 33;

const TIMESTAMP_MASK: u64 = ROLLOVER_TICKS - 1;

/// How far a timestamp may step backwards (encoder jitter, tracks that are
/// slightly out of step) before it is treated as having wrapped.
pub const BACKWARD_TOLERANCE: MediaTime = MediaTime::new(10 * TS_TIMESCALE as u64, TS_TIMESCALE);

/// Length of one wrap on the MPEG-TS clock.
pub const fn rollover_period() -> MediaTime {
    MediaTime::new(ROLLOVER_TICKS, TS_TIMESCALE)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloverState {
    /// Wraps applied so far, never decreases
    count: u64,
    /// Largest unrolled timestamp seen, on the 90 kHz clock
    last: Option<u64>,
}

impl RolloverState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state as if `count` wraps had happened and `last` was the
    /// latest unrolled timestamp.
    pub fn with_floor(count: u64, last: Option<MediaTime>) -> Self {
        Self {
            count,
            last: last.map(|t| t.rescale(TS_TIMESCALE).ticks()),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn last(&self) -> Option<MediaTime> {
        self.last.map(|ticks| MediaTime::new(ticks, TS_TIMESCALE))
    }

    /// Time added to raw timestamps by the wraps seen so far.
    pub fn offset(&self) -> MediaTime {
        MediaTime::new(self.count.saturating_mul(ROLLOVER_TICKS), TS_TIMESCALE)
    }

    /// Record a time read from a clock that does not wrap, such as an MP4
    /// decode time, and raise the floor to the wraps it implies.
    pub fn observe(&mut self, absolute: MediaTime) {
        let ticks = absolute.rescale(TS_TIMESCALE).ticks();
        self.count = self.count.max(ticks / ROLLOVER_TICKS);
        self.last = Some(self.last.map_or(ticks, |last| last.max(ticks)));
    }

    /// Turn a raw 33-bit timestamp into an absolute one.
    ///
    /// The smallest wrap count, not below the current floor, that puts the
    /// timestamp no further than [`BACKWARD_TOLERANCE`] behind the last
    /// unrolled value is chosen and becomes the new floor.
    pub fn unroll(&mut self, raw: u64) -> MediaTime {
        let raw = raw & TIMESTAMP_MASK;
        let tolerance = BACKWARD_TOLERANCE.ticks();
        let needed = match self.last {
            Some(last) if last.saturating_sub(tolerance) > raw => {
                (last.saturating_sub(tolerance) - raw).div_ceil(ROLLOVER_TICKS)
            }
            _ => 0,
        };
        self.count = self.count.max(needed);

        let unrolled = raw.saturating_add(self.count.saturating_mul(ROLLOVER_TICKS));
        self.last = Some(self.last.map_or(unrolled, |last| last.max(unrolled)));
        MediaTime::new(unrolled, TS_TIMESCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_wrap_without_history() {
        let mut state = RolloverState::new();
        assert_eq!(state.unroll(180_000), MediaTime::from_secs(2));
        assert_eq!(state.count(), 0);
    }

    #[test]
    fn test_two_wraps_past_reference() {
        let reference = rollover_period() + rollover_period() + MediaTime::from_secs(1);
        let mut state = RolloverState::new();
        state.observe(reference);
        assert_eq!(state.count(), 2);

        let corrected = state.unroll(3 * TS_TIMESCALE as u64);
        let expected = 2.0 * (ROLLOVER_TICKS as f64 / TS_TIMESCALE as f64) + 3.0;
        assert!((corrected.as_secs_f64() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_wrap_detected_between_timestamps() {
        let mut state = RolloverState::new();
        // ~0.7s before the wrap, then ~1.3s after it
        let before = state.unroll(8_589_870_000);
        let after = state.unroll(115_408);
        assert_eq!(state.count(), 1);
        assert!(after > before);
        assert_eq!(after.ticks(), ROLLOVER_TICKS + 115_408);
    }

    #[test]
    fn test_jitter_within_tolerance_keeps_count() {
        let mut state = RolloverState::with_floor(0, Some(MediaTime::from_secs(100)));
        let corrected = state.unroll(99 * TS_TIMESCALE as u64);
        assert_eq!(state.count(), 0);
        assert_eq!(corrected, MediaTime::from_secs(99));
    }

    #[test]
    fn test_monotonic_over_many_wraps() {
        let mut state = RolloverState::new();
        let mut previous: Option<MediaTime> = None;
        let step = ROLLOVER_TICKS / 7;
        let mut raw = 0u64;
        for _ in 0..40 {
            raw = (raw + step) & TIMESTAMP_MASK;
            let corrected = state.unroll(raw);
            if let Some(previous) = previous {
                assert!(corrected + BACKWARD_TOLERANCE >= previous);
                assert!(corrected > previous);
            }
            previous = Some(corrected);
        }
        assert!(state.count() >= 5);
    }

    #[test]
    fn test_text_map_uses_video_floor() {
        let mut state = RolloverState::new();
        // video fragment decode time of 190889 s on a 1 kHz clock
        state.observe(MediaTime::new(190_889_000, 1000));
        assert_eq!(state.count(), 2);
        let text = state.unroll(8_589_870_000);
        let offset = state.offset();
        assert_eq!(text, offset + MediaTime::new(8_589_870_000, TS_TIMESCALE));
        assert!(text.as_secs_f64() >= offset.as_secs_f64());
    }
}
