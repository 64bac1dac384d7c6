use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Clock rate of MPEG-TS presentation timestamps.
pub const TS_TIMESCALE: u32 = 90_000;

/// Timescale of every time stored in a segment index.
///
/// 9 MHz is a common multiple of the 90 kHz MPEG-TS clock and of one
/// microsecond, so PTS values and `EXTINF` decimals with up to six fractional
/// digits are represented exactly.
pub const TIMELINE_TIMESCALE: u32 = 9_000_000;

/// A point or span on a media clock, kept as a `(ticks, timescale)` pair.
///
/// Values are only turned into floating point seconds at the API boundary, so
/// durations accumulated across many playlist updates never drift.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    ticks: u64,
    timescale: u32,
}

impl MediaTime {
    pub const fn new(ticks: u64, timescale: u32) -> Self {
        Self {
            ticks,
            // a zero clock rate has no meaning, treat it as 1 Hz
            timescale: if timescale == 0 { 1 } else { timescale },
        }
    }

    pub const fn zero() -> Self {
        Self::new(0, TIMELINE_TIMESCALE)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self::new(secs.saturating_mul(TIMELINE_TIMESCALE as u64), TIMELINE_TIMESCALE)
    }

    pub const fn ticks(self) -> u64 {
        self.ticks
    }

    pub const fn timescale(self) -> u32 {
        self.timescale
    }

    pub const fn is_zero(self) -> bool {
        self.ticks == 0
    }

    /// Parse a non-negative decimal number of seconds such as `2`, `2.002` or `10.`.
    ///
    /// The value is rounded to the nearest tick of `timescale`.
    pub fn parse_secs(value: &str, timescale: u32) -> Option<Self> {
        let value = value.trim();
        let (int_part, frac_part) = value.split_once('.').unwrap_or((value, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        // digits past 10^-18 cannot change the result at any u32 timescale
        let frac_part = &frac_part[..frac_part.len().min(18)];
        let int: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().ok()?
        };
        let frac: u128 = if frac_part.is_empty() {
            0
        } else {
            frac_part.parse().ok()?
        };
        let denom = 10u128.pow(frac_part.len() as u32);
        let numer = int.checked_mul(denom)?.checked_add(frac)?;
        let ticks = div_round(numer.checked_mul(timescale as u128)?, denom);
        Some(Self::new(u64::try_from(ticks).ok()?, timescale))
    }

    /// Convert to another timescale, rounding to the nearest tick.
    pub fn rescale(self, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return self;
        }
        let ticks = div_round(
            self.ticks as u128 * timescale as u128,
            self.timescale as u128,
        );
        Self::new(u64::try_from(ticks).unwrap_or(u64::MAX), timescale)
    }

    /// Add `other`, expressed in this value's timescale.
    pub fn checked_add(self, other: Self) -> Option<Self> {
        let other = other.rescale(self.timescale);
        Some(Self::new(self.ticks.checked_add(other.ticks)?, self.timescale))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        let other = other.rescale(self.timescale);
        Self::new(self.ticks.saturating_sub(other.ticks), self.timescale)
    }

    pub fn as_secs_f64(self) -> f64 {
        let scale = self.timescale as u64;
        (self.ticks / scale) as f64 + (self.ticks % scale) as f64 / scale as f64
    }

    fn cross(self, other: Self) -> (u128, u128) {
        (
            self.ticks as u128 * other.timescale as u128,
            other.ticks as u128 * self.timescale as u128,
        )
    }
}

fn div_round(numer: u128, denom: u128) -> u128 {
    (numer + denom / 2) / denom
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: Self) -> Self::Output {
        let rhs = rhs.rescale(self.timescale);
        Self::new(self.ticks.saturating_add(rhs.ticks), self.timescale)
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(*other);
        a == b
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(*other);
        a.cmp(&b)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}
