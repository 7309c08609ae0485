//! Pinning window arithmetic.
//!
//! A view with reference time `t` covers the raw interval `[t - D, t + D]`,
//! where `D` is half of the configured pinning duration. The reconciler snaps
//! those raw boundaries to real data timestamps before issuing any update.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Returns `(min, max)` of two instants.
///
/// Comparison is done on epoch seconds with `<=`, so two instants within the
/// same second keep their argument order.
pub fn ordered_pair(a: DateTime<Utc>, b: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    if a.timestamp() <= b.timestamp() {
        (a, b)
    } else {
        (b, a)
    }
}

/// Closed interval `[start, end]` of instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Builds a range, swapping the bounds if they are reversed.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Half-width of the pinning window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinningWindow {
    half_width: Duration,
}

impl PinningWindow {
    /// Window derived from the configured pinning duration in minutes.
    ///
    /// The duration is the full width, so `D` is half of it: one minute gives
    /// a 30 second half-width.
    pub fn from_minutes(minutes: u32) -> Self {
        Self {
            half_width: Duration::seconds(i64::from(minutes) * 30),
        }
    }

    pub fn from_half_width(half_width: Duration) -> Self {
        Self {
            half_width: half_width.abs(),
        }
    }

    pub fn half_width(&self) -> Duration {
        self.half_width
    }

    /// Raw interval `[t - D, t + D]`.
    pub fn around(&self, t: DateTime<Utc>) -> TimeRange {
        TimeRange::new(t - self.half_width, t + self.half_width)
    }

    /// Raw interval covering the windows of both instants.
    pub fn hull(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> TimeRange {
        let (lo, hi) = ordered_pair(a, b);
        TimeRange::new(lo - self.half_width, hi + self.half_width)
    }

    /// Whether the windows around `original` and `candidate` share any instant.
    pub fn overlaps(&self, original: DateTime<Utc>, candidate: DateTime<Utc>) -> bool {
        (candidate - original).abs() <= self.half_width * 2
    }
}
