//! Clock and timing utilities for sample timestamps.
//!
//! Every sample handed to the writer carries a presentation timestamp in
//! the capture source's timebase. This module provides:
//! - [`MediaTime`], the signed nanosecond timestamp used on both the input
//!   and the output side of the writer
//! - [`RecordingClock`], a monotonic epoch for sources that stamp their own
//!   samples
//! - [`DriftMeasurement`], used to compare where two tracks ended up

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A presentation timestamp or duration in nanoseconds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MediaTime(i64);

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * NANOS_PER_SEC as f64).round() as i64)
    }

    /// Duration of one frame at the given rate.
    pub fn frame_duration(fps: u32) -> Self {
        Self(NANOS_PER_SEC / fps.max(1) as i64)
    }

    /// Duration of `frames` audio frames at `sample_rate`.
    pub fn from_audio_frames(frames: u32, sample_rate: u32) -> Self {
        Self(frames as i64 * NANOS_PER_SEC / sample_rate.max(1) as i64)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub fn max(self, other: Self) -> Self {
        Self(self.0.max(other.0))
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl From<Duration> for MediaTime {
    fn from(d: Duration) -> Self {
        Self(d.as_nanos() as i64)
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for MediaTime {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for MediaTime {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// A recording clock that provides monotonic timestamps relative to
/// a fixed epoch (the moment capture started).
#[derive(Debug, Clone)]
pub struct RecordingClock {
    /// The instant capture started.
    epoch: Instant,

    /// Wall-clock time at epoch (ISO 8601 string).
    epoch_wall: String,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Presentation time for "now" relative to the epoch.
    pub fn now(&self) -> MediaTime {
        MediaTime::from(self.epoch.elapsed())
    }

    /// Get seconds elapsed since capture start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at capture start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Drift measurement between two streams.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream.
    pub reference: MediaTime,
    /// Timestamp in the measured stream.
    pub measured: MediaTime,
}

impl DriftMeasurement {
    /// Drift in nanoseconds (positive = measured is ahead).
    pub fn drift_ns(&self) -> i64 {
        (self.measured - self.reference).as_nanos()
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_ns() as f64 / 1_000_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}
