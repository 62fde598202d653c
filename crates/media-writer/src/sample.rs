//! Timestamped media samples.

use serde::{Deserialize, Serialize};
use splice_common::clock::MediaTime;

/// Which of the two session tracks a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// One encoded (or raw) media buffer with its presentation time.
///
/// The decode timestamp is taken to be equal to `pts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub pts: MediaTime,
    pub duration: Option<MediaTime>,
    pub data: Vec<u8>,
}

impl Sample {
    pub fn new(pts: MediaTime, data: impl Into<Vec<u8>>) -> Self {
        Self {
            pts,
            duration: None,
            data: data.into(),
        }
    }

    pub fn with_duration(mut self, duration: MediaTime) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Copy of this sample carrying a new presentation time.
    pub fn retimed(&self, pts: MediaTime) -> Self {
        Self {
            pts,
            duration: self.duration,
            data: self.data.clone(),
        }
    }
}
