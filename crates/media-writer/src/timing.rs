//! Per-track timing continuity.
//!
//! A [`TrackTiming`] maps input presentation timestamps onto an output
//! timeline from which every paused interval has been cut. Each track keeps
//! its own state; both start from the session's shared start time.
//!
//! ```text
//!  input   0  1  2  |pause|  5  6
//!  output  0  1  2           3  4      (frame duration 1)
//! ```
//!
//! The gap is computed lazily from the first sample after a resume and only
//! affects that sample and the ones after it.

use splice_common::clock::MediaTime;

/// Lifecycle of a track's timing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingPhase {
    Unstarted,
    Streaming,
    Paused,
    Finished,
}

/// What to do with an incoming sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingDecision {
    /// Write the sample at this output timestamp.
    Emit(MediaTime),
    /// The sample is older than the last one seen on this track.
    OutOfOrder,
    /// The track has been finished.
    Finished,
}

#[derive(Debug, Clone)]
pub struct TrackTiming {
    phase: TimingPhase,
    /// First input timestamp of the session on this track.
    begin: Option<MediaTime>,
    /// Most recent accepted input timestamp.
    last: Option<MediaTime>,
    /// Input timestamp at which the track was paused.
    pause_mark: Option<MediaTime>,
    /// Time removed from the output so far.
    ///
    /// The gap measured when the first sample after a pause arrives is
    /// added here right away, so that sample and every later one is shifted
    /// by it. No gap is held back for a later sample.
    accumulated_gap: MediaTime,
    /// Used as the post-resume step when a sample has no duration.
    nominal_frame: MediaTime,
}

impl TrackTiming {
    pub fn new(nominal_frame: MediaTime) -> Self {
        Self {
            phase: TimingPhase::Unstarted,
            begin: None,
            last: None,
            pause_mark: None,
            accumulated_gap: MediaTime::ZERO,
            nominal_frame,
        }
    }

    pub fn phase(&self) -> TimingPhase {
        self.phase
    }

    pub fn begin(&self) -> Option<MediaTime> {
        self.begin
    }

    pub fn last_input(&self) -> Option<MediaTime> {
        self.last
    }

    pub fn accumulated_gap(&self) -> MediaTime {
        self.accumulated_gap
    }

    /// Map an input timestamp to the output timeline.
    pub fn renormalize(&mut self, pts: MediaTime, duration: Option<MediaTime>) -> TimingDecision {
        match self.phase {
            TimingPhase::Finished => TimingDecision::Finished,
            TimingPhase::Unstarted => {
                self.begin = Some(pts);
                self.last = Some(pts);
                self.accumulated_gap = MediaTime::ZERO;
                self.phase = TimingPhase::Streaming;
                TimingDecision::Emit(pts)
            }
            TimingPhase::Streaming => {
                if self.last.is_some_and(|last| pts < last) {
                    return TimingDecision::OutOfOrder;
                }
                self.last = Some(pts);
                TimingDecision::Emit(pts - self.accumulated_gap)
            }
            TimingPhase::Paused => {
                let mark = self.pause_mark.or(self.last).unwrap_or(pts);
                if pts < mark {
                    return TimingDecision::OutOfOrder;
                }
                // One frame stays between the last pre-pause sample and this one.
                let step = duration.unwrap_or(self.nominal_frame);
                let removed = (pts - mark - step).max(MediaTime::ZERO);
                self.accumulated_gap += removed;
                self.pause_mark = None;
                self.last = Some(pts);
                self.phase = TimingPhase::Streaming;
                tracing::trace!(
                    removed = %removed,
                    accumulated = %self.accumulated_gap,
                    "Gap folded after resume"
                );
                TimingDecision::Emit(pts - self.accumulated_gap)
            }
        }
    }

    /// Stop streaming; the gap is measured from the last accepted sample.
    ///
    /// A track that has not produced a sample yet stays unstarted.
    pub fn pause(&mut self) {
        if self.phase == TimingPhase::Streaming {
            self.pause_mark = self.last;
            self.phase = TimingPhase::Paused;
        }
    }

    pub fn finish(&mut self) {
        self.phase = TimingPhase::Finished;
    }

    /// Output-timeline length from the first sample up to `output_pts`.
    pub fn predicted_duration(&self, output_pts: MediaTime) -> MediaTime {
        match self.begin {
            Some(begin) => output_pts - begin,
            None => MediaTime::ZERO,
        }
    }
}
