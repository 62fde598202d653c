//! Pause-aware media writer.
//!
//! Every session mutation runs on the writer's own [`CommandExecutor`]
//! worker. Callers on capture threads only enqueue; the atomics in
//! [`WriterShared`] mirror the worker's state so setup errors can be
//! returned synchronously and closed-gate samples dropped without a
//! round trip.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use splice_common::clock::{DriftMeasurement, MediaTime};
use splice_common::config::{ExecutorConfig, WriterConfig};
use splice_common::error::{SpliceError, SpliceResult};
use splice_executor::{CommandExecutor, CommandHandler, CommandSender, ExecutorState};

use crate::backend::{ContainerBackend, ContainerFactory, TrackId, TrackSpec};
use crate::sample::{Sample, TrackKind};
use crate::timing::{TimingDecision, TrackTiming};

/// Drift between the two tracks' final output timestamps worth a warning.
const DRIFT_WARN_MS: f64 = 100.0;

/// Upper bound on draining queued commands when the writer shuts down.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

/// Session notifications. Called from the writer's worker thread, or from
/// the container's finalization thread for `on_finished`.
pub trait WriterObserver: Send + Sync + 'static {
    /// The session reached its minimum duration. Sent once per session.
    fn on_ready_for_collection(&self) {}

    /// Finalization completed.
    fn on_finished(&self, _result: SpliceResult<RecordingOutput>) {}

    /// A sample could not be written; the session continues.
    fn on_error(&self, _error: &SpliceError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl WriterObserver for NoopObserver {}

/// Per-session counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    pub video_appended: u64,
    pub audio_appended: u64,
    /// Samples that arrived while the accept gate was closed.
    pub dropped_gate: u64,
    /// Samples the container was not ready for.
    pub dropped_backpressure: u64,
    pub dropped_out_of_order: u64,
    /// Audio that arrived, or would land, before the session start.
    pub dropped_before_start: u64,
    pub append_failures: u64,
}

impl WriterStats {
    pub fn dropped(&self) -> u64 {
        self.dropped_gate
            + self.dropped_backpressure
            + self.dropped_out_of_order
            + self.dropped_before_start
    }
}

/// A finalized recording.
#[derive(Debug, Clone)]
pub struct RecordingOutput {
    pub path: PathBuf,
    /// Output-timeline length from session start to the last video sample.
    pub duration: MediaTime,
    pub stats: WriterStats,
}

/// Why a session finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Requested,
    MaxDuration,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::MaxDuration => f.write_str("max_duration"),
        }
    }
}

const IDLE: u8 = 0;
const PREPARED: u8 = 1;
const FINISHING: u8 = 2;

/// Lock-free mirror of the worker's session state.
#[derive(Debug, Default)]
struct WriterShared {
    phase: AtomicU8,
    accepting: AtomicBool,
    gate_drops: AtomicU64,
}

impl WriterShared {
    fn is_prepared(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PREPARED
    }
}

enum WriterCommand {
    Install(Box<WriterSession>),
    Begin,
    Pause,
    Video(Sample),
    Audio(Sample),
    Finish(FinishReason),
}

struct WriterSession {
    container: Box<dyn ContainerBackend>,
    path: PathBuf,
    video_track: TrackId,
    audio_track: TrackId,
    accepting: bool,
    session_start: Option<MediaTime>,
    video: TrackTiming,
    audio: TrackTiming,
    last_video_out: Option<MediaTime>,
    last_audio_out: Option<MediaTime>,
    ready_emitted: bool,
    stats: WriterStats,
}

/// Runs on the worker; owns the session.
struct WriterCore {
    session: Option<WriterSession>,
    shared: Arc<WriterShared>,
    observer: Arc<dyn WriterObserver>,
    min_duration: Option<MediaTime>,
    max_duration: Option<MediaTime>,
}

impl CommandHandler<WriterCommand> for WriterCore {
    fn handle(
        &mut self,
        command: WriterCommand,
        _sender: &CommandSender<WriterCommand>,
    ) -> anyhow::Result<()> {
        match command {
            WriterCommand::Install(session) => {
                if self.session.is_some() {
                    tracing::warn!("Replacing a session that was never finished");
                }
                tracing::info!(path = %session.path.display(), "Writer session prepared");
                self.session = Some(*session);
            }
            WriterCommand::Begin => {
                if let Some(session) = self.session.as_mut() {
                    session.accepting = true;
                    tracing::info!("Writing started");
                }
            }
            WriterCommand::Pause => {
                if let Some(session) = self.session.as_mut() {
                    session.accepting = false;
                    session.video.pause();
                    session.audio.pause();
                    tracing::info!("Writing paused");
                }
            }
            WriterCommand::Video(sample) => self.write_video(sample),
            WriterCommand::Audio(sample) => self.write_audio(sample),
            WriterCommand::Finish(reason) => self.finish_session(reason),
        }
        Ok(())
    }
}

enum VideoOutcome {
    Written { predicted: MediaTime },
    Dropped { predicted: Option<MediaTime> },
    MaxReached { predicted: MediaTime },
}

impl WriterCore {
    fn write_video(&mut self, sample: Sample) {
        let max_duration = self.max_duration;
        let observer = Arc::clone(&self.observer);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.accepting {
            session.stats.dropped_gate += 1;
            return;
        }

        if session.session_start.is_none() {
            if let Err(e) = session.container.start_session(sample.pts) {
                tracing::error!(error = %e, "Failed to start container session");
                observer.on_error(&e);
                return;
            }
            session.session_start = Some(sample.pts);
            tracing::debug!(start = %sample.pts, "Container session started");
        }

        let out = match session.video.renormalize(sample.pts, sample.duration) {
            TimingDecision::Emit(out) => out,
            TimingDecision::OutOfOrder => {
                session.stats.dropped_out_of_order += 1;
                tracing::debug!(pts = %sample.pts, "Dropping out-of-order video sample");
                return;
            }
            TimingDecision::Finished => return,
        };
        let predicted = session.video.predicted_duration(out);

        let outcome = if max_duration.is_some_and(|max| predicted >= max) {
            VideoOutcome::MaxReached { predicted }
        } else if !session.container.is_ready_for_more_data(session.video_track) {
            session.stats.dropped_backpressure += 1;
            VideoOutcome::Dropped {
                predicted: Some(predicted),
            }
        } else {
            match session
                .container
                .append(session.video_track, sample.retimed(out))
            {
                Ok(()) => {
                    session.stats.video_appended += 1;
                    session.last_video_out = Some(out);
                    VideoOutcome::Written { predicted }
                }
                Err(e) => {
                    session.stats.append_failures += 1;
                    tracing::warn!(pts = %out, error = %e, "Video append failed");
                    observer.on_error(&e);
                    VideoOutcome::Dropped { predicted: None }
                }
            }
        };

        match outcome {
            VideoOutcome::MaxReached { predicted } => {
                tracing::info!(duration = %predicted, "Maximum duration reached");
                self.finish_session(FinishReason::MaxDuration);
            }
            VideoOutcome::Written { predicted }
            | VideoOutcome::Dropped {
                predicted: Some(predicted),
            } => self.check_min_duration(predicted),
            VideoOutcome::Dropped { predicted: None } => {}
        }
    }

    fn check_min_duration(&mut self, predicted: MediaTime) {
        let Some(min) = self.min_duration else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.ready_emitted && predicted >= min {
            session.ready_emitted = true;
            tracing::info!(duration = %predicted, "Minimum duration reached");
            self.observer.on_ready_for_collection();
        }
    }

    fn write_audio(&mut self, sample: Sample) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.accepting {
            session.stats.dropped_gate += 1;
            return;
        }
        let Some(start) = session.session_start else {
            session.stats.dropped_before_start += 1;
            return;
        };

        let out = match session.audio.renormalize(sample.pts, sample.duration) {
            TimingDecision::Emit(out) => out,
            TimingDecision::OutOfOrder => {
                session.stats.dropped_out_of_order += 1;
                tracing::debug!(pts = %sample.pts, "Dropping out-of-order audio sample");
                return;
            }
            TimingDecision::Finished => return,
        };
        if out < start {
            session.stats.dropped_before_start += 1;
            return;
        }
        if !session.container.is_ready_for_more_data(session.audio_track) {
            session.stats.dropped_backpressure += 1;
            return;
        }
        match session
            .container
            .append(session.audio_track, sample.retimed(out))
        {
            Ok(()) => {
                session.stats.audio_appended += 1;
                session.last_audio_out = Some(out);
            }
            Err(e) => {
                session.stats.append_failures += 1;
                tracing::warn!(pts = %out, error = %e, "Audio append failed");
                self.observer.on_error(&e);
            }
        }
    }

    fn finish_session(&mut self, reason: FinishReason) {
        let Some(mut session) = self.session.take() else {
            tracing::debug!("Finish without a running session");
            return;
        };
        self.shared.phase.store(FINISHING, Ordering::Release);
        self.shared.accepting.store(false, Ordering::Release);

        session.video.finish();
        session.audio.finish();
        session.container.mark_finished(session.video_track);
        session.container.mark_finished(session.audio_track);

        let start = session.session_start.unwrap_or(MediaTime::ZERO);
        let end = session.last_video_out.unwrap_or(start);
        session.container.end_session(end);
        let duration = end - start;

        if let (Some(video), Some(audio)) = (session.last_video_out, session.last_audio_out) {
            let drift = DriftMeasurement {
                reference: video,
                measured: audio,
            };
            if drift.exceeds_threshold_ms(DRIFT_WARN_MS) {
                tracing::warn!(drift_ms = drift.drift_ms(), "Audio ended far from video");
            } else {
                tracing::debug!(drift_ms = drift.drift_ms(), "Track drift at finish");
            }
        }

        let mut stats = session.stats.clone();
        stats.dropped_gate += self.shared.gate_drops.swap(0, Ordering::AcqRel);
        tracing::info!(
            reason = %reason,
            path = %session.path.display(),
            duration = %duration,
            video = stats.video_appended,
            audio = stats.audio_appended,
            dropped = stats.dropped(),
            "Finishing writer session"
        );

        let shared = Arc::clone(&self.shared);
        let observer = Arc::clone(&self.observer);
        session.container.finish_writing(Box::new(move |result| {
            shared.phase.store(IDLE, Ordering::Release);
            match &result {
                Ok(path) => tracing::info!(path = %path.display(), "Recording finalized"),
                Err(e) => tracing::error!(error = %e, "Recording finalization failed"),
            }
            observer.on_finished(result.map(|path| RecordingOutput {
                path,
                duration,
                stats,
            }));
        }));
    }
}

/// Records a video and an audio track into one container, cutting paused
/// intervals out of the output timeline.
pub struct MediaWriter {
    executor: CommandExecutor<WriterCommand>,
    shared: Arc<WriterShared>,
    factory: Arc<dyn ContainerFactory>,
    config: WriterConfig,
}

impl MediaWriter {
    /// Create a writer and start its worker thread.
    pub fn new(
        config: WriterConfig,
        executor_config: ExecutorConfig,
        factory: impl ContainerFactory,
        observer: impl WriterObserver,
    ) -> SpliceResult<Self> {
        config.validate()?;
        let shared = Arc::new(WriterShared::default());
        let core = WriterCore {
            session: None,
            shared: Arc::clone(&shared),
            observer: Arc::new(observer),
            min_duration: config.min_duration(),
            max_duration: config.max_duration(),
        };
        let executor = CommandExecutor::new(executor_config, core);
        executor.start()?;
        Ok(Self {
            executor,
            shared,
            factory: Arc::new(factory),
            config,
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Create the container and both tracks for a new session.
    ///
    /// Fails with `AlreadyActive` while a session exists, including one that
    /// is still finalizing.
    pub fn prepare(&self) -> SpliceResult<()> {
        if self
            .shared
            .phase
            .compare_exchange(IDLE, PREPARED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SpliceError::AlreadyActive);
        }
        match self.build_session() {
            Ok(session) => {
                self.shared.gate_drops.store(0, Ordering::Release);
                self.executor
                    .enqueue(WriterCommand::Install(Box::new(session)));
                Ok(())
            }
            Err(e) => {
                self.shared.phase.store(IDLE, Ordering::Release);
                tracing::error!(error = %e, "Writer session setup failed");
                Err(e)
            }
        }
    }

    fn build_session(&self) -> SpliceResult<WriterSession> {
        let mut container = self.factory.create(&self.config)?;
        let video_track = container.add_track(TrackSpec::video(&self.config.video))?;
        let audio_track = container.add_track(TrackSpec::audio(&self.config.audio))?;
        Ok(WriterSession {
            container,
            path: self.config.output_path.clone(),
            video_track,
            audio_track,
            accepting: false,
            session_start: None,
            video: TrackTiming::new(self.config.video.frame_duration()),
            audio: TrackTiming::new(self.config.audio.packet_duration()),
            last_video_out: None,
            last_audio_out: None,
            ready_emitted: false,
            stats: WriterStats::default(),
        })
    }

    /// Open the accept gate. Also resumes after [`pause_writing`](Self::pause_writing).
    pub fn begin_writing(&self) -> SpliceResult<()> {
        if !self.shared.is_prepared() {
            return Err(SpliceError::NotPrepared);
        }
        self.shared.accepting.store(true, Ordering::Release);
        self.executor.enqueue(WriterCommand::Begin);
        Ok(())
    }

    /// Close the accept gate and pause both tracks.
    pub fn pause_writing(&self) -> SpliceResult<()> {
        if !self.shared.is_prepared() {
            return Err(SpliceError::NotPrepared);
        }
        self.shared.accepting.store(false, Ordering::Release);
        self.executor.enqueue(WriterCommand::Pause);
        Ok(())
    }

    pub fn write_video_buffer(&self, sample: Sample) {
        self.submit(TrackKind::Video, sample);
    }

    pub fn write_audio_buffer(&self, sample: Sample) {
        self.submit(TrackKind::Audio, sample);
    }

    fn submit(&self, kind: TrackKind, sample: Sample) {
        if !self.shared.is_prepared() || !self.shared.accepting.load(Ordering::Acquire) {
            self.shared.gate_drops.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(track = %kind, pts = %sample.pts, "Gate closed; dropping sample");
            return;
        }
        let command = match kind {
            TrackKind::Video => WriterCommand::Video(sample),
            TrackKind::Audio => WriterCommand::Audio(sample),
        };
        self.executor.enqueue(command);
    }

    /// Finish the running session. A no-op when nothing is running.
    pub fn finish(&self) {
        if !self.shared.is_prepared() {
            tracing::debug!("Finish requested without a running session");
            return;
        }
        self.shared.accepting.store(false, Ordering::Release);
        self.executor
            .enqueue(WriterCommand::Finish(FinishReason::Requested));
    }

    /// Whether a session exists, including one still finalizing.
    pub fn is_active(&self) -> bool {
        self.shared.phase.load(Ordering::Acquire) != IDLE
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.is_prepared() && self.shared.accepting.load(Ordering::Acquire)
    }

    /// Wait until every queued command has been handled.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.executor.wait_idle(timeout)
    }

    /// Finish any running session, wait for queued commands to be handled,
    /// then stop the worker thread. Finalization itself completes on the
    /// container's thread and still reaches the observer.
    pub fn shutdown(&self) {
        self.finish();
        let running = self.executor.state() == ExecutorState::Running;
        if running && !self.executor.wait_idle(SHUTDOWN_DRAIN) {
            tracing::warn!(
                pending = self.executor.pending(),
                "Writer queue not drained before shutdown"
            );
        }
        self.executor.stop();
    }
}

impl Drop for MediaWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
