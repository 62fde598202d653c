//! Container backends.
//!
//! A [`ContainerBackend`] is the muxing half of a session: it owns the
//! output file, accepts already-renormalized samples per track and
//! finalizes asynchronously. [`MediaWriter`](crate::MediaWriter) only ever
//! talks to this trait.

pub mod memory;
pub mod sample_log;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use serde::{Deserialize, Serialize};
use splice_common::clock::MediaTime;
use splice_common::config::{AudioTrackConfig, VideoTrackConfig, WriterConfig};
use splice_common::error::{SpliceError, SpliceResult};

use crate::sample::{Sample, TrackKind};

pub use memory::{MemoryContainer, MemoryContainerFactory, MemoryRecording};
pub use sample_log::{read_sample_log, SampleLog, SampleLogContainer, SampleLogFactory};

/// Track handle issued by a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u32);

/// Output settings for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TrackSpec {
    Video {
        codec: String,
        width: u32,
        height: u32,
        fps: u32,
        rotation_degrees: u32,
    },
    Audio {
        codec: String,
        sample_rate: u32,
        channels: u16,
        bitrate: u32,
    },
}

impl TrackSpec {
    pub fn video(config: &VideoTrackConfig) -> Self {
        Self::Video {
            codec: config.codec.clone(),
            width: config.width,
            height: config.height,
            fps: config.fps,
            rotation_degrees: config.rotation_degrees,
        }
    }

    pub fn audio(config: &AudioTrackConfig) -> Self {
        Self::Audio {
            codec: config.codec.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            bitrate: config.bitrate,
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            Self::Video { .. } => TrackKind::Video,
            Self::Audio { .. } => TrackKind::Audio,
        }
    }
}

/// Invoked once finalization completes, from whatever thread finished it.
pub type FinishCallback = Box<dyn FnOnce(SpliceResult<PathBuf>) + Send + 'static>;

/// One output container for the lifetime of a writer session.
pub trait ContainerBackend: Send {
    /// Register a track. Fails with `TrackSetupFailed` if the settings are
    /// not usable.
    fn add_track(&mut self, spec: TrackSpec) -> SpliceResult<TrackId>;

    /// Open the container timeline at `at`. Called once, before any append.
    fn start_session(&mut self, at: MediaTime) -> SpliceResult<()>;

    /// Whether `track` can take another sample right now.
    fn is_ready_for_more_data(&self, track: TrackId) -> bool;

    fn append(&mut self, track: TrackId, sample: Sample) -> SpliceResult<()>;

    /// No more samples will be appended to `track`.
    fn mark_finished(&mut self, track: TrackId);

    /// Close the container timeline at `at`.
    fn end_session(&mut self, at: MediaTime);

    /// Flush and close the container. `on_complete` receives the output path.
    fn finish_writing(self: Box<Self>, on_complete: FinishCallback);
}

/// Creates a container for each prepared session.
pub trait ContainerFactory: Send + Sync + 'static {
    fn create(&self, config: &WriterConfig) -> SpliceResult<Box<dyn ContainerBackend>>;
}

/// Remove a stale output file so a new session starts from scratch.
pub(crate) fn remove_existing(path: &Path) -> SpliceResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Removed previous output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

type FinalizeJob = Box<dyn FnOnce() + Send + 'static>;

/// Run `finalize` on a named thread and hand its result to `on_complete`.
///
/// `on_complete` is called exactly once, with an error if the thread
/// could not be spawned.
pub(crate) fn finish_on_thread<F>(name: &str, finalize: F, on_complete: FinishCallback)
where
    F: FnOnce() -> SpliceResult<PathBuf> + Send + 'static,
{
    let name = name.to_string();
    run_finalizer(
        move |job| std::thread::Builder::new().name(name).spawn(job).map(drop),
        finalize,
        on_complete,
    );
}

fn run_finalizer<S, F>(spawn: S, finalize: F, on_complete: FinishCallback)
where
    S: FnOnce(FinalizeJob) -> std::io::Result<()>,
    F: FnOnce() -> SpliceResult<PathBuf> + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(on_complete)));
    let thread_slot = Arc::clone(&slot);
    let job: FinalizeJob = Box::new(move || {
        let result = finalize();
        if let Some(done) = thread_slot.lock().take() {
            done(result);
        }
    });

    if let Err(e) = spawn(job) {
        tracing::error!(error = %e, "Failed to spawn finalization thread");
        if let Some(done) = slot.lock().take() {
            done(Err(SpliceError::from(e)));
        }
    }
}
