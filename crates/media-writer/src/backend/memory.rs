//! In-memory container used by tests and dry runs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use splice_common::clock::MediaTime;
use splice_common::config::WriterConfig;
use splice_common::error::{SpliceError, SpliceResult};

use super::{
    finish_on_thread, ContainerBackend, ContainerFactory, FinishCallback, TrackId, TrackSpec,
};
use crate::sample::{Sample, TrackKind};

/// Everything a [`MemoryContainer`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecording {
    pub path: PathBuf,
    pub tracks: Vec<TrackSpec>,
    pub session_start: Option<MediaTime>,
    pub session_end: Option<MediaTime>,
    pub samples: Vec<(TrackKind, Sample)>,
    pub finished_tracks: Vec<TrackKind>,
    pub finalized: bool,
}

impl MemoryRecording {
    pub fn timestamps(&self, kind: TrackKind) -> Vec<MediaTime> {
        self.samples
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, s)| s.pts)
            .collect()
    }
}

#[derive(Debug)]
struct Controls {
    video_ready: AtomicBool,
    audio_ready: AtomicBool,
    fail_track: Mutex<Option<TrackKind>>,
    fail_finish: AtomicBool,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            video_ready: AtomicBool::new(true),
            audio_ready: AtomicBool::new(true),
            fail_track: Mutex::new(None),
            fail_finish: AtomicBool::new(false),
        }
    }
}

/// Hands out [`MemoryContainer`]s that share one recording and one set of
/// readiness switches.
#[derive(Debug, Clone, Default)]
pub struct MemoryContainerFactory {
    recording: Arc<Mutex<MemoryRecording>>,
    controls: Arc<Controls>,
    created: Arc<AtomicUsize>,
}

impl MemoryContainerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the most recent container's recording.
    pub fn recording(&self) -> MemoryRecording {
        self.recording.lock().clone()
    }

    pub fn containers_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, kind: TrackKind, ready: bool) {
        match kind {
            TrackKind::Video => self.controls.video_ready.store(ready, Ordering::SeqCst),
            TrackKind::Audio => self.controls.audio_ready.store(ready, Ordering::SeqCst),
        }
    }

    /// Make `add_track` reject tracks of `kind`.
    pub fn fail_track(&self, kind: Option<TrackKind>) {
        *self.controls.fail_track.lock() = kind;
    }

    pub fn fail_finish(&self, fail: bool) {
        self.controls.fail_finish.store(fail, Ordering::SeqCst);
    }
}

impl ContainerFactory for MemoryContainerFactory {
    fn create(&self, config: &WriterConfig) -> SpliceResult<Box<dyn ContainerBackend>> {
        *self.recording.lock() = MemoryRecording {
            path: config.output_path.clone(),
            ..MemoryRecording::default()
        };
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryContainer {
            recording: Arc::clone(&self.recording),
            controls: Arc::clone(&self.controls),
            kinds: Vec::new(),
        }))
    }
}

pub struct MemoryContainer {
    recording: Arc<Mutex<MemoryRecording>>,
    controls: Arc<Controls>,
    kinds: Vec<TrackKind>,
}

impl MemoryContainer {
    fn kind(&self, track: TrackId) -> SpliceResult<TrackKind> {
        self.kinds
            .get(track.0 as usize)
            .copied()
            .ok_or_else(|| SpliceError::backend(anyhow::anyhow!("unknown track {}", track.0)))
    }
}

impl ContainerBackend for MemoryContainer {
    fn add_track(&mut self, spec: TrackSpec) -> SpliceResult<TrackId> {
        let kind = spec.kind();
        if *self.controls.fail_track.lock() == Some(kind) {
            return Err(SpliceError::track_setup(kind.to_string(), "rejected"));
        }
        self.recording.lock().tracks.push(spec);
        self.kinds.push(kind);
        Ok(TrackId(self.kinds.len() as u32 - 1))
    }

    fn start_session(&mut self, at: MediaTime) -> SpliceResult<()> {
        let mut recording = self.recording.lock();
        if recording.session_start.is_some() {
            return Err(SpliceError::backend(anyhow::anyhow!(
                "container session already started"
            )));
        }
        recording.session_start = Some(at);
        Ok(())
    }

    fn is_ready_for_more_data(&self, track: TrackId) -> bool {
        match self.kind(track) {
            Ok(TrackKind::Video) => self.controls.video_ready.load(Ordering::SeqCst),
            Ok(TrackKind::Audio) => self.controls.audio_ready.load(Ordering::SeqCst),
            Err(_) => false,
        }
    }

    fn append(&mut self, track: TrackId, sample: Sample) -> SpliceResult<()> {
        let kind = self.kind(track)?;
        let mut recording = self.recording.lock();
        if recording.session_start.is_none() {
            return Err(SpliceError::backend(anyhow::anyhow!(
                "append before the container session started"
            )));
        }
        recording.samples.push((kind, sample));
        Ok(())
    }

    fn mark_finished(&mut self, track: TrackId) {
        if let Ok(kind) = self.kind(track) {
            self.recording.lock().finished_tracks.push(kind);
        }
    }

    fn end_session(&mut self, at: MediaTime) {
        self.recording.lock().session_end = Some(at);
    }

    fn finish_writing(self: Box<Self>, on_complete: FinishCallback) {
        let fail = self.controls.fail_finish.load(Ordering::SeqCst);
        let recording = Arc::clone(&self.recording);
        // Finalization completes on another thread, as real containers do.
        finish_on_thread(
            "splice-memory-finish",
            move || {
                let mut recording = recording.lock();
                recording.finalized = !fail;
                if fail {
                    Err(SpliceError::backend(anyhow::anyhow!("finalization failed")))
                } else {
                    Ok(recording.path.clone())
                }
            },
            on_complete,
        );
    }
}
