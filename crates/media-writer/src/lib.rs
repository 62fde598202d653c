//! Splice media writer.
//!
//! Records a video track and an audio track into one container while the
//! capture can be paused and resumed. Paused intervals are cut out of the
//! output timeline per track, so the finished recording plays back as one
//! continuous take.
//!
//! ```text
//! capture threads ──write_*_buffer──► CommandExecutor worker
//!                                       │ TrackTiming (per track)
//!                                       │ duration policy
//!                                       ▼
//!                                  ContainerBackend ──finish──► RecordingOutput
//! ```

pub mod backend;
pub mod sample;
pub mod timing;
pub mod writer;

pub use backend::{
    read_sample_log, ContainerBackend, ContainerFactory, MemoryContainerFactory, SampleLog,
    SampleLogContainer, SampleLogFactory, TrackId, TrackSpec,
};
pub use sample::{Sample, TrackKind};
pub use timing::{TimingDecision, TimingPhase, TrackTiming};
pub use writer::{
    FinishReason, MediaWriter, NoopObserver, RecordingOutput, WriterObserver, WriterStats,
};
