//! Append-only JSONL container.
//!
//! Layout: a `# {header}` line written when the session starts, one JSON
//! line per appended sample, and a `# {trailer}` line written on finish.
//! Lines are written by a dedicated thread so `append` never blocks on I/O;
//! each track counts its samples still in flight and reports itself not
//! ready once that count reaches the configured limit.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use splice_common::clock::MediaTime;
use splice_common::config::WriterConfig;
use splice_common::error::{SpliceError, SpliceResult};

use super::{
    remove_existing, ContainerBackend, ContainerFactory, FinishCallback, TrackId, TrackSpec,
};
use crate::sample::{Sample, TrackKind};

pub const FORMAT_NAME: &str = "splice-sample-log";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTrack {
    pub id: TrackId,
    pub spec: TrackSpec,
}

/// First line of a sample log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogHeader {
    pub format: String,
    pub version: u32,
    pub created_at: String,
    pub optimize_for_network: bool,
    pub session_start: Option<MediaTime>,
    pub tracks: Vec<LogTrack>,
}

/// One appended sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub track: TrackId,
    pub pts: MediaTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<MediaTime>,
    pub data: Vec<u8>,
}

/// Last line of a cleanly finished sample log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogTrailer {
    pub session_end: Option<MediaTime>,
    pub samples: u64,
    pub finished_tracks: Vec<TrackId>,
}

/// A parsed sample log.
#[derive(Debug, Clone)]
pub struct SampleLog {
    pub header: LogHeader,
    pub samples: Vec<SampleRecord>,
    /// Missing when the writer never finished.
    pub trailer: Option<LogTrailer>,
}

impl SampleLog {
    pub fn track_of_kind(&self, kind: TrackKind) -> Option<TrackId> {
        self.header
            .tracks
            .iter()
            .find(|t| t.spec.kind() == kind)
            .map(|t| t.id)
    }

    pub fn track_samples(&self, track: TrackId) -> impl Iterator<Item = &SampleRecord> + '_ {
        self.samples.iter().filter(move |s| s.track == track)
    }

    /// Output timestamps of every sample on the track of `kind`.
    pub fn timestamps(&self, kind: TrackKind) -> Vec<MediaTime> {
        match self.track_of_kind(kind) {
            Some(id) => self.track_samples(id).map(|s| s.pts).collect(),
            None => Vec::new(),
        }
    }
}

/// Parse a sample log written by [`SampleLogContainer`].
pub fn read_sample_log(path: &Path) -> SpliceResult<SampleLog> {
    if !path.exists() {
        return Err(SpliceError::ResourceNotFound {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path)?;

    let mut header: Option<LogHeader> = None;
    let mut trailer = None;
    let mut samples = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(meta) = line.strip_prefix("# ") {
            if header.is_none() {
                header = Some(serde_json::from_str(meta)?);
            } else {
                trailer = Some(serde_json::from_str(meta)?);
            }
        } else {
            samples.push(serde_json::from_str(line)?);
        }
    }

    let header = header.ok_or_else(|| {
        SpliceError::backend(anyhow::anyhow!(
            "{} has no sample log header",
            path.display()
        ))
    })?;
    if header.format != FORMAT_NAME {
        return Err(SpliceError::backend(anyhow::anyhow!(
            "unexpected format `{}`",
            header.format
        )));
    }
    Ok(SampleLog {
        header,
        samples,
        trailer,
    })
}

enum LogMessage {
    Header(LogHeader),
    Sample {
        record: SampleRecord,
        in_flight: Arc<AtomicUsize>,
    },
    Finish {
        trailer: LogTrailer,
        done: FinishCallback,
    },
}

struct TrackState {
    id: TrackId,
    spec: TrackSpec,
    in_flight: Arc<AtomicUsize>,
    finished: bool,
}

/// Container that logs every sample as a JSON line.
pub struct SampleLogContainer {
    path: PathBuf,
    optimize_for_network: bool,
    max_in_flight: usize,
    tracks: Vec<TrackState>,
    session_start: Option<MediaTime>,
    session_end: Option<MediaTime>,
    header_sent: bool,
    samples: u64,
    tx: mpsc::Sender<LogMessage>,
    failed: Arc<AtomicBool>,
}

impl SampleLogContainer {
    /// Create the output file, replacing any previous one.
    pub fn create(
        path: PathBuf,
        optimize_for_network: bool,
        max_in_flight: usize,
    ) -> SpliceResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        remove_existing(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let (tx, rx) = mpsc::channel();
        let failed = Arc::new(AtomicBool::new(false));
        let thread_path = path.clone();
        let thread_failed = Arc::clone(&failed);
        std::thread::Builder::new()
            .name("splice-sample-log".to_string())
            .spawn(move || run_log_writer(thread_path, file, rx, thread_failed))?;

        tracing::debug!(path = %path.display(), max_in_flight, "Sample log created");
        Ok(Self {
            path,
            optimize_for_network,
            max_in_flight,
            tracks: Vec::new(),
            session_start: None,
            session_end: None,
            header_sent: false,
            samples: 0,
            tx,
            failed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn track(&self, id: TrackId) -> Option<&TrackState> {
        self.tracks.iter().find(|t| t.id == id)
    }

    fn send(&self, message: LogMessage) -> SpliceResult<()> {
        self.tx
            .send(message)
            .map_err(|_| SpliceError::backend(anyhow::anyhow!("sample log writer has exited")))
    }

    fn send_header(&mut self) -> SpliceResult<()> {
        let header = LogHeader {
            format: FORMAT_NAME.to_string(),
            version: FORMAT_VERSION,
            created_at: chrono::Utc::now().to_rfc3339(),
            optimize_for_network: self.optimize_for_network,
            session_start: self.session_start,
            tracks: self
                .tracks
                .iter()
                .map(|t| LogTrack {
                    id: t.id,
                    spec: t.spec.clone(),
                })
                .collect(),
        };
        self.send(LogMessage::Header(header))?;
        self.header_sent = true;
        Ok(())
    }
}

impl ContainerBackend for SampleLogContainer {
    fn add_track(&mut self, spec: TrackSpec) -> SpliceResult<TrackId> {
        let kind = spec.kind();
        if self.header_sent {
            return Err(SpliceError::track_setup(
                kind.to_string(),
                "session already started",
            ));
        }
        validate_spec(&spec)?;

        let id = TrackId(self.tracks.len() as u32);
        self.tracks.push(TrackState {
            id,
            spec,
            in_flight: Arc::new(AtomicUsize::new(0)),
            finished: false,
        });
        tracing::debug!(track = %kind, id = id.0, "Track added");
        Ok(id)
    }

    fn start_session(&mut self, at: MediaTime) -> SpliceResult<()> {
        if self.header_sent {
            return Err(SpliceError::backend(anyhow::anyhow!(
                "container session already started"
            )));
        }
        self.session_start = Some(at);
        self.send_header()
    }

    fn is_ready_for_more_data(&self, track: TrackId) -> bool {
        if self.failed.load(Ordering::Acquire) {
            return false;
        }
        self.track(track).is_some_and(|t| {
            !t.finished && t.in_flight.load(Ordering::Acquire) < self.max_in_flight
        })
    }

    fn append(&mut self, track: TrackId, sample: Sample) -> SpliceResult<()> {
        if !self.header_sent {
            return Err(SpliceError::backend(anyhow::anyhow!(
                "append before the container session started"
            )));
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(SpliceError::backend(anyhow::anyhow!(
                "sample log writer failed"
            )));
        }
        let state = self
            .track(track)
            .filter(|t| !t.finished)
            .ok_or_else(|| SpliceError::backend(anyhow::anyhow!("track {} is not open", track.0)))?;

        let in_flight = Arc::clone(&state.in_flight);
        in_flight.fetch_add(1, Ordering::AcqRel);
        let record = SampleRecord {
            track,
            pts: sample.pts,
            duration: sample.duration,
            data: sample.data,
        };
        if let Err(e) = self.send(LogMessage::Sample {
            record,
            in_flight: Arc::clone(&in_flight),
        }) {
            in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(e);
        }
        self.samples += 1;
        Ok(())
    }

    fn mark_finished(&mut self, track: TrackId) {
        if let Some(state) = self.tracks.iter_mut().find(|t| t.id == track) {
            state.finished = true;
        }
    }

    fn end_session(&mut self, at: MediaTime) {
        self.session_end = Some(at);
    }

    fn finish_writing(mut self: Box<Self>, on_complete: FinishCallback) {
        if !self.header_sent {
            if let Err(e) = self.send_header() {
                on_complete(Err(e));
                return;
            }
        }
        let trailer = LogTrailer {
            session_end: self.session_end,
            samples: self.samples,
            finished_tracks: self
                .tracks
                .iter()
                .filter(|t| t.finished)
                .map(|t| t.id)
                .collect(),
        };
        if let Err(LogMessage::Finish { done, .. }) = self
            .tx
            .send(LogMessage::Finish {
                trailer,
                done: on_complete,
            })
            .map_err(|e| e.0)
        {
            done(Err(SpliceError::backend(anyhow::anyhow!(
                "sample log writer has exited"
            ))));
        }
    }
}

fn validate_spec(spec: &TrackSpec) -> SpliceResult<()> {
    let kind = spec.kind().to_string();
    match spec {
        TrackSpec::Video { codec, .. } | TrackSpec::Audio { codec, .. } if codec.is_empty() => {
            Err(SpliceError::track_setup(kind, "codec must not be empty"))
        }
        TrackSpec::Video {
            width, height, fps, ..
        } if *width == 0 || *height == 0 || *fps == 0 => Err(SpliceError::track_setup(
            kind,
            format!("invalid video format {width}x{height}@{fps}"),
        )),
        TrackSpec::Audio {
            sample_rate,
            channels,
            ..
        } if *sample_rate == 0 || *channels == 0 => Err(SpliceError::track_setup(
            kind,
            format!("invalid audio format {sample_rate} Hz x {channels}"),
        )),
        _ => Ok(()),
    }
}

fn write_line<T: Serialize>(
    writer: &mut BufWriter<File>,
    prefix: &str,
    value: &T,
) -> SpliceResult<()> {
    let json = serde_json::to_string(value)?;
    writeln!(writer, "{prefix}{json}")?;
    Ok(())
}

fn run_log_writer(
    path: PathBuf,
    file: File,
    rx: mpsc::Receiver<LogMessage>,
    failed: Arc<AtomicBool>,
) {
    let mut writer = BufWriter::new(file);
    let mut error: Option<String> = None;
    let mut lines: u64 = 0;

    let record_failure = |result: SpliceResult<()>, error: &mut Option<String>| {
        if let Err(e) = result {
            tracing::error!(path = %path.display(), error = %e, "Sample log write failed");
            failed.store(true, Ordering::Release);
            if error.is_none() {
                *error = Some(e.to_string());
            }
        }
    };

    for message in rx {
        match message {
            LogMessage::Header(header) => {
                let result = write_line(&mut writer, "# ", &header);
                record_failure(result, &mut error);
            }
            LogMessage::Sample { record, in_flight } => {
                if error.is_none() {
                    let result = write_line(&mut writer, "", &record);
                    record_failure(result, &mut error);
                    lines += 1;
                    // Flush every 1000 samples so a crash loses little.
                    if lines % 1000 == 0 {
                        let result = writer.flush().map_err(SpliceError::from);
                        record_failure(result, &mut error);
                    }
                }
                in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            LogMessage::Finish { trailer, done } => {
                if error.is_none() {
                    let result = write_line(&mut writer, "# ", &trailer)
                        .and_then(|()| writer.flush().map_err(SpliceError::from));
                    record_failure(result, &mut error);
                }
                let outcome = match error.take() {
                    None => Ok(path.clone()),
                    Some(message) => Err(SpliceError::backend(anyhow::anyhow!(message))),
                };
                tracing::debug!(path = %path.display(), samples = lines, ok = outcome.is_ok(), "Sample log finalized");
                done(outcome);
                return;
            }
        }
    }

    // Container dropped without finishing.
    let _ = writer.flush();
}

/// Factory producing a [`SampleLogContainer`] at the configured output path.
#[derive(Debug, Default, Clone, Copy)]
pub struct SampleLogFactory;

impl ContainerFactory for SampleLogFactory {
    fn create(&self, config: &WriterConfig) -> SpliceResult<Box<dyn ContainerBackend>> {
        let container = SampleLogContainer::create(
            config.output_path.clone(),
            config.optimize_for_network,
            config.max_in_flight_samples,
        )?;
        Ok(Box::new(container))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use splice_common::config::{AudioTrackConfig, VideoTrackConfig};
    use std::time::Duration;

    fn temp_log(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("splice_test_sample_log");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn finish(container: SampleLogContainer) -> SpliceResult<PathBuf> {
        let (tx, rx) = mpsc::channel();
        Box::new(container).finish_writing(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_sample_log_roundtrip() {
        let path = temp_log("roundtrip.jsonl");
        let mut container = SampleLogContainer::create(path.clone(), true, 8).unwrap();
        let video = container
            .add_track(TrackSpec::video(&VideoTrackConfig::default()))
            .unwrap();
        let audio = container
            .add_track(TrackSpec::audio(&AudioTrackConfig::default()))
            .unwrap();

        container.start_session(MediaTime::from_millis(10)).unwrap();
        container
            .append(video, Sample::new(MediaTime::from_millis(10), vec![1, 2]))
            .unwrap();
        container
            .append(audio, Sample::new(MediaTime::from_millis(12), vec![3]))
            .unwrap();
        container.mark_finished(video);
        container.mark_finished(audio);
        container.end_session(MediaTime::from_millis(10));
        assert_eq!(finish(container).unwrap(), path);

        let log = read_sample_log(&path).unwrap();
        assert_eq!(log.header.format, FORMAT_NAME);
        assert_eq!(log.header.session_start, Some(MediaTime::from_millis(10)));
        assert_eq!(log.header.tracks.len(), 2);
        assert_eq!(log.timestamps(TrackKind::Video), vec![MediaTime::from_millis(10)]);
        assert_eq!(log.timestamps(TrackKind::Audio), vec![MediaTime::from_millis(12)]);
        let trailer = log.trailer.unwrap();
        assert_eq!(trailer.samples, 2);
        assert_eq!(trailer.finished_tracks, vec![video, audio]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_finish_without_session_writes_empty_log() {
        let path = temp_log("empty.jsonl");
        let mut container = SampleLogContainer::create(path.clone(), false, 8).unwrap();
        container
            .add_track(TrackSpec::video(&VideoTrackConfig::default()))
            .unwrap();
        finish(container).unwrap();

        let log = read_sample_log(&path).unwrap();
        assert_eq!(log.header.session_start, None);
        assert!(log.samples.is_empty());
        assert_eq!(log.trailer.unwrap().samples, 0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalid_track_and_late_track() {
        let path = temp_log("invalid.jsonl");
        let mut container = SampleLogContainer::create(path.clone(), false, 8).unwrap();
        let bad = VideoTrackConfig {
            width: 0,
            ..VideoTrackConfig::default()
        };
        assert!(matches!(
            container.add_track(TrackSpec::video(&bad)),
            Err(SpliceError::TrackSetupFailed { .. })
        ));
        container.start_session(MediaTime::ZERO).unwrap();
        assert!(container
            .add_track(TrackSpec::audio(&AudioTrackConfig::default()))
            .unwrap_err()
            .is_setup_error());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_readiness() {
        let path = temp_log("ready.jsonl");
        let mut container = SampleLogContainer::create(path.clone(), false, 0).unwrap();
        let video = container
            .add_track(TrackSpec::video(&VideoTrackConfig::default()))
            .unwrap();
        // No slots at all: never ready.
        assert!(!container.is_ready_for_more_data(video));
        assert!(!container.is_ready_for_more_data(TrackId(9)));
        assert!(container
            .append(video, Sample::new(MediaTime::ZERO, vec![]))
            .is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_missing_log() {
        assert!(matches!(
            read_sample_log(Path::new("/nonexistent/splice.jsonl")),
            Err(SpliceError::ResourceNotFound { .. })
        ));
    }
}
