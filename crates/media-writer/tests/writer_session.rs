use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use splice_common::clock::MediaTime;
use splice_common::config::{ExecutorConfig, WriterConfig};
use splice_common::error::{SpliceError, SpliceResult};
use splice_writer::{
    read_sample_log, MediaWriter, MemoryContainerFactory, RecordingOutput, Sample,
    SampleLogFactory, TrackKind, WriterObserver,
};

const WAIT: Duration = Duration::from_secs(5);

fn ms(n: i64) -> MediaTime {
    MediaTime::from_millis(n)
}

fn millis(times: &[MediaTime]) -> Vec<i64> {
    times.iter().map(|t| t.as_nanos() / 1_000_000).collect()
}

fn output_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("splice_test_writer");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

/// 10 fps video so one frame is 100 ms.
fn writer_config(name: &str) -> WriterConfig {
    let mut config = WriterConfig::default();
    config.output_path = output_path(name);
    config.video.fps = 10;
    config
}

fn executor_config() -> ExecutorConfig {
    ExecutorConfig {
        thread_name: "writer-test".to_string(),
        wait_interval_ms: 50,
    }
}

#[derive(Default)]
struct Observations {
    ready: AtomicUsize,
    errors: AtomicUsize,
    finished: Mutex<Vec<Result<RecordingOutput, String>>>,
    finished_cv: Condvar,
}

impl Observations {
    fn wait_finished(&self) -> Result<RecordingOutput, String> {
        let guard = self.finished.lock().unwrap();
        let (guard, timeout) = self
            .finished_cv
            .wait_timeout_while(guard, WAIT, |f| f.is_empty())
            .unwrap();
        assert!(!timeout.timed_out(), "writer never finished");
        guard[0].clone()
    }

    fn finished_count(&self) -> usize {
        self.finished.lock().unwrap().len()
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Observations>);

impl WriterObserver for Recorder {
    fn on_ready_for_collection(&self) {
        self.0.ready.fetch_add(1, Ordering::SeqCst);
    }

    fn on_finished(&self, result: SpliceResult<RecordingOutput>) {
        self.0
            .finished
            .lock()
            .unwrap()
            .push(result.map_err(|e| e.to_string()));
        self.0.finished_cv.notify_all();
    }

    fn on_error(&self, _error: &SpliceError) {
        self.0.errors.fetch_add(1, Ordering::SeqCst);
    }
}

fn memory_writer(config: WriterConfig) -> (MediaWriter, MemoryContainerFactory, Recorder) {
    let factory = MemoryContainerFactory::new();
    let observed = Recorder::default();
    let writer = MediaWriter::new(config, executor_config(), factory.clone(), observed.clone())
        .unwrap();
    (writer, factory, observed)
}

fn video(writer: &MediaWriter, times: &[i64]) {
    for &t in times {
        writer.write_video_buffer(Sample::new(ms(t), vec![0u8; 4]));
    }
}

fn audio(writer: &MediaWriter, times: &[i64]) {
    for &t in times {
        writer.write_audio_buffer(Sample::new(ms(t), vec![1u8; 2]).with_duration(ms(100)));
    }
}

#[test]
fn test_pause_resume_removes_gap() {
    let (writer, factory, observed) = memory_writer(writer_config("pause.mem"));
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[0, 100, 200]);
    writer.pause_writing().unwrap();
    video(&writer, &[300]);
    writer.begin_writing().unwrap();
    video(&writer, &[500, 600]);
    writer.finish();

    let output = observed.0.wait_finished().unwrap();
    let recording = factory.recording();
    assert_eq!(
        millis(&recording.timestamps(TrackKind::Video)),
        vec![0, 100, 200, 300, 400]
    );
    assert_eq!(recording.session_start, Some(ms(0)));
    assert_eq!(recording.session_end, Some(ms(400)));
    assert!(recording.finalized);
    assert_eq!(output.duration, ms(400));
    assert_eq!(output.stats.video_appended, 5);
    assert_eq!(output.stats.dropped_gate, 1);
}

#[test]
fn test_two_pause_cycles_compose() {
    let (writer, factory, observed) = memory_writer(writer_config("cycles.mem"));
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[0, 100, 200]);
    writer.pause_writing().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[500, 600]);
    writer.pause_writing().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[1000, 1100]);
    writer.finish();

    observed.0.wait_finished().unwrap();
    assert_eq!(
        millis(&factory.recording().timestamps(TrackKind::Video)),
        vec![0, 100, 200, 300, 400, 500, 600]
    );
}

#[test]
fn test_audio_follows_session_start_and_pauses() {
    let (writer, factory, observed) = memory_writer(writer_config("audio.mem"));
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    // Before the first video frame: no session yet.
    audio(&writer, &[-50]);
    video(&writer, &[0]);
    audio(&writer, &[10, 110, 210]);
    video(&writer, &[100, 200]);
    writer.pause_writing().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[500]);
    audio(&writer, &[520]);
    writer.finish();

    let output = observed.0.wait_finished().unwrap();
    let recording = factory.recording();
    assert_eq!(
        millis(&recording.timestamps(TrackKind::Audio)),
        vec![10, 110, 210, 310]
    );
    assert_eq!(output.stats.audio_appended, 4);
    assert_eq!(output.stats.dropped_before_start, 1);
    assert!(recording.finished_tracks.contains(&TrackKind::Audio));
    assert!(recording.finished_tracks.contains(&TrackKind::Video));
}

#[test]
fn test_min_duration_notifies_once() {
    let mut config = writer_config("min.mem");
    config.min_duration_secs = Some(0.25);
    let (writer, _factory, observed) = memory_writer(config);
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[0, 100, 200]);
    assert!(writer.flush(WAIT));
    assert_eq!(observed.0.ready.load(Ordering::SeqCst), 0);

    video(&writer, &[300, 400]);
    writer.pause_writing().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[900, 1000]);
    writer.finish();
    observed.0.wait_finished().unwrap();
    assert_eq!(observed.0.ready.load(Ordering::SeqCst), 1);
}

#[test]
fn test_max_duration_finishes_once() {
    let mut config = writer_config("max.mem");
    config.max_duration_secs = Some(0.3);
    let (writer, factory, observed) = memory_writer(config);
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[0, 100, 200, 300, 400]);
    audio(&writer, &[410]);

    let output = observed.0.wait_finished().unwrap();
    assert!(writer.flush(WAIT));
    // The frame that reached the limit is discarded.
    assert_eq!(
        millis(&factory.recording().timestamps(TrackKind::Video)),
        vec![0, 100, 200]
    );
    assert!(factory.recording().timestamps(TrackKind::Audio).is_empty());
    assert_eq!(output.stats.video_appended, 3);
    assert!(!writer.is_accepting());

    // A later finish request finds nothing to do.
    writer.finish();
    video(&writer, &[500]);
    assert!(writer.flush(WAIT));
    assert_eq!(observed.0.finished_count(), 1);
    assert_eq!(factory.recording().samples.len(), 3);
}

#[test]
fn test_second_prepare_is_rejected() {
    let (writer, factory, observed) = memory_writer(writer_config("double.mem"));
    writer.prepare().unwrap();
    assert!(matches!(writer.prepare(), Err(SpliceError::AlreadyActive)));
    assert_eq!(factory.containers_created(), 1);

    writer.begin_writing().unwrap();
    video(&writer, &[0, 100]);
    writer.finish();
    observed.0.wait_finished().unwrap();
    assert_eq!(factory.recording().samples.len(), 2);

    // Finished sessions free the slot.
    assert!(!writer.is_active());
    writer.prepare().unwrap();
    assert_eq!(factory.containers_created(), 2);
}

#[test]
fn test_controls_without_session() {
    let (writer, factory, observed) = memory_writer(writer_config("idle.mem"));
    assert!(matches!(writer.begin_writing(), Err(SpliceError::NotPrepared)));
    assert!(matches!(writer.pause_writing(), Err(SpliceError::NotPrepared)));
    writer.finish();
    video(&writer, &[0]);
    assert!(writer.flush(WAIT));
    assert_eq!(observed.0.finished_count(), 0);
    assert_eq!(factory.containers_created(), 0);
}

#[test]
fn test_track_setup_failure_leaves_writer_idle() {
    let (writer, factory, _observed) = memory_writer(writer_config("setup.mem"));
    factory.fail_track(Some(TrackKind::Audio));
    let err = writer.prepare().unwrap_err();
    assert!(matches!(err, SpliceError::TrackSetupFailed { .. }));
    assert!(!writer.is_active());

    factory.fail_track(None);
    writer.prepare().unwrap();
    assert!(writer.is_active());
}

#[test]
fn test_backpressure_and_out_of_order_drops() {
    let (writer, factory, observed) = memory_writer(writer_config("pressure.mem"));
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[0]);
    assert!(writer.flush(WAIT));

    factory.set_ready(TrackKind::Video, false);
    video(&writer, &[100, 200]);
    assert!(writer.flush(WAIT));
    factory.set_ready(TrackKind::Video, true);
    video(&writer, &[300, 250, 400]);
    writer.finish();

    let output = observed.0.wait_finished().unwrap();
    assert_eq!(
        millis(&factory.recording().timestamps(TrackKind::Video)),
        vec![0, 300, 400]
    );
    assert_eq!(output.stats.dropped_backpressure, 2);
    assert_eq!(output.stats.dropped_out_of_order, 1);
}

#[test]
fn test_finalization_failure_is_reported() {
    let (writer, factory, observed) = memory_writer(writer_config("fail.mem"));
    factory.fail_finish(true);
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[0]);
    writer.finish();
    assert!(observed.0.wait_finished().is_err());
    assert!(!writer.is_active());
}

#[test]
fn test_concurrent_capture_threads() {
    let (writer, factory, observed) = memory_writer(writer_config("threads.mem"));
    let writer = Arc::new(writer);
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[0]);

    let handles: Vec<_> = [TrackKind::Video, TrackKind::Audio]
        .into_iter()
        .map(|kind| {
            let writer = Arc::clone(&writer);
            std::thread::spawn(move || {
                for i in 1..=50 {
                    match kind {
                        TrackKind::Video => video(&writer, &[i * 100]),
                        TrackKind::Audio => audio(&writer, &[i * 100 + 5]),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    writer.finish();

    let output = observed.0.wait_finished().unwrap();
    let recording = factory.recording();
    let video_times = recording.timestamps(TrackKind::Video);
    assert_eq!(video_times.len(), 51);
    assert!(video_times.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(output.stats.audio_appended, 50);
}

#[test]
fn test_sample_log_backend_roundtrip() {
    let config = writer_config("session.jsonl");
    let path = config.output_path.clone();
    std::fs::write(&path, "stale").unwrap();

    let observed = Recorder::default();
    let writer =
        MediaWriter::new(config, executor_config(), SampleLogFactory, observed.clone()).unwrap();
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[0, 100, 200]);
    audio(&writer, &[20, 120]);
    writer.pause_writing().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[500, 600]);
    writer.finish();

    let output = observed.0.wait_finished().unwrap();
    assert_eq!(output.path, path);

    let log = read_sample_log(&path).unwrap();
    assert_eq!(log.header.session_start, Some(ms(0)));
    assert_eq!(
        millis(&log.timestamps(TrackKind::Video)),
        vec![0, 100, 200, 300, 400]
    );
    assert_eq!(millis(&log.timestamps(TrackKind::Audio)), vec![20, 120]);
    let trailer = log.trailer.unwrap();
    assert_eq!(trailer.session_end, Some(ms(400)));
    assert_eq!(trailer.samples, 7);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_drop_right_after_finish_still_finalizes() {
    let (writer, factory, observed) = memory_writer(writer_config("drop_after_finish.mem"));
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    let times: Vec<i64> = (0..200).map(|i| i * 100).collect();
    video(&writer, &times);
    writer.finish();
    drop(writer);

    let output = observed.0.wait_finished().unwrap();
    let recording = factory.recording();
    assert!(recording.finalized);
    assert_eq!(recording.timestamps(TrackKind::Video).len(), 200);
    assert_eq!(output.stats.video_appended, 200);
    assert_eq!(observed.0.finished_count(), 1);
}

#[test]
fn test_drop_with_running_session_finishes_it() {
    let (writer, factory, observed) = memory_writer(writer_config("drop_running.mem"));
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[0, 100, 200]);
    drop(writer);

    let output = observed.0.wait_finished().unwrap();
    assert!(factory.recording().finalized);
    assert_eq!(output.stats.video_appended, 3);
    assert_eq!(output.duration, ms(200));
}

#[test]
fn test_shutdown_drains_queue_before_stopping() {
    let (writer, factory, observed) = memory_writer(writer_config("shutdown.mem"));
    writer.prepare().unwrap();
    writer.begin_writing().unwrap();
    video(&writer, &[0, 100, 200, 300]);
    writer.shutdown();

    let output = observed.0.wait_finished().unwrap();
    assert_eq!(
        millis(&factory.recording().timestamps(TrackKind::Video)),
        vec![0, 100, 200, 300]
    );
    assert_eq!(output.stats.video_appended, 4);

    // Dropping after an explicit shutdown finishes nothing twice.
    drop(writer);
    assert_eq!(observed.0.finished_count(), 1);
}
