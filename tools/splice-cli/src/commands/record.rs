//! Record a synthetic capture.
//!
//! Two capture threads stamp video frames and audio packets from one
//! [`RecordingClock`] and feed them to a [`MediaWriter`] while the command
//! pauses and resumes on a schedule. Frames produced during a pause are
//! dropped by the writer, and the paused time is cut from the output.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use splice_common::clock::{MediaTime, RecordingClock};
use splice_common::config::AppConfig;
use splice_common::error::SpliceResult;
use splice_writer::{MediaWriter, RecordingOutput, Sample, SampleLogFactory, WriterObserver};
use tokio::sync::oneshot;

pub struct RecordOptions {
    pub output: Option<PathBuf>,
    pub duration_secs: f64,
    pub fps: Option<u32>,
    /// `(pause_at, resume_at)` in seconds from capture start.
    pub pauses: Vec<(f64, f64)>,
    pub min_secs: Option<f64>,
    pub max_secs: Option<f64>,
}

/// Pair up `--pause-at` and `--resume-at` values into ordered windows.
pub fn pause_windows(pause_at: &[f64], resume_at: &[f64]) -> anyhow::Result<Vec<(f64, f64)>> {
    if pause_at.len() != resume_at.len() {
        anyhow::bail!(
            "every --pause-at needs a matching --resume-at ({} vs {})",
            pause_at.len(),
            resume_at.len()
        );
    }
    let mut windows: Vec<(f64, f64)> = pause_at
        .iter()
        .copied()
        .zip(resume_at.iter().copied())
        .collect();
    windows.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut previous_resume = 0.0;
    for &(pause, resume) in &windows {
        if pause < previous_resume || resume <= pause {
            anyhow::bail!("invalid pause window {pause}s..{resume}s");
        }
        previous_resume = resume;
    }
    Ok(windows)
}

struct CliObserver {
    finished: Mutex<Option<oneshot::Sender<SpliceResult<RecordingOutput>>>>,
}

impl WriterObserver for CliObserver {
    fn on_ready_for_collection(&self) {
        println!("Minimum duration reached; recording can be collected");
    }

    fn on_finished(&self, result: SpliceResult<RecordingOutput>) {
        let sender = self.finished.lock().ok().and_then(|mut slot| slot.take());
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
    }

    fn on_error(&self, error: &splice_common::error::SpliceError) {
        tracing::warn!(error = %error, "Sample dropped");
    }
}

fn spawn_capture(
    name: &str,
    step: MediaTime,
    clock: RecordingClock,
    stop: Arc<AtomicBool>,
    write: impl Fn(Sample) + Send + 'static,
) -> anyhow::Result<JoinHandle<u64>> {
    let interval = Duration::from_nanos(step.as_nanos().max(1) as u64);
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut produced: u64 = 0;
            while !stop.load(Ordering::Acquire) {
                let payload = produced.to_le_bytes().to_vec();
                write(Sample::new(clock.now(), payload).with_duration(step));
                produced += 1;
                std::thread::sleep(interval);
            }
            produced
        })?;
    Ok(handle)
}

pub async fn run(mut config: AppConfig, options: RecordOptions) -> anyhow::Result<()> {
    if let Some(output) = options.output {
        config.writer.output_path = output;
    }
    if let Some(fps) = options.fps {
        config.writer.video.fps = fps;
    }
    if options.min_secs.is_some() {
        config.writer.min_duration_secs = options.min_secs;
    }
    if options.max_secs.is_some() {
        config.writer.max_duration_secs = options.max_secs;
    }
    config.writer.validate()?;

    println!("Recording to: {}", config.writer.output_path.display());
    println!(
        "  Video: {}x{} @ {}fps ({})",
        config.writer.video.width,
        config.writer.video.height,
        config.writer.video.fps,
        config.writer.video.codec
    );
    println!(
        "  Audio: {} Hz x {} ({})",
        config.writer.audio.sample_rate, config.writer.audio.channels, config.writer.audio.codec
    );
    println!("  Length: {:.1}s, pauses: {}", options.duration_secs, options.pauses.len());
    println!();

    let (finished_tx, mut finished_rx) = oneshot::channel();
    let observer = CliObserver {
        finished: Mutex::new(Some(finished_tx)),
    };
    let writer = Arc::new(MediaWriter::new(
        config.writer.clone(),
        config.executor.clone(),
        SampleLogFactory,
        observer,
    )?);
    writer.prepare()?;
    writer.begin_writing()?;

    let clock = RecordingClock::start();
    let stop = Arc::new(AtomicBool::new(false));
    let video_writer = Arc::clone(&writer);
    let audio_writer = Arc::clone(&writer);
    let captures = vec![
        spawn_capture(
            "capture-video",
            config.writer.video.frame_duration(),
            clock.clone(),
            Arc::clone(&stop),
            move |sample| video_writer.write_video_buffer(sample),
        )?,
        spawn_capture(
            "capture-audio",
            config.writer.audio.packet_duration(),
            clock.clone(),
            Arc::clone(&stop),
            move |sample| audio_writer.write_audio_buffer(sample),
        )?,
    ];

    let start = tokio::time::Instant::now();
    let at = |secs: f64| start + Duration::from_secs_f64(secs.max(0.0));
    let timeline = async {
        for &(pause, resume) in &options.pauses {
            tokio::time::sleep_until(at(pause)).await;
            match writer.pause_writing() {
                Ok(()) => println!("[{:.2}s] paused", clock.elapsed_secs()),
                Err(e) => tracing::warn!(error = %e, "Pause ignored"),
            }
            tokio::time::sleep_until(at(resume)).await;
            match writer.begin_writing() {
                Ok(()) => println!("[{:.2}s] resumed", clock.elapsed_secs()),
                Err(e) => tracing::warn!(error = %e, "Resume ignored"),
            }
        }
        tokio::time::sleep_until(at(options.duration_secs)).await;
    };

    let auto_finished = tokio::select! {
        result = &mut finished_rx => Some(result),
        _ = timeline => None,
    };

    stop.store(true, Ordering::Release);
    let produced = tokio::task::spawn_blocking(move || {
        captures
            .into_iter()
            .map(|handle| handle.join().unwrap_or(0))
            .sum::<u64>()
    })
    .await?;

    let result = match auto_finished {
        Some(result) => {
            println!("Maximum duration reached; recording finished early");
            result?
        }
        None => {
            writer.finish();
            tokio::time::timeout(Duration::from_secs(30), finished_rx).await??
        }
    };
    let output = result?;

    println!();
    println!("Recording saved to: {}", output.path.display());
    println!("  Duration: {}", output.duration);
    println!("  Captured samples: {produced}");
    println!("  Video samples: {}", output.stats.video_appended);
    println!("  Audio samples: {}", output.stats.audio_appended);
    println!(
        "  Dropped: {} (paused {}, backpressure {}, out of order {}, before start {})",
        output.stats.dropped(),
        output.stats.dropped_gate,
        output.stats.dropped_backpressure,
        output.stats.dropped_out_of_order,
        output.stats.dropped_before_start
    );

    Ok(())
}
