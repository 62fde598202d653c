//! Summarize a sample log.

use std::path::PathBuf;

use splice_common::clock::MediaTime;
use splice_writer::backend::sample_log::LogTrack;
use splice_writer::{read_sample_log, TrackSpec};

/// Timing summary of one track.
#[derive(Debug, Clone, PartialEq)]
struct TrackSummary {
    count: usize,
    first: Option<MediaTime>,
    last: Option<MediaTime>,
    median_step: Option<MediaTime>,
    largest_step: Option<MediaTime>,
    /// Steps longer than twice the median.
    discontinuities: usize,
}

impl TrackSummary {
    fn from_times(times: &[MediaTime]) -> Self {
        let mut steps: Vec<MediaTime> = times.windows(2).map(|w| w[1] - w[0]).collect();
        let largest_step = steps.iter().copied().max();
        steps.sort();
        let median_step = steps.get(steps.len() / 2).copied();
        let discontinuities = match median_step {
            Some(median) => steps
                .iter()
                .filter(|&&step| step > median + median)
                .count(),
            None => 0,
        };
        Self {
            count: times.len(),
            first: times.first().copied(),
            last: times.last().copied(),
            median_step,
            largest_step,
            discontinuities,
        }
    }
}

fn describe(track: &LogTrack) -> String {
    match &track.spec {
        TrackSpec::Video {
            codec,
            width,
            height,
            fps,
            rotation_degrees,
        } => format!("video {codec} {width}x{height} @ {fps}fps, rotated {rotation_degrees}°"),
        TrackSpec::Audio {
            codec,
            sample_rate,
            channels,
            bitrate,
        } => format!("audio {codec} {sample_rate} Hz x {channels}, {bitrate} bps"),
    }
}

fn show(time: Option<MediaTime>) -> String {
    time.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let log = read_sample_log(&path)?;
    let header = &log.header;

    println!("Sample log: {}", path.display());
    println!("  Format: {} v{}", header.format, header.version);
    println!("  Created: {}", header.created_at);
    println!("  Session start: {}", show(header.session_start));
    match &log.trailer {
        Some(trailer) => {
            println!("  Session end: {}", show(trailer.session_end));
            println!("  Samples: {}", trailer.samples);
        }
        None => println!("  Not finalized"),
    }
    println!();

    println!("Tracks:");
    for track in &header.tracks {
        let times: Vec<MediaTime> = log.track_samples(track.id).map(|s| s.pts).collect();
        let summary = TrackSummary::from_times(&times);
        println!("  [{}] {}", track.id.0, describe(track));
        println!("      Samples: {}", summary.count);
        println!(
            "      Range: {} .. {}",
            show(summary.first),
            show(summary.last)
        );
        println!(
            "      Step: median {}, largest {}",
            show(summary.median_step),
            show(summary.largest_step)
        );
        if summary.discontinuities == 0 {
            println!("      Continuous");
        } else {
            println!("      Discontinuities: {}", summary.discontinuities);
        }
    }

    Ok(())
}
