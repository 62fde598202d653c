//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::clock::MediaTime;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Worker thread settings.
    pub executor: ExecutorConfig,

    /// Media writer settings.
    pub writer: WriterConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Command executor parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Name given to the worker thread.
    pub thread_name: String,

    /// Upper bound of one run-loop wait, in milliseconds.
    pub wait_interval_ms: u64,
}

/// Media writer parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Fixed working location of the output file, overwritten on prepare.
    pub output_path: PathBuf,

    /// Video track encoding parameters.
    pub video: VideoTrackConfig,

    /// Audio track encoding parameters.
    pub audio: AudioTrackConfig,

    /// Recording length after which the session is ready for collection.
    pub min_duration_secs: Option<f64>,

    /// Recording length at which the session finishes on its own.
    pub max_duration_secs: Option<f64>,

    /// Samples a track may have in flight before it reports backpressure.
    pub max_in_flight_samples: usize,

    /// Write the container header first so it can be streamed.
    pub optimize_for_network: bool,
}

/// Video track parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoTrackConfig {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Display rotation applied by players, in degrees.
    pub rotation_degrees: u32,
}

/// Audio track parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioTrackConfig {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
    /// Audio frames carried by one sample buffer.
    pub frames_per_packet: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "splice=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name: "splice-worker".to_string(),
            wait_interval_ms: 10_000,
        }
    }
}

impl ExecutorConfig {
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms.max(1))
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            output_path: std::env::temp_dir().join("splice-recording.jsonl"),
            video: VideoTrackConfig::default(),
            audio: AudioTrackConfig::default(),
            min_duration_secs: None,
            max_duration_secs: None,
            max_in_flight_samples: 64,
            optimize_for_network: true,
        }
    }
}

impl WriterConfig {
    pub fn min_duration(&self) -> Option<MediaTime> {
        self.min_duration_secs.map(MediaTime::from_secs_f64)
    }

    pub fn max_duration(&self) -> Option<MediaTime> {
        self.max_duration_secs.map(MediaTime::from_secs_f64)
    }

    /// Reject settings that cannot produce a playable session.
    pub fn validate(&self) -> Result<(), crate::error::SpliceError> {
        if self.video.fps == 0 {
            return Err(crate::error::SpliceError::config("video fps must be > 0"));
        }
        if self.audio.sample_rate == 0 {
            return Err(crate::error::SpliceError::config(
                "audio sample rate must be > 0",
            ));
        }
        if let (Some(min), Some(max)) = (self.min_duration_secs, self.max_duration_secs) {
            if min > max {
                return Err(crate::error::SpliceError::config(format!(
                    "min duration {min}s exceeds max duration {max}s"
                )));
            }
        }
        Ok(())
    }
}

impl Default for VideoTrackConfig {
    fn default() -> Self {
        Self {
            codec: "h264".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
            rotation_degrees: 90,
        }
    }
}

impl VideoTrackConfig {
    pub fn frame_duration(&self) -> MediaTime {
        MediaTime::frame_duration(self.fps)
    }
}

impl Default for AudioTrackConfig {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            sample_rate: 44_100,
            channels: 1,
            bitrate: 64_000,
            frames_per_packet: 1024,
        }
    }
}

impl AudioTrackConfig {
    pub fn packet_duration(&self) -> MediaTime {
        MediaTime::from_audio_frames(self.frames_per_packet, self.sample_rate)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<PathBuf, std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&config_path, json)?;
        Ok(config_path)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("splice").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.executor.wait_interval(), Duration::from_secs(10));
        assert_eq!(config.writer.video.width, 1280);
        assert_eq!(config.writer.audio.channels, 1);
        assert!(config.writer.min_duration().is_none());
        assert!(config.writer.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"writer": {"max_duration_secs": 15.0}}"#).unwrap();
        assert_eq!(config.writer.max_duration(), Some(MediaTime::from_millis(15_000)));
        assert_eq!(config.writer.video.fps, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = WriterConfig::default();
        config.min_duration_secs = Some(10.0);
        config.max_duration_secs = Some(5.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_packet_duration() {
        let audio = AudioTrackConfig {
            sample_rate: 48_000,
            frames_per_packet: 960,
            ..AudioTrackConfig::default()
        };
        assert_eq!(audio.packet_duration(), MediaTime::from_millis(20));
    }
}
