use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::{CaptureError, CaptureResult};

/// File-level configuration for the CLI
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Capture engine settings
    pub audio: CaptureConfig,
    /// Logging settings
    pub telemetry: TelemetryConfig,
}

/// Capture engine settings.
///
/// Fixed for the lifetime of an `AudioCapture`, except `silence_threshold` and
/// `noise_filter_enabled`, which have live setters on the capture.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channels
    #[serde(alias = "channel_count")]
    pub channels: u16,
    /// Frames per hardware read
    pub frame_size: usize,
    /// Seconds of audio kept in the rolling buffer
    #[serde(alias = "buffer_duration_seconds")]
    pub buffer_duration_secs: f64,
    /// Level below which a frame counts as silence (0..=1)
    pub silence_threshold: f32,
    /// Smooth frames before measuring and buffering them
    pub noise_filter_enabled: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            frame_size: 1024,
            buffer_duration_secs: 3.0,
            silence_threshold: 0.01,
            noise_filter_enabled: true,
        }
    }
}

impl CaptureConfig {
    /// Checks every field is usable
    ///
    /// # Errors
    /// Returns `InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> CaptureResult<()> {
        if self.sample_rate == 0 {
            return Err(CaptureError::InvalidConfig("sample_rate must be > 0".to_owned()));
        }
        if self.channels == 0 {
            return Err(CaptureError::InvalidConfig("channels must be > 0".to_owned()));
        }
        if self.frame_size == 0 {
            return Err(CaptureError::InvalidConfig("frame_size must be > 0".to_owned()));
        }
        if !self.buffer_duration_secs.is_finite() || self.buffer_duration_secs <= 0.0 {
            return Err(CaptureError::InvalidConfig(format!(
                "buffer_duration_secs must be positive, got {}",
                self.buffer_duration_secs
            )));
        }
        validate_threshold(self.silence_threshold)?;
        if self.ring_capacity() == 0 {
            return Err(CaptureError::InvalidConfig(
                "buffer_duration_secs too short to hold one sample".to_owned(),
            ));
        }
        Ok(())
    }

    /// Rolling buffer size in samples:
    /// `buffer_duration_secs * sample_rate * channels`
    #[must_use]
    pub fn ring_capacity(&self) -> usize {
        // Validated positive and finite before use
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let frames = (self.buffer_duration_secs * f64::from(self.sample_rate)).round() as usize;
        frames * usize::from(self.channels)
    }
}

/// Rejects thresholds outside `[0, 1]` or NaN
///
/// # Errors
/// Returns `InvalidConfig` for out-of-range values.
pub fn validate_threshold(threshold: f32) -> CaptureResult<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(CaptureError::InvalidConfig(format!(
            "silence_threshold must be within 0..=1, got {threshold}"
        )))
    }
}

/// Logging settings
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Write logs to `log_path` instead of stdout
    pub enabled: bool,
    /// Log file location (`~/` is expanded)
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: "~/.voice-capture/capture.log".to_owned(),
        }
    }
}

impl Config {
    /// Load config from `path`, or `~/.voice-capture.toml` when `None`.
    ///
    /// A missing file yields defaults; nothing is written.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            tracing::debug!("no config at {}, using defaults", config_path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&config_path).context("failed to read config file")?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Returns error on malformed TOML or invalid capture settings.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).context("failed to parse config TOML")?;
        config
            .audio
            .validate()
            .context("invalid [audio] section")?;
        Ok(config)
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".voice-capture.toml"))
    }

    /// Expand ~ in paths to home directory
    ///
    /// # Errors
    /// Returns error if the path starts with `~/` and `HOME` is unset.
    pub fn expand_path(path: &str) -> Result<PathBuf> {
        if let Some(stripped) = path.strip_prefix("~/") {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(PathBuf::from(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_size, 1024);
        assert!((config.buffer_duration_secs - 3.0).abs() < f64::EPSILON);
        assert!((config.silence_threshold - 0.01).abs() < f32::EPSILON);
        assert!(config.noise_filter_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ring_capacity() {
        let config = CaptureConfig {
            buffer_duration_secs: 2.0,
            ..CaptureConfig::default()
        };
        assert_eq!(config.ring_capacity(), 32000);

        let stereo = CaptureConfig {
            channels: 2,
            sample_rate: 44100,
            buffer_duration_secs: 1.0,
            ..CaptureConfig::default()
        };
        assert_eq!(stereo.ring_capacity(), 88200);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            CaptureConfig {
                sample_rate: 0,
                ..CaptureConfig::default()
            },
            CaptureConfig {
                channels: 0,
                ..CaptureConfig::default()
            },
            CaptureConfig {
                frame_size: 0,
                ..CaptureConfig::default()
            },
            CaptureConfig {
                buffer_duration_secs: -1.0,
                ..CaptureConfig::default()
            },
            CaptureConfig {
                buffer_duration_secs: f64::NAN,
                ..CaptureConfig::default()
            },
            CaptureConfig {
                silence_threshold: 1.5,
                ..CaptureConfig::default()
            },
            CaptureConfig {
                silence_threshold: f32::NAN,
                ..CaptureConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(CaptureError::InvalidConfig(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_toml_partial_uses_defaults() {
        let config = Config::from_toml(
            r#"
[audio]
sample_rate = 44100
noise_filter_enabled = false

[telemetry]
enabled = true
log_path = "/tmp/capture.log"
"#,
        )
        .unwrap();

        assert_eq!(config.audio.sample_rate, 44100);
        assert!(!config.audio.noise_filter_enabled);
        assert_eq!(config.audio.frame_size, 1024);
        assert!(config.telemetry.enabled);
        assert_eq!(config.telemetry.log_path, "/tmp/capture.log");
    }

    #[test]
    fn test_from_toml_accepts_long_option_names() {
        let config = Config::from_toml(
            r#"
[audio]
channel_count = 2
buffer_duration_seconds = 1.5
"#,
        )
        .unwrap();

        assert_eq!(config.audio.channels, 2);
        assert!((config.audio.buffer_duration_secs - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.audio.ring_capacity(), 48000);
    }

    #[test]
    fn test_from_toml_empty_is_default() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_from_toml_rejects_invalid_audio() {
        assert!(Config::from_toml("[audio]\nchannels = 0\n").is_err());
        assert!(Config::from_toml("[audio]\nsample_rate = \"fast\"\n").is_err());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("voice-capture-missing-config.toml");
        let _ = fs::remove_file(&path);
        assert_eq!(Config::load(Some(&path)).unwrap(), Config::default());
    }

    #[test]
    fn test_load_reads_file() {
        let path = std::env::temp_dir().join("voice-capture-test-config.toml");
        fs::write(&path, "[audio]\nframe_size = 512\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.audio.frame_size, 512);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_expand_path() {
        let home = std::env::var("HOME").expect("HOME not set");
        assert_eq!(
            Config::expand_path("~/logs/a.log").unwrap(),
            PathBuf::from(home).join("logs/a.log")
        );
        assert_eq!(
            Config::expand_path("/var/log/a.log").unwrap(),
            PathBuf::from("/var/log/a.log")
        );
    }
}
