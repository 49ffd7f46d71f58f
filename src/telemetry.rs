use anyhow::{anyhow, Context, Result};
use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, TelemetryConfig};

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info";

/// Initialize logging: stdout when disabled, appended log file when enabled
///
/// # Errors
/// Returns error if the log directory or file cannot be created, or a global
/// subscriber is already installed.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let filter = env_filter();

    if !config.enabled {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;
        return Ok(());
    }

    let expanded_path = Config::expand_path(&config.log_path)?;

    if let Some(parent) = expanded_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&expanded_path)
        .context("failed to open log file")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_target(false)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))?;

    tracing::info!("telemetry initialized: {}", expanded_path.display());

    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_falls_back_to_default() {
        std::env::remove_var("RUST_LOG");
        assert_eq!(env_filter().to_string(), DEFAULT_FILTER);
    }

    #[test]
    #[ignore = "installs a global tracing subscriber"]
    fn test_init_with_file_logging() {
        let path = std::env::temp_dir().join("voice-capture-logs").join("capture.log");
        let config = TelemetryConfig {
            enabled: true,
            log_path: path.display().to_string(),
        };
        init(&config).unwrap();
        assert!(path.exists());
    }
}
