use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use voice_capture::audio::{AudioCapture, CaptureCallbacks, DeviceSelector};
use voice_capture::config::Config;
use voice_capture::telemetry;

/// Microphone capture utility
#[derive(Debug, Parser)]
#[command(name = "voice-capture", version)]
struct Cli {
    /// Config file (defaults to ~/.voice-capture.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List input devices
    Devices,
    /// Stream from the microphone until Ctrl+C or the time limit
    Stream {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
        #[command(flatten)]
        device: DeviceArgs,
    },
    /// Record a fixed duration and report what was captured
    Record {
        /// Recording length in seconds
        #[arg(long, default_value_t = 3.0)]
        seconds: f64,
        #[command(flatten)]
        device: DeviceArgs,
    },
}

#[derive(Debug, clap::Args)]
#[group(multiple = false)]
struct DeviceArgs {
    /// Device index as shown by `devices`
    #[arg(long)]
    device: Option<usize>,
    /// Case-insensitive fragment of the device name
    #[arg(long)]
    name: Option<String>,
}

impl DeviceArgs {
    fn selector(&self) -> DeviceSelector {
        match (self.device, &self.name) {
            (Some(index), _) => DeviceSelector::Index(index),
            (None, Some(name)) => DeviceSelector::Name(name.clone()),
            (None, None) => DeviceSelector::Default,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    telemetry::init(&config.telemetry)?;
    tracing::info!("voice-capture starting");

    let capture = Arc::new(AudioCapture::open(config.audio).context("failed to open audio host")?);

    match cli.command {
        Command::Devices => list_devices(&capture)?,
        Command::Stream { seconds, device } => {
            capture.select_device(&device.selector())?;
            stream(&capture, seconds).await?;
        }
        Command::Record { seconds, device } => {
            capture.select_device(&device.selector())?;
            record(Arc::clone(&capture), seconds).await?;
        }
    }

    Ok(())
}

fn list_devices(capture: &AudioCapture) -> Result<()> {
    let devices = capture.list_devices()?;
    if devices.is_empty() {
        println!("No input devices found");
        return Ok(());
    }

    for device in devices {
        println!("{:>3}: {}", device.index, device.name);
        println!(
            "     channels: {}  sample rate: {} Hz",
            device.max_input_channels, device.native_sample_rate
        );
        if let (Some(low), Some(high)) = (device.low_latency, device.high_latency) {
            println!(
                "     latency: {:.3}s - {:.3}s",
                low.as_secs_f64(),
                high.as_secs_f64()
            );
        }
    }
    Ok(())
}

async fn stream(capture: &AudioCapture, seconds: Option<u64>) -> Result<()> {
    // Only log transitions; per-frame output would flood the terminal
    let speaking = Arc::new(AtomicBool::new(false));
    let speaking_flag = Arc::clone(&speaking);
    let callbacks = CaptureCallbacks::new()
        .on_speech(move |level| {
            if !speaking_flag.swap(true, Ordering::Relaxed) {
                tracing::info!(level, "speech");
            }
        })
        .on_silence(move |level| {
            if speaking.swap(false, Ordering::Relaxed) {
                tracing::info!(level, "silence");
            }
        })
        .on_level(|level| tracing::trace!(level, "frame"))
        .on_error(|err| tracing::warn!("stream ended: {}", err));

    capture.start_streaming(callbacks)?;
    println!("Streaming. Press Ctrl+C to stop.");

    let limit = seconds.map_or(Duration::MAX, Duration::from_secs);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        () = tokio::time::sleep(limit) => {}
    }

    capture.stop_streaming();
    let buffered = capture.buffer();
    println!(
        "Stopped. {} samples buffered, last level {:.4}",
        buffered.len(),
        capture.level()
    );
    Ok(())
}

async fn record(capture: Arc<AudioCapture>, seconds: f64) -> Result<()> {
    let duration = Duration::try_from_secs_f64(seconds).context("invalid duration")?;
    println!("Recording {seconds:.1}s...");

    let samples = tokio::task::spawn_blocking(move || capture.record_batch(duration))
        .await
        .context("recording task failed")??;

    let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
    println!(
        "Captured {} samples, peak {}, level {:.4}",
        samples.len(),
        peak,
        voice_capture::audio::signal::level_of(&samples)
    );
    Ok(())
}
