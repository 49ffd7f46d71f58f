use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, DeviceDescriptor, InputStream, StreamParams};
use super::{CaptureError, CaptureResult, Sample};

/// Seconds of audio the callback queue can hold before dropping samples
const QUEUE_SECONDS: usize = 2;
/// Floor for the stall timeout of a blocking read
const MIN_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Audio host backed by CPAL.
///
/// Only the host id is stored; CPAL host objects are not guaranteed to be
/// `Send`, and the capture thread opens its own stream.
pub struct CpalBackend {
    host_id: cpal::HostId,
}

impl CpalBackend {
    /// Acquires the platform default host and checks that it can enumerate devices.
    ///
    /// # Errors
    /// Returns `Subsystem` if the host does not respond.
    pub fn new() -> CaptureResult<Self> {
        let host = cpal::default_host();
        let host_id = host.id();
        let count = host
            .devices()
            .map_err(|e| CaptureError::Subsystem(e.to_string()))?
            .count();
        info!(host = ?host_id, devices = count, "audio host acquired");
        Ok(Self { host_id })
    }

    fn host(&self) -> CaptureResult<cpal::Host> {
        cpal::host_from_id(self.host_id).map_err(|e| CaptureError::Subsystem(e.to_string()))
    }

    fn device_at(&self, index: usize) -> CaptureResult<cpal::Device> {
        self.host()?
            .devices()
            .map_err(|e| CaptureError::Subsystem(e.to_string()))?
            .nth(index)
            .ok_or_else(|| CaptureError::DeviceNotFound(format!("no device at index {index}")))
    }
}

fn describe(index: usize, device: &cpal::Device) -> DeviceDescriptor {
    let name = device.name().unwrap_or_else(|_| "unknown".to_owned());

    let max_input_channels = device
        .supported_input_configs()
        .map(|ranges| ranges.map(|r| r.channels()).max().unwrap_or(0))
        .unwrap_or(0);

    let (native_sample_rate, low_latency, high_latency) = match device.default_input_config() {
        Ok(config) => {
            let rate = config.sample_rate().0;
            let (low, high) = match config.buffer_size() {
                cpal::SupportedBufferSize::Range { min, max } if rate > 0 => (
                    Some(Duration::from_secs_f64(f64::from(*min) / f64::from(rate))),
                    Some(Duration::from_secs_f64(f64::from(*max) / f64::from(rate))),
                ),
                _ => (None, None),
            };
            (rate, low, high)
        }
        Err(_) => (0, None, None),
    };

    DeviceDescriptor {
        index,
        name,
        max_input_channels,
        native_sample_rate,
        low_latency,
        high_latency,
    }
}

/// Preference order when a device offers several formats at the requested shape
const fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::I16 => 3,
        SampleFormat::F32 => 2,
        SampleFormat::U16 => 1,
        _ => 0,
    }
}

fn pick_config(
    device: &cpal::Device,
    params: &StreamParams,
) -> CaptureResult<cpal::SupportedStreamConfig> {
    let rate = cpal::SampleRate(params.sample_rate);
    device
        .supported_input_configs()
        .map_err(|e| CaptureError::StreamOpen(e.to_string()))?
        .filter(|r| {
            r.channels() == params.channels
                && r.min_sample_rate() <= rate
                && rate <= r.max_sample_rate()
                && format_rank(r.sample_format()) > 0
        })
        .max_by_key(|r| format_rank(r.sample_format()))
        .map(|r| r.with_sample_rate(rate))
        .ok_or_else(|| {
            CaptureError::StreamOpen(format!(
                "device does not support {} Hz with {} channel(s)",
                params.sample_rate, params.channels
            ))
        })
}

type FaultSlot = Arc<Mutex<Option<String>>>;

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: HeapProd<Sample>,
    fault: FaultSlot,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    Sample: FromSample<T>,
{
    let mut scratch: Vec<Sample> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().map(|&s| Sample::from_sample_(s)));
            // Lock-free push; the reader drains on its own thread
            let pushed = producer.push_slice(&scratch);
            if pushed < scratch.len() {
                warn!("capture queue full, dropped {} samples", scratch.len() - pushed);
            }
        },
        move |err| {
            warn!("audio stream error: {}", err);
            *fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
        },
        None,
    )
}

impl AudioBackend for CpalBackend {
    fn devices(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        let devices = self
            .host()?
            .devices()
            .map_err(|e| CaptureError::Subsystem(e.to_string()))?;
        Ok(devices
            .enumerate()
            .map(|(index, device)| describe(index, &device))
            .collect())
    }

    fn default_input_index(&self) -> CaptureResult<Option<usize>> {
        let host = self.host()?;
        let Some(default) = host.default_input_device() else {
            return Ok(None);
        };
        let Ok(default_name) = default.name() else {
            return Ok(None);
        };
        let position = host
            .devices()
            .map_err(|e| CaptureError::Subsystem(e.to_string()))?
            .position(|d| d.name().is_ok_and(|n| n == default_name));
        Ok(position)
    }

    fn open_input(
        &self,
        index: usize,
        params: &StreamParams,
    ) -> CaptureResult<Box<dyn InputStream>> {
        let device = self.device_at(index)?;
        let supported = pick_config(&device, params)?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let queue_len = (params.sample_rate as usize * usize::from(params.channels) * QUEUE_SECONDS)
            .max(params.samples_per_read() * 4);
        let (producer, consumer) = HeapRb::<Sample>::new(queue_len).split();
        let fault: FaultSlot = Arc::new(Mutex::new(None));

        let stream = match format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, producer, Arc::clone(&fault)),
            SampleFormat::F32 => build_stream::<f32>(&device, &config, producer, Arc::clone(&fault)),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, producer, Arc::clone(&fault)),
            other => {
                return Err(CaptureError::StreamOpen(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| CaptureError::StreamOpen(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureError::StreamOpen(e.to_string()))?;

        let read_duration = params.read_duration();
        debug!(
            index,
            format = ?format,
            sample_rate = params.sample_rate,
            channels = params.channels,
            "input stream opened"
        );

        Ok(Box::new(CpalInputStream {
            _stream: stream,
            consumer,
            fault,
            poll_interval: (read_duration / 4)
                .clamp(Duration::from_millis(1), Duration::from_millis(20)),
            stall_timeout: (read_duration * 10).max(MIN_STALL_TIMEOUT),
        }))
    }
}

/// Blocking reader over the CPAL callback queue
struct CpalInputStream {
    /// Kept alive for the lifetime of the reader; dropping it closes the stream
    _stream: cpal::Stream,
    consumer: HeapCons<Sample>,
    fault: FaultSlot,
    poll_interval: Duration,
    stall_timeout: Duration,
}

impl CpalInputStream {
    fn take_fault(&self) -> Option<String> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl InputStream for CpalInputStream {
    fn read_frame(&mut self, frame: &mut [Sample]) -> CaptureResult<()> {
        let deadline = Instant::now() + self.stall_timeout;
        let mut filled = 0;
        loop {
            filled += self.consumer.pop_slice(&mut frame[filled..]);
            if filled == frame.len() {
                return Ok(());
            }
            if let Some(message) = self.take_fault() {
                return Err(CaptureError::StreamRead(message));
            }
            if Instant::now() >= deadline {
                return Err(CaptureError::StreamRead(format!(
                    "no audio received for {:?}",
                    self.stall_timeout
                )));
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}
