use std::time::Duration;

use super::{CaptureResult, Sample};

/// Snapshot of one device as reported by the audio host.
///
/// Recreated on every enumeration; device topology can change between calls.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// Position in the host's device enumeration
    pub index: usize,
    /// Human readable name
    pub name: String,
    /// Maximum input channels (0 for output-only devices)
    pub max_input_channels: u16,
    /// Native sample rate in Hz (0 if unknown)
    pub native_sample_rate: u32,
    /// Lowest input latency the host can be asked for
    pub low_latency: Option<Duration>,
    /// Highest input latency the host can be asked for
    pub high_latency: Option<Duration>,
}

impl DeviceDescriptor {
    /// Whether the device can capture audio at all
    #[must_use]
    pub const fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }
}

/// Shape of every stream this engine opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channels per frame
    pub channels: u16,
    /// Frames delivered per read
    pub frame_size: usize,
}

impl StreamParams {
    /// Samples in one read (`frame_size * channels`)
    #[must_use]
    pub fn samples_per_read(&self) -> usize {
        self.frame_size * usize::from(self.channels)
    }

    /// Wall-clock length of one read
    #[must_use]
    pub fn read_duration(&self) -> Duration {
        // frame_size is bounded by config validation
        #[allow(clippy::cast_precision_loss)]
        let secs = self.frame_size as f64 / f64::from(self.sample_rate.max(1));
        Duration::from_secs_f64(secs)
    }
}

/// Blocking reader over an open hardware stream.
///
/// Dropping the reader closes the stream.
pub trait InputStream {
    /// Fills `frame` completely, blocking until enough audio has arrived.
    ///
    /// # Errors
    /// Returns `StreamRead` when the stream faults or stops delivering audio.
    fn read_frame(&mut self, frame: &mut [Sample]) -> CaptureResult<()>;
}

/// Platform audio host: device enumeration and stream opening.
///
/// Implementations must be shareable with the capture thread.
#[cfg_attr(test, mockall::automock)]
pub trait AudioBackend: Send + Sync {
    /// Every device the host knows about, output-only ones included, in
    /// enumeration order.
    ///
    /// # Errors
    /// Returns error if the host cannot enumerate devices.
    fn devices(&self) -> CaptureResult<Vec<DeviceDescriptor>>;

    /// Enumeration index of the host's default input device, if any
    ///
    /// # Errors
    /// Returns error if the host cannot enumerate devices.
    fn default_input_index(&self) -> CaptureResult<Option<usize>>;

    /// Opens and starts an input stream on the device at `index`.
    ///
    /// # Errors
    /// Returns `DeviceNotFound` if the index is gone, `StreamOpen` if the host
    /// refuses the configuration.
    fn open_input(&self, index: usize, params: &StreamParams) -> CaptureResult<Box<dyn InputStream>>;
}
