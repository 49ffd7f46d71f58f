/// Platform seam: device enumeration and blocking stream reads
pub mod backend;
/// Hooks invoked by the streaming loop
pub mod callbacks;
/// Capture facade
pub mod capture;
/// CPAL implementation of the platform seam
pub mod cpal_backend;
/// Input device enumeration and selection
pub mod devices;
mod error;
/// Rolling sample buffer
pub mod ring_buffer;
/// Level, noise filter and silence detection
pub mod signal;
/// Capture thread and mode state machine
pub mod stream;

pub use backend::{AudioBackend, DeviceDescriptor, InputStream, StreamParams};
pub use callbacks::CaptureCallbacks;
pub use capture::{with_capture, AudioCapture};
pub use cpal_backend::CpalBackend;
pub use devices::{DeviceCatalog, DeviceSelector};
pub use error::{CaptureError, CaptureResult};
pub use ring_buffer::RingBuffer;
pub use signal::FrameClass;
pub use stream::{CaptureState, LiveSettings, StopHandle, StreamController};

/// One PCM sample: 16-bit signed
pub type Sample = i16;
