use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

use super::backend::{AudioBackend, DeviceDescriptor, StreamParams};
use super::callbacks::CaptureCallbacks;
use super::cpal_backend::CpalBackend;
use super::devices::{DeviceCatalog, DeviceSelector};
use super::stream::{CaptureState, LiveSettings, StopHandle, StreamController};
use super::{CaptureError, CaptureResult, Sample};
use crate::config::{validate_threshold, CaptureConfig};

/// Which device the next stream opens
#[derive(Debug, Clone, PartialEq)]
enum Selection {
    /// Resolve the host default at open time
    Default,
    /// Explicitly selected device
    Device(DeviceDescriptor),
    /// Last selection failed; opens are refused until a selection succeeds
    Unresolved,
}

/// Public entry point of the capture engine.
///
/// Owns the audio host for its whole lifetime. Dropping it (or calling
/// [`AudioCapture::close`]) stops any active stream, waits for the capture
/// thread and releases the host.
pub struct AudioCapture {
    config: CaptureConfig,
    catalog: DeviceCatalog,
    controller: StreamController,
    selection: Mutex<Selection>,
}

impl AudioCapture {
    /// Creates a capture on the platform default audio host
    ///
    /// # Errors
    /// Returns `InvalidConfig` for bad settings or `Subsystem` if the host is unavailable.
    pub fn open(config: CaptureConfig) -> CaptureResult<Self> {
        config.validate()?;
        let backend = CpalBackend::new()?;
        Self::with_backend(config, Arc::new(backend))
    }

    /// Creates a capture over any backend
    ///
    /// # Errors
    /// Returns `InvalidConfig` for bad settings.
    pub fn with_backend(config: CaptureConfig, backend: Arc<dyn AudioBackend>) -> CaptureResult<Self> {
        config.validate()?;

        let params = StreamParams {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size: config.frame_size,
        };
        let settings = LiveSettings::new(config.silence_threshold, config.noise_filter_enabled);
        let controller =
            StreamController::new(Arc::clone(&backend), params, config.ring_capacity(), settings);

        info!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            frame_size = config.frame_size,
            buffer_samples = config.ring_capacity(),
            "audio capture initialized"
        );

        Ok(Self {
            catalog: DeviceCatalog::new(backend),
            controller,
            selection: Mutex::new(Selection::Default),
            config,
        })
    }

    /// Settings this capture was built with
    #[must_use]
    pub const fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Current mode
    #[must_use]
    pub fn state(&self) -> CaptureState {
        self.controller.state()
    }

    /// Input-capable devices, freshly enumerated
    ///
    /// # Errors
    /// Returns error if the host cannot enumerate devices.
    pub fn list_devices(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        self.catalog.enumerate()
    }

    fn selection(&self) -> MutexGuard<'_, Selection> {
        self.selection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Chooses the device for subsequent streams; does not open anything.
    ///
    /// On failure the previous choice is discarded, so starting a stream fails
    /// until a selection succeeds.
    ///
    /// # Errors
    /// Returns `DeviceNotFound` if the selector matches no input device.
    pub fn select_device(&self, selector: &DeviceSelector) -> CaptureResult<DeviceDescriptor> {
        match self.catalog.resolve(selector) {
            Ok(device) => {
                info!(index = device.index, name = %device.name, "selected microphone");
                *self.selection() = Selection::Device(device.clone());
                Ok(device)
            }
            Err(err) => {
                warn!("microphone selection failed: {}", err);
                *self.selection() = Selection::Unresolved;
                Err(err)
            }
        }
    }

    /// Device chosen by the last successful [`AudioCapture::select_device`]
    #[must_use]
    pub fn selected_device(&self) -> Option<DeviceDescriptor> {
        match &*self.selection() {
            Selection::Device(device) => Some(device.clone()),
            Selection::Default | Selection::Unresolved => None,
        }
    }

    fn target_index(&self) -> CaptureResult<usize> {
        let selection = self.selection().clone();
        match selection {
            Selection::Device(device) => Ok(device.index),
            Selection::Default => self.catalog.resolve_default().map(|d| d.index),
            Selection::Unresolved => Err(CaptureError::DeviceNotFound(
                "no valid device selected".to_owned(),
            )),
        }
    }

    /// Starts background capture with the given callbacks.
    ///
    /// # Errors
    /// `InvalidState` if already streaming or recording; `DeviceNotFound` if
    /// the selection is unresolved; `StreamOpen` if the device refuses.
    pub fn start_streaming(&self, callbacks: CaptureCallbacks) -> CaptureResult<()> {
        let state = self.controller.state();
        if state != CaptureState::Idle {
            warn!("streaming already in progress");
            return Err(CaptureError::InvalidState { current: state });
        }
        let index = self.target_index()?;
        self.controller.start_streaming(index, callbacks)
    }

    /// Stops background capture; no-op when not streaming
    pub fn stop_streaming(&self) {
        self.controller.stop_streaming();
    }

    /// Handle for stopping the stream from another thread or a callback
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.controller.stop_handle()
    }

    /// Records `duration` of audio on the calling thread and returns it.
    ///
    /// # Errors
    /// `InvalidState` if streaming or recording; `DeviceNotFound`,
    /// `StreamOpen` or `StreamRead` on device failure.
    pub fn record_batch(&self, duration: Duration) -> CaptureResult<Vec<Sample>> {
        let state = self.controller.state();
        if state != CaptureState::Idle {
            warn!("recording already in progress");
            return Err(CaptureError::InvalidState { current: state });
        }
        let index = self.target_index()?;
        self.controller.record_batch(index, duration)
    }

    /// Copy of the rolling buffer, oldest first; empty before any capture
    #[must_use]
    pub fn buffer(&self) -> Vec<Sample> {
        self.controller.buffer()
    }

    /// Rolling buffer capacity in samples
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.controller.buffer_capacity()
    }

    /// Level of the last processed frame, `0.0` before any capture
    #[must_use]
    pub fn level(&self) -> f32 {
        self.controller.last_level()
    }

    /// Empties the rolling buffer
    pub fn clear_buffer(&self) {
        self.controller.clear_buffer();
    }

    /// Current silence threshold
    #[must_use]
    pub fn silence_threshold(&self) -> f32 {
        self.controller.settings().silence_threshold()
    }

    /// Changes the silence threshold; applies from the next frame
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `threshold` is outside `[0, 1]`.
    pub fn set_silence_threshold(&self, threshold: f32) -> CaptureResult<()> {
        validate_threshold(threshold)?;
        self.controller.settings().set_silence_threshold(threshold);
        Ok(())
    }

    /// Whether the noise filter is on
    #[must_use]
    pub fn noise_filter_enabled(&self) -> bool {
        self.controller.settings().noise_filter_enabled()
    }

    /// Turns the noise filter on or off; applies from the next frame
    pub fn set_noise_filter_enabled(&self, enabled: bool) {
        self.controller.settings().set_noise_filter_enabled(enabled);
    }

    /// Stops any capture and releases the audio host
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.controller.stop_streaming();
        info!("audio capture resources released");
    }
}

impl std::fmt::Debug for AudioCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioCapture")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Opens a capture on the default host, runs `f`, and releases everything
/// afterwards, whatever `f` returns.
///
/// # Errors
/// Returns error if the capture cannot be opened.
pub fn with_capture<T>(config: CaptureConfig, f: impl FnOnce(&AudioCapture) -> T) -> CaptureResult<T> {
    let capture = AudioCapture::open(config)?;
    let result = f(&capture);
    capture.close();
    Ok(result)
}
