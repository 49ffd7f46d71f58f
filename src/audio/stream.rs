//! Stream controller: owns the capture thread and the Idle/Streaming/Recording
//! state machine.
//!
//! Streaming spawns one producer thread that opens the hardware stream itself,
//! reads fixed-size frames, runs them through the signal processor, writes them
//! into the ring buffer and dispatches callbacks. Batch recording runs on the
//! caller's thread and touches neither the ring buffer nor the callbacks.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, StreamParams};
use super::callbacks::CaptureCallbacks;
use super::ring_buffer::RingBuffer;
use super::signal;
use super::{CaptureError, CaptureResult, Sample};

/// Capture mode; exactly one is active at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No stream open
    Idle,
    /// Background thread is capturing and dispatching callbacks
    Streaming,
    /// A batch recording is running on the caller's thread
    Recording,
}

/// Settings that can change while a stream is running.
///
/// Read once per frame by the capture loop, so a change applies to the next frame.
#[derive(Debug)]
pub struct LiveSettings {
    silence_threshold: AtomicU32,
    noise_filter_enabled: AtomicBool,
}

impl LiveSettings {
    /// Creates settings with the given initial values
    #[must_use]
    pub fn new(silence_threshold: f32, noise_filter_enabled: bool) -> Self {
        Self {
            silence_threshold: AtomicU32::new(silence_threshold.to_bits()),
            noise_filter_enabled: AtomicBool::new(noise_filter_enabled),
        }
    }

    /// Current silence threshold
    #[must_use]
    pub fn silence_threshold(&self) -> f32 {
        f32::from_bits(self.silence_threshold.load(Ordering::Relaxed))
    }

    /// Replaces the silence threshold
    pub fn set_silence_threshold(&self, threshold: f32) {
        self.silence_threshold
            .store(threshold.to_bits(), Ordering::Relaxed);
    }

    /// Whether the noise filter is on
    #[must_use]
    pub fn noise_filter_enabled(&self) -> bool {
        self.noise_filter_enabled.load(Ordering::Relaxed)
    }

    /// Turns the noise filter on or off
    pub fn set_noise_filter_enabled(&self, enabled: bool) {
        self.noise_filter_enabled.store(enabled, Ordering::Relaxed);
    }
}

/// State shared between the controller and its capture thread
struct Shared {
    state: Mutex<CaptureState>,
    idle: Condvar,
    stop_requested: AtomicBool,
    ring: Mutex<RingBuffer>,
    /// `f32` bits of the last computed level
    last_level: AtomicU32,
    settings: LiveSettings,
    capture_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ring(&self) -> MutexGuard<'_, RingBuffer> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `Idle -> next`, rejecting the request if another mode is active
    fn enter(&self, next: CaptureState) -> CaptureResult<()> {
        let mut state = self.state();
        if *state != CaptureState::Idle {
            return Err(CaptureError::InvalidState { current: *state });
        }
        *state = next;
        self.stop_requested.store(false, Ordering::Release);
        drop(state);
        Ok(())
    }

    fn set_idle(&self) {
        *self.state() = CaptureState::Idle;
        self.idle.notify_all();
    }

    fn on_capture_thread(&self) -> bool {
        *self
            .capture_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id())
    }

    fn wait_idle(&self) {
        let state = self.state();
        let _idle = self
            .idle
            .wait_while(state, |s| *s == CaptureState::Streaming)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

/// Returns the shared state to `Idle` when dropped, including on panic unwind
struct IdleOnExit<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl<'a> IdleOnExit<'a> {
    const fn new(shared: &'a Shared) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    /// Goes idle immediately; the drop becomes a no-op
    fn release(&mut self) {
        if self.armed {
            self.armed = false;
            self.shared.set_idle();
        }
    }
}

impl Drop for IdleOnExit<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Number of reads a batch recording of `duration` performs:
/// `ceil(duration * sample_rate / frame_size)`
#[must_use]
pub fn batch_read_count(duration: Duration, params: &StreamParams) -> usize {
    // Integer math keeps whole-frame durations exact
    let samples = duration.as_nanos() * u128::from(params.sample_rate);
    let per_read = NANOS_PER_SEC * params.frame_size.max(1) as u128;
    usize::try_from(samples.div_ceil(per_read)).unwrap_or(usize::MAX)
}

/// Drives the hardware stream in either streaming or batch mode
pub struct StreamController {
    backend: Arc<dyn AudioBackend>,
    params: StreamParams,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamController {
    /// Creates an idle controller with a ring buffer of `ring_capacity` samples
    #[must_use]
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        params: StreamParams,
        ring_capacity: usize,
        settings: LiveSettings,
    ) -> Self {
        Self {
            backend,
            params,
            shared: Arc::new(Shared {
                state: Mutex::new(CaptureState::Idle),
                idle: Condvar::new(),
                stop_requested: AtomicBool::new(false),
                ring: Mutex::new(RingBuffer::new(ring_capacity)),
                last_level: AtomicU32::new(0.0_f32.to_bits()),
                settings,
                capture_thread: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Current mode
    #[must_use]
    pub fn state(&self) -> CaptureState {
        *self.shared.state()
    }

    /// Live-adjustable settings
    #[must_use]
    pub fn settings(&self) -> &LiveSettings {
        &self.shared.settings
    }

    /// Stream shape used for every open
    #[must_use]
    pub const fn params(&self) -> &StreamParams {
        &self.params
    }

    /// Copy of the ring buffer, oldest sample first
    #[must_use]
    pub fn buffer(&self) -> Vec<Sample> {
        self.shared.ring().snapshot()
    }

    /// Ring buffer capacity in samples
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.shared.ring().capacity()
    }

    /// Empties the ring buffer
    pub fn clear_buffer(&self) {
        self.shared.ring().clear();
        debug!("audio buffer cleared");
    }

    /// Level of the most recently processed frame, `0.0` before any capture
    #[must_use]
    pub fn last_level(&self) -> f32 {
        f32::from_bits(self.shared.last_level.load(Ordering::Relaxed))
    }

    /// Handle that can stop streaming from any thread
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the device and starts the capture thread.
    ///
    /// Blocks until the thread reports whether the stream opened, so a failure
    /// never leaves a half-open stream behind.
    ///
    /// # Errors
    /// `InvalidState` if streaming or recording is already active (the running
    /// session is left untouched); `StreamOpen`/`DeviceNotFound` if the device
    /// cannot be opened.
    pub fn start_streaming(&self, device: usize, callbacks: CaptureCallbacks) -> CaptureResult<()> {
        let _span = tracing::debug_span!("start_streaming", device).entered();

        self.shared.enter(CaptureState::Streaming)?;

        // Held until the new thread is registered so a concurrent stop waits for it
        let mut slot = self.worker_slot();
        if let Some(previous) = slot.take() {
            // Thread that ended on its own (read failure or stop from a callback).
            // When restarted from its own error callback it cannot join itself.
            if previous.thread().id() != thread::current().id() && previous.join().is_err() {
                warn!("previous capture thread panicked");
            }
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let shared = Arc::clone(&self.shared);
        let backend = Arc::clone(&self.backend);
        let params = self.params;

        let spawned = thread::Builder::new()
            .name("audio-capture".to_owned())
            .spawn(move || capture_loop(&shared, backend.as_ref(), device, params, callbacks, &ready_tx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set_idle();
                return Err(CaptureError::StreamOpen(format!(
                    "failed to spawn capture thread: {e}"
                )));
            }
        };

        // A dropped sender means the thread died before reporting
        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::StreamOpen(
                "capture thread exited during startup".to_owned(),
            ))
        });

        match opened {
            Ok(()) => {
                *slot = Some(handle);
                info!(
                    device,
                    sample_rate = self.params.sample_rate,
                    channels = self.params.channels,
                    frame_size = self.params.frame_size,
                    "audio streaming started"
                );
                Ok(())
            }
            Err(err) => {
                if handle.join().is_err() {
                    warn!("capture thread panicked during startup");
                }
                self.shared.set_idle();
                warn!("failed to start streaming: {}", err);
                Err(err)
            }
        }
    }

    /// Stops streaming and waits for the capture thread to exit.
    ///
    /// No-op when not streaming. When called from inside a capture callback the
    /// loop is only signalled; it closes the stream as soon as the callback
    /// returns.
    pub fn stop_streaming(&self) {
        if self.shared.on_capture_thread() {
            self.shared.stop_requested.store(true, Ordering::Release);
            debug!("stop requested from capture thread");
            return;
        }

        let handle = self.worker_slot().take();
        let Some(handle) = handle else {
            return;
        };

        let start = Instant::now();
        self.shared.stop_requested.store(true, Ordering::Release);
        if handle.join().is_err() {
            warn!("capture thread panicked");
        }
        info!(
            stop_us = start.elapsed().as_micros(),
            "audio streaming stopped"
        );
    }

    /// Records `duration` of audio synchronously on the calling thread.
    ///
    /// Performs `ceil(duration * sample_rate / frame_size)` blocking reads and
    /// returns them concatenated, noise-filtered if the filter is enabled. The
    /// ring buffer and callbacks are not touched. Runs to completion or fails;
    /// there is no partial result.
    ///
    /// # Errors
    /// `InvalidState` if streaming or another recording is active;
    /// `StreamOpen`/`DeviceNotFound` if the device cannot be opened;
    /// `StreamRead` if a read fails.
    pub fn record_batch(&self, device: usize, duration: Duration) -> CaptureResult<Vec<Sample>> {
        let _span = tracing::debug_span!("record_batch", device).entered();
        let start = Instant::now();

        self.shared.enter(CaptureState::Recording)?;
        let _idle = IdleOnExit::new(&self.shared);

        let reads = batch_read_count(duration, &self.params);
        let per_read = self.params.samples_per_read();
        info!(
            duration_ms = duration.as_millis(),
            reads, "starting batch recording"
        );

        let mut stream = self.backend.open_input(device, &self.params)?;
        let mut samples = Vec::with_capacity(reads * per_read);
        let mut frame = vec![0; per_read];
        for _ in 0..reads {
            stream.read_frame(&mut frame)?;
            samples.extend_from_slice(&frame);
        }
        drop(stream);

        let samples = if self.shared.settings.noise_filter_enabled() {
            signal::filter(&samples, self.params.channels, true).into_owned()
        } else {
            samples
        };

        info!(
            samples = samples.len(),
            total_ms = start.elapsed().as_millis(),
            "batch recording completed"
        );
        Ok(samples)
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

/// Cloneable handle for stopping a streaming session from another thread or
/// from inside a callback
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Signals the capture loop to exit.
    ///
    /// From any thread other than the capture thread this also waits until the
    /// loop has closed the stream. No-op when not streaming.
    pub fn stop(&self) {
        let state = self.shared.state();
        if *state != CaptureState::Streaming {
            return;
        }
        self.shared.stop_requested.store(true, Ordering::Release);
        drop(state);
        if self.shared.on_capture_thread() {
            return;
        }
        self.shared.wait_idle();
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle").finish_non_exhaustive()
    }
}

fn capture_loop(
    shared: &Shared,
    backend: &dyn AudioBackend,
    device: usize,
    params: StreamParams,
    mut callbacks: CaptureCallbacks,
    ready: &mpsc::SyncSender<CaptureResult<()>>,
) {
    *shared
        .capture_thread
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
    // Declared before the stream so the stream is closed first on every exit path
    let mut idle = IdleOnExit::new(shared);

    let mut stream = match backend.open_input(device, &params) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut frame = vec![0; params.samples_per_read()];
    let mut frames: u64 = 0;

    while !shared.stop_requested.load(Ordering::Acquire) {
        if let Err(err) = stream.read_frame(&mut frame) {
            warn!(frames, "capture stream failed: {}", err);
            drop(stream);
            idle.release();
            callbacks.report_error(&err);
            return;
        }

        let filtered = signal::filter(&frame, params.channels, shared.settings.noise_filter_enabled());
        let level = signal::level_of(&filtered);
        let class = signal::classify(level, shared.settings.silence_threshold());

        shared.ring().push(&filtered);
        shared.last_level.store(level.to_bits(), Ordering::Relaxed);
        callbacks.dispatch(class, &filtered, level);
        frames += 1;
    }

    drop(stream);
    debug!(frames, "capture loop exited");
}
