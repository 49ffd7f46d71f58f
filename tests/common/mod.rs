//! Scripted audio backend for exercising the capture engine without hardware

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use voice_capture::audio::{
    AudioBackend, CaptureError, CaptureResult, DeviceDescriptor, InputStream, Sample, StreamParams,
};

pub fn mic(index: usize, name: &str, channels: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        index,
        name: name.to_owned(),
        max_input_channels: channels,
        native_sample_rate: 16000,
        low_latency: Some(Duration::from_millis(10)),
        high_latency: Some(Duration::from_millis(100)),
    }
}

#[derive(Default)]
pub struct Counters {
    /// Streams ever opened
    pub opened: AtomicUsize,
    /// Streams currently open
    pub live: AtomicUsize,
    /// Successful reads across all streams
    pub reads: AtomicUsize,
}

/// Backend whose streams deliver constant-valued frames from a script.
///
/// Frame `k` of a stream is filled with `values[k % values.len()]`. With
/// `fail_after = Some(n)` the read after the `n`th frame fails. With
/// `alternating`, odd positions within a frame carry the negated value.
pub struct FakeBackend {
    devices: Vec<DeviceDescriptor>,
    values: Vec<Sample>,
    fail_after: Option<usize>,
    alternating: bool,
    read_delay: Duration,
    pub fail_open: AtomicBool,
    pub counters: Arc<Counters>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            devices: vec![mic(0, "USB Microphone", 1), mic(1, "HDMI Output", 0), mic(2, "Built-in Microphone", 2)],
            values: vec![1000],
            fail_after: None,
            alternating: false,
            read_delay: Duration::from_millis(1),
            fail_open: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_values(mut self, values: Vec<Sample>) -> Self {
        self.values = values;
        self
    }

    pub fn failing_after(mut self, frames: usize) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Frames of `+v, -v, +v, ...`, the pattern the smoothing filter attenuates
    pub fn alternating(mut self) -> Self {
        self.alternating = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }
}

impl AudioBackend for FakeBackend {
    fn devices(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        Ok(self.devices.clone())
    }

    fn default_input_index(&self) -> CaptureResult<Option<usize>> {
        Ok(Some(0))
    }

    fn open_input(&self, index: usize, _params: &StreamParams) -> CaptureResult<Box<dyn InputStream>> {
        if !self.devices.iter().any(|d| d.index == index && d.is_input()) {
            return Err(CaptureError::DeviceNotFound(format!("no device at index {index}")));
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(CaptureError::StreamOpen("device busy".to_owned()));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            values: self.values.clone(),
            fail_after: self.fail_after,
            alternating: self.alternating,
            read_delay: self.read_delay,
            frames: 0,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeStream {
    values: Vec<Sample>,
    fail_after: Option<usize>,
    alternating: bool,
    read_delay: Duration,
    frames: usize,
    counters: Arc<Counters>,
}

impl InputStream for FakeStream {
    fn read_frame(&mut self, frame: &mut [Sample]) -> CaptureResult<()> {
        thread::sleep(self.read_delay);
        if self.fail_after.is_some_and(|n| self.frames >= n) {
            return Err(CaptureError::StreamRead("device unplugged".to_owned()));
        }
        let value = self.values[self.frames % self.values.len()];
        if self.alternating {
            fill_alternating(frame, value);
        } else {
            frame.fill(value);
        }
        self.frames += 1;
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Writes `+value, -value, ...` into `frame`
pub fn fill_alternating(frame: &mut [Sample], value: Sample) {
    for (i, sample) in frame.iter_mut().enumerate() {
        *sample = if i % 2 == 0 { value } else { -value };
    }
}

/// Whether `frame` is exactly the alternating pattern for `value`
pub fn is_alternating(frame: &[Sample], value: Sample) -> bool {
    frame
        .iter()
        .enumerate()
        .all(|(i, &s)| s == if i % 2 == 0 { value } else { -value })
}

/// Polls `cond` until it holds, failing the test after five seconds
pub fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}
