use thiserror::Error;

use super::stream::CaptureState;

/// Failures reported by the capture engine.
///
/// Every variant is recoverable from the caller's side except `Subsystem`,
/// which means the audio host could not be acquired at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// Selection referenced a missing or output-only device
    #[error("input device not found: {0}")]
    DeviceNotFound(String),
    /// The hardware stream could not be opened (busy, unplugged, unsupported config)
    #[error("failed to open input stream: {0}")]
    StreamOpen(String),
    /// I/O fault while the stream was running
    #[error("input stream read failed: {0}")]
    StreamRead(String),
    /// Requested mode conflicts with the active one
    #[error("capture is busy ({current:?})")]
    InvalidState {
        /// State observed when the request was rejected
        current: CaptureState,
    },
    /// Configuration values out of range
    #[error("invalid capture config: {0}")]
    InvalidConfig(String),
    /// Audio host could not be acquired
    #[error("audio subsystem unavailable: {0}")]
    Subsystem(String),
}

/// Result alias used throughout the audio module
pub type CaptureResult<T> = Result<T, CaptureError>;
