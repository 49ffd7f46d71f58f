//! Voice Capture - real-time microphone capture engine for dictation tools
//!
//! Enumerates input devices, streams fixed-size frames on a background thread
//! with level metering and silence detection, keeps a rolling buffer of recent
//! audio, and supports synchronous fixed-length recordings.

/// Audio capture and processing
pub mod audio;
/// Configuration management
pub mod config;
/// Logging setup
pub mod telemetry;
