//! Per-frame signal conditioning: level, smoothing filter, silence detection.
//!
//! Everything here is a pure function so the capture loop can call it without
//! holding any lock.

use std::borrow::Cow;

use super::Sample;

/// Smoothing factor of the first-order low-pass filter (0 < alpha <= 1).
/// Lower values smooth harder.
pub const SMOOTHING_ALPHA: f32 = 0.5;

/// Largest magnitude an `i16` sample can carry (`|i16::MIN|`)
const FULL_SCALE: f64 = 32_768.0;

/// Label assigned to a frame by [`classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Level below the silence threshold
    Silence,
    /// Level at or above the silence threshold
    Speech,
}

/// Normalized loudness of a frame in `[0, 1]`.
///
/// Mean absolute sample value divided by full scale. Empty and all-zero frames
/// yield exactly `0.0`.
#[must_use]
pub fn level_of(frame: &[Sample]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }

    let sum: u64 = frame.iter().map(|&s| u64::from(s.unsigned_abs())).sum();

    // Frame lengths and sample sums stay far below 2^52
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let level = ((sum as f64 / frame.len() as f64) / FULL_SCALE).clamp(0.0, 1.0) as f32;
    level
}

/// Applies the noise filter when `enabled`, otherwise hands the frame back untouched.
///
/// The filter is a first-order exponential smoother run independently on each
/// interleaved channel, seeded with the channel's first sample so a frame never
/// ramps in from zero. Output length always equals input length.
#[must_use]
pub fn filter(frame: &[Sample], channels: u16, enabled: bool) -> Cow<'_, [Sample]> {
    if !enabled || frame.is_empty() {
        return Cow::Borrowed(frame);
    }

    let channels = usize::from(channels.max(1));
    let mut out = Vec::with_capacity(frame.len());
    let mut state: Vec<f32> = frame.iter().take(channels).map(|&s| f32::from(s)).collect();

    for (i, &sample) in frame.iter().enumerate() {
        let y = &mut state[i % channels];
        *y += SMOOTHING_ALPHA * (f32::from(sample) - *y);
        // y is a convex mix of i16 values, so it stays in range
        #[allow(clippy::cast_possible_truncation)]
        out.push(y.round() as Sample);
    }

    Cow::Owned(out)
}

/// `Silence` iff `level < threshold`; a level equal to the threshold is speech.
#[must_use]
pub fn classify(level: f32, threshold: f32) -> FrameClass {
    if level < threshold {
        FrameClass::Silence
    } else {
        FrameClass::Speech
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)] // Exact values are part of the contract
mod tests {
    use super::*;

    #[test]
    fn test_level_of_silence_is_zero() {
        assert_eq!(level_of(&[0; 1024]), 0.0);
        assert_eq!(level_of(&[]), 0.0);
    }

    #[test]
    fn test_level_of_full_scale_is_one() {
        assert_eq!(level_of(&[i16::MIN; 64]), 1.0);
        assert!(level_of(&[i16::MAX; 64]) <= 1.0);
    }

    #[test]
    fn test_level_of_mixed_signs_uses_magnitude() {
        let frame = [16_384, -16_384, 16_384, -16_384];
        assert!((level_of(&frame) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_level_of_stays_in_unit_range() {
        let frame: Vec<i16> = (0..4096_i32)
            .map(|i| i16::try_from((i * 7919) % 65_536 - 32_768).unwrap())
            .collect();
        let level = level_of(&frame);
        assert!((0.0..=1.0).contains(&level));
    }

    #[test]
    fn test_filter_disabled_is_identity() {
        let frame = vec![1, -200, 3000, -32_768, 32_767];
        let out = filter(&frame, 1, false);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out.as_ref(), frame.as_slice());
    }

    #[test]
    fn test_filter_preserves_length() {
        let frame: Vec<i16> = (0..1000).map(|i| if i % 2 == 0 { 1000 } else { -1000 }).collect();
        assert_eq!(filter(&frame, 1, true).len(), frame.len());
        assert_eq!(filter(&frame, 2, true).len(), frame.len());
    }

    #[test]
    fn test_filter_keeps_constant_signal() {
        let frame = vec![164; 256];
        assert_eq!(filter(&frame, 1, true).as_ref(), frame.as_slice());
    }

    #[test]
    fn test_filter_attenuates_alternating_noise() {
        let frame: Vec<i16> = (0..1024).map(|i| if i % 2 == 0 { 8000 } else { -8000 }).collect();
        let filtered = filter(&frame, 1, true);
        assert!(level_of(&filtered) < level_of(&frame));
    }

    #[test]
    fn test_filter_runs_per_channel() {
        // Left channel constant high, right constant low: smoothing must not bleed across
        let frame: Vec<i16> = (0..64).map(|i| if i % 2 == 0 { 10_000 } else { -10_000 }).collect();
        assert_eq!(filter(&frame, 2, true).as_ref(), frame.as_slice());
    }

    #[test]
    fn test_classify_boundary_is_speech() {
        assert_eq!(classify(0.005, 0.01), FrameClass::Silence);
        assert_eq!(classify(0.01, 0.01), FrameClass::Speech);
        assert_eq!(classify(0.5, 0.01), FrameClass::Speech);
        assert_eq!(classify(0.0, 0.0), FrameClass::Speech);
    }
}
