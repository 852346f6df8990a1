//! Tolerance constants for export testing.
//!
//! Different stages require different precision levels.

/// Floating point rounding errors (for passthrough, exact gain).
/// Use for operations that should be mathematically exact.
pub const FLOAT_EPSILON: f32 = 1e-6;

/// Resampler tolerance. Sinc interpolation ripples slightly around a
/// steady signal.
pub const SRC_EPSILON: f32 = 2e-3;

/// Silence threshold (~-80dB).
/// Values below this are considered silent.
pub const SILENCE_THRESHOLD: f32 = 0.0001;

/// 16-bit quantization step size.
/// Use when testing bit-depth conversion to 16-bit.
pub const INT16_EPSILON: f32 = 1.0 / 32768.0;

/// 24-bit quantization step size.
/// Use when testing bit-depth conversion to 24-bit.
pub const INT24_EPSILON: f32 = 1.0 / 8388608.0;
