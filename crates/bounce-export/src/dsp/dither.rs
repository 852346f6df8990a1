//! Dithering algorithms for bit depth reduction.
//!
//! All arithmetic happens in units of the target format's LSB: callers scale
//! the float sample to the integer range first, then ask for the quantized
//! value.

use crate::options::DitherType;

/// Noise shaping error-feedback filter.
const SHAPED_COEFFS: [f32; 5] = [2.033, -2.165, 1.959, -1.590, 0.6149];
const SHAPED_BUF_LEN: usize = 8;
const SHAPED_BUF_MASK: usize = SHAPED_BUF_LEN - 1;

#[derive(Debug, Clone, Copy, Default)]
struct ShapedState {
    buffer: [f32; SHAPED_BUF_LEN],
    phase: usize,
}

/// Per-stream dither state: one RNG, plus per-channel history.
#[derive(Debug, Clone)]
pub struct Ditherer {
    dither_type: DitherType,
    random_state: u32,
    previous: Vec<f32>,
    shaped: Vec<ShapedState>,
}

impl Ditherer {
    pub fn new(dither_type: DitherType, channels: usize) -> Self {
        Self {
            dither_type,
            random_state: 0x12345678,
            previous: vec![0.0; channels],
            shaped: vec![ShapedState::default(); channels],
        }
    }

    pub fn dither_type(&self) -> DitherType {
        self.dither_type
    }

    #[inline]
    fn random(&mut self) -> u32 {
        let mut x = self.random_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.random_state = x;
        x
    }

    /// Uniform in [-0.5, 0.5].
    #[inline]
    fn rectangular_noise(&mut self) -> f32 {
        (self.random() as f32 / u32::MAX as f32) - 0.5
    }

    /// Quantize one sample already scaled to LSB units.
    ///
    /// The result is not clamped; callers clamp to the target range.
    #[inline]
    pub fn quantize(&mut self, channel: usize, x: f32) -> i64 {
        match self.dither_type {
            DitherType::None => x.round() as i64,
            DitherType::Rectangular => {
                let r = self.rectangular_noise();
                (x - r).round() as i64
            }
            DitherType::Triangular => {
                let r = self.rectangular_noise();
                let prev = std::mem::replace(&mut self.previous[channel], r);
                (x - (r - prev)).round() as i64
            }
            DitherType::Shaped => {
                let r = self.rectangular_noise();
                let state = &mut self.shaped[channel];
                let mut xe = x;
                for (tap, coeff) in SHAPED_COEFFS.iter().enumerate() {
                    let idx = state.phase.wrapping_sub(tap) & SHAPED_BUF_MASK;
                    xe += state.buffer[idx] * coeff;
                }
                let quantized = (xe + r).round();
                state.phase = (state.phase + 1) & SHAPED_BUF_MASK;
                state.buffer[state.phase] = xe - quantized;
                quantized as i64
            }
        }
    }
}
