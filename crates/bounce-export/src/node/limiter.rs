//! Gain plus brickwall limiting for the render pass.

use super::{check_channels, Stage};
use crate::error::Result;
use crate::graph::Outlet;
use bounce_core::ProcessContext;

/// Release time of the gain-reduction envelope.
const RELEASE_SECONDS: f64 = 0.05;

/// Applies a fixed gain, then keeps every frame at or below the ceiling.
///
/// Attack is instant and the release is exponential. With no frame above
/// the ceiling the envelope stays at exactly 1.0, so the stage multiplies by
/// the gain and nothing else.
#[derive(Debug)]
pub struct Limiter {
    channels: usize,
    gain: f32,
    ceiling: f32,
    release: f32,
    envelope: f32,
    buffer: Vec<f32>,
}

impl Limiter {
    pub fn new(channels: usize, sample_rate: u32, gain: f32, ceiling: f32) -> Self {
        let release = (-1.0 / (RELEASE_SECONDS * sample_rate.max(1) as f64)).exp() as f32;
        Self {
            channels,
            gain,
            ceiling,
            release,
            envelope: 1.0,
            buffer: Vec::new(),
        }
    }

    /// Unity gain at 0 dBFS, used until pass-one analysis is in.
    pub fn unity(channels: usize, sample_rate: u32) -> Self {
        Self::new(channels, sample_rate, 1.0, 1.0)
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }

    fn apply(&mut self, data: &mut [f32]) {
        for frame in data.chunks_exact_mut(self.channels) {
            let mut peak = 0.0f32;
            for sample in frame.iter_mut() {
                *sample *= self.gain;
                peak = peak.max(sample.abs());
            }
            let target = if peak > self.ceiling {
                self.ceiling / peak
            } else {
                1.0
            };
            self.envelope = if target < self.envelope {
                target
            } else {
                target + (self.envelope - target) * self.release
            };
            if self.envelope < 1.0 {
                for sample in frame.iter_mut() {
                    *sample = (*sample * self.envelope).clamp(-self.ceiling, self.ceiling);
                }
            }
        }
    }
}

impl Stage for Limiter {
    fn process(&mut self, mut ctx: ProcessContext<'_>, out: &mut Outlet<'_>) -> Result<()> {
        check_channels("limiter", self.channels, &ctx)?;
        if ctx.is_mutable() {
            if let Some(data) = ctx.typed_mut::<f32>() {
                self.apply(data);
                return out.emit(ctx);
            }
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();
        buffer.extend_from_slice(ctx.f32()?);
        self.apply(&mut buffer);
        let result = ProcessContext::from_slice_mut(&mut buffer[..], self.channels)
            .map(|block| block.with_flags(ctx.flags()))
            .map_err(Into::into)
            .and_then(|block| out.emit(block));
        self.buffer = buffer;
        result
    }

    fn name(&self) -> &'static str {
        "limiter"
    }
}
