//! Periodic noise bursts stamped over demo exports.

use super::{check_channels, Stage};
use crate::error::{ExportError, Result};
use crate::graph::Outlet;
use crate::options::DemoNoise;
use bounce_core::{db_to_amplitude, ProcessContext};

/// Adds a burst of white noise of `duration` every `interval`, starting at
/// the first frame.
#[derive(Debug)]
pub struct DemoNoiseAdder {
    channels: usize,
    interval: u64,
    duration: u64,
    level: f32,
    position: u64,
    random_state: u32,
    buffer: Vec<f32>,
}

impl DemoNoiseAdder {
    pub fn new(channels: usize, sample_rate: u32, noise: &DemoNoise) -> Result<Self> {
        let frames = |d: std::time::Duration| (d.as_secs_f64() * sample_rate as f64).round() as u64;
        let interval = frames(noise.interval);
        let duration = frames(noise.duration);
        if interval == 0 || duration > interval {
            return Err(ExportError::InvalidConfig(format!(
                "demo noise burst of {:?} does not fit an interval of {:?}",
                noise.duration, noise.interval
            )));
        }
        Ok(Self {
            channels,
            interval,
            duration,
            level: db_to_amplitude(noise.level_db) as f32,
            position: 0,
            random_state: 0x2545_f491,
            buffer: Vec::new(),
        })
    }

    #[inline]
    fn noise(&mut self) -> f32 {
        let mut x = self.random_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.random_state = x;
        (x as f32 / u32::MAX as f32) * 2.0 - 1.0
    }

    fn apply(&mut self, data: &mut [f32]) {
        for frame in data.chunks_exact_mut(self.channels) {
            if self.position % self.interval < self.duration {
                for sample in frame.iter_mut() {
                    *sample += self.noise() * self.level;
                }
            }
            self.position += 1;
        }
    }
}

impl Stage for DemoNoiseAdder {
    fn process(&mut self, mut ctx: ProcessContext<'_>, out: &mut Outlet<'_>) -> Result<()> {
        check_channels("demo noise", self.channels, &ctx)?;
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
        "demo_noise"
    }
}
