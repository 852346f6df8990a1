//! Mono streams to one interleaved stream, and back.

use super::{check_budget, Stage};
use crate::error::{ExportError, Result};
use crate::graph::Outlet;
use bounce_core::{Flags, ProcessContext};

/// Combines N mono inputs into one interleaved block.
///
/// Driven directly by the orchestrator once per cycle with every input of a
/// channel configuration at hand.
#[derive(Debug)]
pub struct Interleaver {
    channels: usize,
    max_frames: usize,
    buffer: Vec<f32>,
}

impl Interleaver {
    pub fn new(channels: usize, max_frames: usize) -> Result<Self> {
        if channels == 0 {
            return Err(ExportError::InvalidConfig("interleaver needs at least one channel".into()));
        }
        Ok(Self {
            channels,
            max_frames,
            buffer: vec![0.0; channels * max_frames],
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Interleave equal-length inputs into the internal buffer.
    pub fn interleave(&mut self, inputs: &[&[f32]], flags: Flags) -> Result<ProcessContext<'_>> {
        if inputs.len() != self.channels {
            return Err(ExportError::Context(format!(
                "interleaver: expected {} inputs, got {}",
                self.channels,
                inputs.len()
            )));
        }
        let frames = inputs.first().map_or(0, |i| i.len());
        if inputs.iter().any(|i| i.len() != frames) {
            return Err(ExportError::Context("interleaver: inputs differ in length".into()));
        }
        if frames > self.max_frames {
            return Err(ExportError::Context(format!(
                "interleaver: {frames} frames exceed the {} frame budget",
                self.max_frames
            )));
        }

        let out = &mut self.buffer[..frames * self.channels];
        for (ch, input) in inputs.iter().enumerate() {
            for (frame, &sample) in input.iter().enumerate() {
                out[frame * self.channels + ch] = sample;
            }
        }
        Ok(ProcessContext::from_slice_mut(out, self.channels)?.with_flags(flags))
    }
}

/// Splits an interleaved stream into mono streams, one per consumer.
///
/// Channel `i` goes to the `i`-th connected consumer.
#[derive(Debug)]
pub struct DeInterleaver {
    channels: usize,
    max_frames: usize,
    buffer: Vec<f32>,
}

impl DeInterleaver {
    pub fn new(channels: usize, max_frames: usize) -> Result<Self> {
        if channels == 0 {
            return Err(ExportError::InvalidConfig("deinterleaver needs at least one channel".into()));
        }
        Ok(Self {
            channels,
            max_frames,
            buffer: vec![0.0; max_frames],
        })
    }
}

impl Stage for DeInterleaver {
    fn process(&mut self, ctx: ProcessContext<'_>, out: &mut Outlet<'_>) -> Result<()> {
        super::check_channels("deinterleaver", self.channels, &ctx)?;
        check_budget("deinterleaver", self.max_frames * self.channels, &ctx)?;
        let data = ctx.f32()?;
        let frames = ctx.frames();

        for ch in 0..self.channels {
            for (frame, slot) in self.buffer[..frames].iter_mut().enumerate() {
                *slot = data[frame * self.channels + ch];
            }
            let mono = ProcessContext::from_slice_mut(&mut self.buffer[..frames], 1)?
                .with_flags(ctx.flags());
            out.emit_to(ch, mono)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "deinterleaver"
    }
}
