//! Sample-rate conversion stage.

use super::{check_budget, check_channels, Stage};
use crate::dsp::ResamplerEngine;
use crate::error::{ExportError, Result};
use crate::graph::Outlet;
use crate::options::SrcQuality;
use bounce_core::{Flags, ProcessContext};

/// Input frames handed to the resampler per call.
const ENGINE_CHUNK: usize = 1024;

/// Resamples interleaved f32 from the session rate to the output rate.
///
/// Equal rates make this a bit-exact passthrough with no resampler. Otherwise
/// input is queued as planar leftover, fed to the resampler in fixed chunks,
/// and each resampler call becomes one output context. End of input feeds
/// the partial remainder, then drains the resampler with two empty calls;
/// only the last emission carries the end-of-input flag. The resampler's
/// startup delay is skipped and the total output is capped at
/// `round(input * ratio)` frames so the stream length scales exactly.
#[derive(Debug)]
pub struct SampleRateConverter {
    channels: usize,
    ratio: f64,
    engine: Option<ResamplerEngine>,
    max_samples_in: usize,
    leftover: Vec<Vec<f32>>,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    interleaved: Vec<f32>,
    delay_remaining: usize,
    frames_in: u64,
    frames_out: u64,
}

impl SampleRateConverter {
    /// Set up for `in_rate` to `out_rate`. Call [`allocate_buffers`] before processing.
    ///
    /// [`allocate_buffers`]: SampleRateConverter::allocate_buffers
    pub fn new(channels: usize, in_rate: u32, out_rate: u32, quality: SrcQuality) -> Result<Self> {
        if channels == 0 || in_rate == 0 || out_rate == 0 {
            return Err(ExportError::InvalidConfig(format!(
                "cannot resample {channels} channels from {in_rate} Hz to {out_rate} Hz"
            )));
        }
        let ratio = out_rate as f64 / in_rate as f64;
        let engine = if in_rate == out_rate {
            None
        } else {
            Some(ResamplerEngine::new(quality, ratio, ENGINE_CHUNK, channels)?)
        };
        let delay_remaining = engine.as_ref().map_or(0, |e| e.output_delay());

        Ok(Self {
            channels,
            ratio,
            engine,
            max_samples_in: 0,
            leftover: Vec::new(),
            input: Vec::new(),
            output: Vec::new(),
            interleaved: Vec::new(),
            delay_remaining,
            frames_in: 0,
            frames_out: 0,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.engine.is_none()
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Size buffers for inputs of up to `max_samples` and return the largest
    /// output block this stage will emit, in samples.
    pub fn allocate_buffers(&mut self, max_samples: usize) -> usize {
        self.max_samples_in = max_samples;
        let scaled = (max_samples as f64 * self.ratio).ceil() as usize;
        let scaled = scaled - scaled % self.channels;

        let Some(engine) = &self.engine else {
            return max_samples;
        };
        let max_frames_in = max_samples / self.channels;
        let out_frames = engine.output_frames_max();

        self.leftover = (0..self.channels)
            .map(|_| Vec::with_capacity(4 * max_frames_in.max(ENGINE_CHUNK)))
            .collect();
        self.input = vec![vec![0.0; ENGINE_CHUNK]; self.channels];
        self.output = vec![vec![0.0; out_frames]; self.channels];
        self.interleaved = vec![0.0; out_frames * self.channels];

        scaled.max(out_frames * self.channels)
    }

    fn leftover_frames(&self) -> usize {
        self.leftover.first().map_or(0, Vec::len)
    }

    /// Interleave `written` resampler frames and emit what survives the delay skip and cap.
    fn emit(&mut self, written: usize, last: bool, out: &mut Outlet<'_>) -> Result<()> {
        let skip = self.delay_remaining.min(written);
        self.delay_remaining -= skip;

        let expected = (self.frames_in as f64 * self.ratio).round() as u64;
        let allowed = expected.saturating_sub(self.frames_out);
        let frames = ((written - skip) as u64).min(allowed) as usize;

        for (ch, channel) in self.output.iter().enumerate() {
            for (i, &sample) in channel[skip..skip + frames].iter().enumerate() {
                self.interleaved[i * self.channels + ch] = sample;
            }
        }
        self.frames_out += frames as u64;

        if frames == 0 && !last {
            return Ok(());
        }
        let flags = if last { Flags::END_OF_INPUT } else { Flags::NONE };
        let block = &mut self.interleaved[..frames * self.channels];
        let ctx = ProcessContext::from_slice_mut(block, self.channels)?.with_flags(flags);
        out.emit(ctx)
    }

    fn run_full_chunks(&mut self, out: &mut Outlet<'_>) -> Result<()> {
        while self.leftover_frames() >= ENGINE_CHUNK {
            for (input, leftover) in self.input.iter_mut().zip(&self.leftover) {
                input.copy_from_slice(&leftover[..ENGINE_CHUNK]);
            }
            let engine = self.engine.as_mut().ok_or_else(|| {
                ExportError::Resample("resampler missing outside passthrough".into())
            })?;
            let (used, written) = engine.process(&self.input, &mut self.output)?;
            for leftover in &mut self.leftover {
                leftover.drain(..used);
            }
            self.emit(written, false, out)?;
        }
        Ok(())
    }

    fn drain(&mut self, out: &mut Outlet<'_>) -> Result<()> {
        let pending = self.leftover_frames();
        let engine = self.engine.as_mut().ok_or_else(|| {
            ExportError::Resample("resampler missing outside passthrough".into())
        })?;
        let (_, written) = if pending > 0 {
            engine.process_partial(Some(self.leftover.as_slice()), &mut self.output)?
        } else {
            (0, 0)
        };
        for leftover in &mut self.leftover {
            leftover.clear();
        }
        self.emit(written, false, out)?;

        // The resampler holds back its filter delay; two empty calls flush it.
        for flush in 0..2 {
            let engine = self.engine.as_mut().ok_or_else(|| {
                ExportError::Resample("resampler missing outside passthrough".into())
            })?;
            let (_, written) = engine.process_partial(None, &mut self.output)?;
            self.emit(written, flush == 1, out)?;
        }
        Ok(())
    }
}

impl Stage for SampleRateConverter {
    fn process(&mut self, ctx: ProcessContext<'_>, out: &mut Outlet<'_>) -> Result<()> {
        check_channels("sample rate converter", self.channels, &ctx)?;
        if self.engine.is_none() {
            return out.emit(ctx);
        }
        if self.output.is_empty() {
            return Err(ExportError::Context(
                "sample rate converter: buffers not allocated".into(),
            ));
        }
        check_budget("sample rate converter", self.max_samples_in, &ctx)?;

        let data = ctx.f32()?;
        for frame in data.chunks_exact(self.channels) {
            for (leftover, &sample) in self.leftover.iter_mut().zip(frame) {
                leftover.push(sample);
            }
        }
        self.frames_in += ctx.frames() as u64;

        self.run_full_chunks(out)?;
        if ctx.end_of_input() {
            self.drain(out)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sample_rate_converter"
    }
}
