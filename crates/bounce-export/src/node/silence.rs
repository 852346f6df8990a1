//! Leading/trailing silence removal and padding.

use super::{check_channels, Stage};
use crate::error::{ExportError, Result};
use crate::graph::Outlet;
use bounce_core::{db_to_amplitude, Flags, ProcessContext};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrimState {
    /// No non-silent sample seen yet while trimming the beginning.
    BeforeSignal,
    Passthrough,
    /// End of input delivered.
    Finished,
}

/// Removes near-silence at the boundaries and/or pads with digital silence.
///
/// Detection is frame-aligned: a frame is silent when every sample in it is
/// at or below the threshold. There is no hold time; one loud sample ends a
/// silent run and one quiet frame starts a candidate trailing run. Trailing
/// candidates are counted, not buffered, and replayed as zeros if signal
/// follows.
#[derive(Debug)]
pub struct SilenceTrimmer {
    channels: usize,
    /// `None` when nothing counts as silence.
    threshold: Option<f32>,
    trim_end: bool,
    add_to_beginning: u64,
    add_to_end: u64,
    state: TrimState,
    held: u64,
    silence: Arc<[f32]>,
}

impl SilenceTrimmer {
    /// `silence` is a shared zero buffer; its length bounds each padding block.
    pub fn new(channels: usize, silence: Arc<[f32]>) -> Result<Self> {
        if channels == 0 || silence.len() < channels {
            return Err(ExportError::InvalidConfig(
                "silence trimmer needs a zero buffer of at least one frame".into(),
            ));
        }
        Ok(Self {
            channels,
            threshold: Some(db_to_amplitude(-90.0) as f32),
            trim_end: false,
            add_to_beginning: 0,
            add_to_end: 0,
            state: TrimState::Passthrough,
            held: 0,
            silence,
        })
    }

    /// Samples with `|x| <= 10^(db/20)` are silent; `-inf` disables detection.
    pub fn set_threshold(&mut self, db: f64) {
        self.threshold = if db == f64::NEG_INFINITY {
            None
        } else {
            Some(db_to_amplitude(db) as f32)
        };
    }

    pub fn set_trim_beginning(&mut self, trim: bool) {
        self.state = if trim {
            TrimState::BeforeSignal
        } else {
            TrimState::Passthrough
        };
    }

    pub fn set_trim_end(&mut self, trim: bool) {
        self.trim_end = trim;
    }

    /// Frames of zeros emitted before the first output sample.
    pub fn add_silence_to_beginning(&mut self, frames: u64) {
        self.add_to_beginning = frames * self.channels as u64;
    }

    /// Frames of zeros emitted after the last output sample.
    pub fn add_silence_to_end(&mut self, frames: u64) {
        self.add_to_end = frames * self.channels as u64;
    }

    #[inline]
    fn is_silent(&self, sample: f32) -> bool {
        self.threshold.is_some_and(|t| sample.abs() <= t)
    }

    fn first_signal_frame(&self, data: &[f32]) -> Option<usize> {
        data.iter()
            .position(|&s| !self.is_silent(s))
            .map(|i| i / self.channels)
    }

    fn last_signal_frame(&self, data: &[f32]) -> Option<usize> {
        data.iter()
            .rposition(|&s| !self.is_silent(s))
            .map(|i| i / self.channels)
    }

    fn emit_silence(&self, samples: u64, out: &mut Outlet<'_>) -> Result<()> {
        let block = (self.silence.len() / self.channels) * self.channels;
        let mut remaining = samples;
        while remaining > 0 {
            let n = remaining.min(block as u64) as usize;
            out.emit(ProcessContext::from_slice(&self.silence[..n], self.channels)?)?;
            remaining -= n as u64;
        }
        Ok(())
    }

    fn emit_data(
        &self,
        ctx: &mut ProcessContext<'_>,
        range: std::ops::Range<usize>,
        out: &mut Outlet<'_>,
    ) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        let mut block = if ctx.is_mutable() {
            let data = ctx
                .typed_mut::<f32>()
                .ok_or_else(|| ExportError::Context("silence trimmer: expected f32 samples".into()))?;
            ProcessContext::from_slice_mut(&mut data[range], self.channels)?
        } else {
            ProcessContext::from_slice(&ctx.f32()?[range], self.channels)?
        };
        block.remove_flag(Flags::END_OF_INPUT);
        out.emit(block)
    }
}

impl Stage for SilenceTrimmer {
    fn process(&mut self, mut ctx: ProcessContext<'_>, out: &mut Outlet<'_>) -> Result<()> {
        check_channels("silence trimmer", self.channels, &ctx)?;
        if self.state == TrimState::Finished {
            return Err(ExportError::Context(
                "silence trimmer: data after end of input".into(),
            ));
        }
        let eoi = ctx.end_of_input();
        let len = ctx.len();
        let mut start = 0;

        if self.state == TrimState::BeforeSignal {
            match self.first_signal_frame(ctx.f32()?) {
                Some(frame) => start = frame * self.channels,
                None if eoi => start = len,
                None => return Ok(()),
            }
            self.state = TrimState::Passthrough;
        }
        // Beginning padding goes out once, ahead of the first signal.
        let pad = std::mem::take(&mut self.add_to_beginning);
        self.emit_silence(pad, out)?;

        if self.trim_end {
            let last = self.last_signal_frame(&ctx.f32()?[start..]);
            match last {
                None => self.held += (len - start) as u64,
                Some(frame) => {
                    let end = start + (frame + 1) * self.channels;
                    let held = std::mem::take(&mut self.held);
                    self.emit_silence(held, out)?;
                    self.emit_data(&mut ctx, start..end, out)?;
                    self.held = (len - end) as u64;
                }
            }
        } else {
            self.emit_data(&mut ctx, start..len, out)?;
        }

        if eoi {
            self.held = 0;
            self.emit_silence(self.add_to_end, out)?;
            self.state = TrimState::Finished;
            let marker = ProcessContext::from_slice(&self.silence[..0], self.channels)?
                .with_flags(Flags::END_OF_INPUT);
            out.emit(marker)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "silence_trimmer"
    }
}
