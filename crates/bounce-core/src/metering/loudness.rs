//! EBU R128 / ITU-R BS.1770 loudness measurement.
//!
//! [`LoudnessReader`] measures a stream block by block; the batch helpers
//! wrap it for one-shot analysis of a finished buffer.

use super::math::amplitude_to_db;
use crate::error::Result;
use ebur128::{EbuR128, Mode};

/// Everything the capture stage learns about a stream during its first pass.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct AnalysisResult {
    /// Frames measured.
    pub frames: u64,
    /// Linear sample peak across channels.
    pub sample_peak: f64,
    /// Linear true peak (4x oversampled) across channels.
    pub true_peak: f64,
    /// Integrated loudness in LUFS; negative infinity for silence.
    pub integrated_lufs: f64,
    /// Loudness range in LU.
    pub loudness_range_lu: f64,
    /// Maximum 3 s short-term loudness in LUFS.
    pub max_short_term_lufs: f64,
    /// Maximum 400 ms momentary loudness in LUFS.
    pub max_momentary_lufs: f64,
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self {
            frames: 0,
            sample_peak: 0.0,
            true_peak: 0.0,
            integrated_lufs: f64::NEG_INFINITY,
            loudness_range_lu: 0.0,
            max_short_term_lufs: f64::NEG_INFINITY,
            max_momentary_lufs: f64::NEG_INFINITY,
        }
    }
}

impl AnalysisResult {
    pub fn sample_peak_dbfs(&self) -> f64 {
        amplitude_to_db(self.sample_peak)
    }

    pub fn true_peak_dbtp(&self) -> f64 {
        amplitude_to_db(self.true_peak)
    }
}

fn finite_or_neg_inf(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        f64::NEG_INFINITY
    }
}

/// Streaming loudness meter over interleaved f32 blocks.
pub struct LoudnessReader {
    meter: EbuR128,
    channels: usize,
    frames: u64,
    max_short_term: f64,
    max_momentary: f64,
}

impl std::fmt::Debug for LoudnessReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoudnessReader")
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .finish()
    }
}

impl LoudnessReader {
    pub fn new(channels: usize, sample_rate: u32) -> Result<Self> {
        let mode = Mode::I | Mode::S | Mode::M | Mode::LRA | Mode::TRUE_PEAK | Mode::SAMPLE_PEAK;
        let meter = EbuR128::new(channels as u32, sample_rate, mode)?;
        Ok(Self {
            meter,
            channels,
            frames: 0,
            max_short_term: f64::NEG_INFINITY,
            max_momentary: f64::NEG_INFINITY,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Feed one interleaved block.
    pub fn process(&mut self, interleaved: &[f32]) -> Result<()> {
        if interleaved.is_empty() {
            return Ok(());
        }
        self.meter.add_frames_f32(interleaved)?;
        self.frames += (interleaved.len() / self.channels) as u64;

        if let Ok(st) = self.meter.loudness_shortterm() {
            self.max_short_term = self.max_short_term.max(finite_or_neg_inf(st));
        }
        if let Ok(m) = self.meter.loudness_momentary() {
            self.max_momentary = self.max_momentary.max(finite_or_neg_inf(m));
        }
        Ok(())
    }

    pub fn result(&self) -> Result<AnalysisResult> {
        let mut true_peak = 0.0f64;
        let mut sample_peak = 0.0f64;
        for ch in 0..self.channels as u32 {
            true_peak = true_peak.max(self.meter.true_peak(ch)?);
            sample_peak = sample_peak.max(self.meter.sample_peak(ch)?);
        }

        Ok(AnalysisResult {
            frames: self.frames,
            sample_peak,
            true_peak,
            integrated_lufs: finite_or_neg_inf(self.meter.loudness_global()?),
            loudness_range_lu: self.meter.loudness_range().unwrap_or(0.0),
            max_short_term_lufs: self.max_short_term,
            max_momentary_lufs: self.max_momentary,
        })
    }

    pub fn reset(&mut self) {
        self.meter.reset();
        self.frames = 0;
        self.max_short_term = f64::NEG_INFINITY;
        self.max_momentary = f64::NEG_INFINITY;
    }
}

/// One-shot loudness analysis of an interleaved buffer.
pub fn analyze_loudness(interleaved: &[f32], channels: usize, sample_rate: u32) -> Result<AnalysisResult> {
    let mut reader = LoudnessReader::new(channels, sample_rate)?;
    reader.process(interleaved)?;
    reader.result()
}

/// True peak of an interleaved buffer in dBTP.
pub fn analyze_true_peak(interleaved: &[f32], channels: usize, sample_rate: u32) -> Result<f64> {
    let mut meter = EbuR128::new(channels as u32, sample_rate, Mode::TRUE_PEAK)?;
    if !interleaved.is_empty() {
        meter.add_frames_f32(interleaved)?;
    }
    let mut peak = 0.0f64;
    for ch in 0..channels as u32 {
        peak = peak.max(meter.true_peak(ch)?);
    }
    Ok(amplitude_to_db(peak))
}
