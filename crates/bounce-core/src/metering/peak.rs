//! Running sample peak.

/// Tracks the largest absolute sample value seen across all channels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeakReader {
    peak: f32,
    samples: u64,
}

impl PeakReader {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn process(&mut self, samples: &[f32]) {
        self.peak = samples.iter().fold(self.peak, |peak, s| peak.max(s.abs()));
        self.samples += samples.len() as u64;
    }

    /// Linear peak, 0.0 when nothing was seen.
    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
