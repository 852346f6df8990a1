//! Normalization gain from first-pass analysis.

use crate::options::Normalization;
use bounce_core::{db_to_amplitude, AnalysisResult};

/// Linear gain that moves the measured stream onto the requested target.
///
/// A peak target is measured against the true peak when a true-peak limit is
/// set and against the sample peak otherwise. A loudness target uses the
/// integrated loudness (or maximum short-term). With both targets the
/// smaller gain wins. Without a true-peak limit the loudness gain is capped
/// so the true peak stays at or below 0 dBTP. Silence yields unity gain.
pub fn normalization_gain(norm: &Normalization, analysis: &AnalysisResult) -> f32 {
    let mut gain: Option<f64> = None;

    if let Some(target_dbfs) = norm.peak_dbfs {
        let measured = if norm.true_peak_limit_dbtp.is_some() {
            analysis.true_peak
        } else {
            analysis.sample_peak
        };
        if measured > 0.0 {
            gain = Some(db_to_amplitude(target_dbfs) / measured);
        }
    }

    if let Some(target_lufs) = norm.loudness_lufs {
        let measured = if norm.use_short_term {
            analysis.max_short_term_lufs
        } else {
            analysis.integrated_lufs
        };
        if measured.is_finite() {
            let mut loudness_gain = db_to_amplitude(target_lufs - measured);
            if norm.true_peak_limit_dbtp.is_none() && analysis.true_peak > 0.0 {
                loudness_gain = loudness_gain.min(1.0 / analysis.true_peak);
            }
            gain = Some(gain.map_or(loudness_gain, |g| g.min(loudness_gain)));
        }
    }

    gain.unwrap_or(1.0) as f32
}

/// Brickwall ceiling for the render pass limiter.
pub fn limiter_ceiling(norm: &Normalization) -> f32 {
    norm.true_peak_limit_dbtp
        .map(|dbtp| db_to_amplitude(dbtp) as f32)
        .unwrap_or(1.0)
}
