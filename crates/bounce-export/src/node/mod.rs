//! Processing stages of the export graph.
//!
//! A stage receives one [`ProcessContext`] per call and forwards zero or
//! more contexts to its consumers through the [`Outlet`]. Stages that need
//! to transform data do it in place when the context is mutable and copy
//! into a private buffer otherwise.

mod capture;
mod chunker;
mod demo_noise;
mod identity;
mod interleave;
mod limiter;
mod resample;
mod sample_format;
mod silence;
mod threader;

pub use capture::{CaptureEvent, CaptureStage};
pub use chunker::Chunker;
pub use demo_noise::DemoNoiseAdder;
pub use identity::Identity;
pub use interleave::{DeInterleaver, Interleaver};
pub use limiter::Limiter;
pub use resample::SampleRateConverter;
pub use sample_format::SampleFormatConverter;
pub use silence::SilenceTrimmer;
pub use threader::{Pipeline, Sink, Threader};

use crate::error::{ExportError, Result};
use crate::graph::Outlet;
use bounce_core::ProcessContext;

/// One vertex of the export graph.
pub trait Stage: Send {
    fn process(&mut self, ctx: ProcessContext<'_>, out: &mut Outlet<'_>) -> Result<()>;

    /// Short kind name, used for logging and node counts.
    fn name(&self) -> &'static str;
}

pub(crate) fn check_channels(stage: &str, expected: usize, ctx: &ProcessContext<'_>) -> Result<()> {
    if ctx.channels() != expected {
        return Err(ExportError::Context(format!(
            "{stage}: expected {expected} channels, got {}",
            ctx.channels()
        )));
    }
    Ok(())
}

pub(crate) fn check_budget(stage: &str, max_samples: usize, ctx: &ProcessContext<'_>) -> Result<()> {
    if ctx.len() > max_samples {
        return Err(ExportError::Context(format!(
            "{stage}: {} samples exceed the {max_samples} sample budget",
            ctx.len()
        )));
    }
    Ok(())
}
