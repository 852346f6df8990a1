//! Resampler engines behind the sample-rate converter stage.
//!
//! Windowed-sinc for the four quality presets, polynomial interpolation for
//! linear and zero-order hold.

use crate::error::Result;
use crate::options::SrcQuality;
use rubato::{
    FastFixedIn, PolynomialDegree, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

fn sinc_parameters(quality: SrcQuality) -> Option<SincInterpolationParameters> {
    let (sinc_len, oversampling_factor, interpolation) = match quality {
        SrcQuality::Best => (256, 256, SincInterpolationType::Cubic),
        SrcQuality::Good => (128, 128, SincInterpolationType::Cubic),
        SrcQuality::Quick => (64, 64, SincInterpolationType::Linear),
        SrcQuality::Fastest => (32, 32, SincInterpolationType::Nearest),
        SrcQuality::Linear | SrcQuality::ZeroOrderHold => return None,
    };
    Some(SincInterpolationParameters {
        sinc_len,
        f_cutoff: 0.95,
        interpolation,
        oversampling_factor,
        window: WindowFunction::BlackmanHarris2,
    })
}

/// Fixed-input resampler over planar f32 buffers.
pub(crate) enum ResamplerEngine {
    Sinc(SincFixedIn<f32>),
    Poly(FastFixedIn<f32>),
}

impl std::fmt::Debug for ResamplerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResamplerEngine::Sinc(_) => write!(f, "ResamplerEngine(SincFixedIn)"),
            ResamplerEngine::Poly(_) => write!(f, "ResamplerEngine(FastFixedIn)"),
        }
    }
}

macro_rules! with_engine {
    ($engine:expr, $r:ident => $body:expr) => {
        match $engine {
            ResamplerEngine::Sinc($r) => $body,
            ResamplerEngine::Poly($r) => $body,
        }
    };
}

impl ResamplerEngine {
    /// `chunk` is the fixed number of input frames consumed per call.
    pub fn new(quality: SrcQuality, ratio: f64, chunk: usize, channels: usize) -> Result<Self> {
        let engine = match sinc_parameters(quality) {
            Some(params) => {
                ResamplerEngine::Sinc(SincFixedIn::new(ratio, 1.0, params, chunk, channels)?)
            }
            None => {
                let degree = if quality == SrcQuality::Linear {
                    PolynomialDegree::Linear
                } else {
                    PolynomialDegree::Nearest
                };
                ResamplerEngine::Poly(FastFixedIn::new(ratio, 1.0, degree, chunk, channels)?)
            }
        };
        Ok(engine)
    }

    pub fn output_frames_max(&self) -> usize {
        with_engine!(self, r => r.output_frames_max())
    }

    /// Frames of algorithmic delay at the start of the output.
    pub fn output_delay(&self) -> usize {
        with_engine!(self, r => r.output_delay())
    }

    /// Consume exactly one chunk of frames per channel.
    pub fn process(&mut self, input: &[Vec<f32>], output: &mut [Vec<f32>]) -> Result<(usize, usize)> {
        Ok(with_engine!(self, r => r.process_into_buffer(input, output, None))?)
    }

    /// Consume fewer frames than a full chunk, or none at all to drain.
    pub fn process_partial(
        &mut self,
        input: Option<&[Vec<f32>]>,
        output: &mut [Vec<f32>],
    ) -> Result<(usize, usize)> {
        Ok(with_engine!(self, r => r.process_partial_into_buffer(input, output, None))?)
    }
}
