//! DSP utilities for the export stages.

mod dither;
mod normalize;
mod resample;

pub use dither::Ditherer;
pub use normalize::{limiter_ceiling, normalization_gain};
pub(crate) use resample::ResamplerEngine;

// Level conversions live in bounce-core next to the meters.
pub use bounce_core::{amplitude_to_db, db_to_amplitude};
