//! Error types for bounce-core.

use crate::context::SampleKind;
use thiserror::Error;

/// Error type for bounce-core operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Sample count {samples} is not a multiple of the channel count {channels}")]
    MisalignedSamples { samples: usize, channels: usize },

    #[error("Zero channels in process context")]
    ZeroChannels,

    #[error("Expected {expected:?} samples, got {actual:?}")]
    SampleKind {
        expected: SampleKind,
        actual: SampleKind,
    },

    #[error("Invalid channel configuration: {0}")]
    InvalidChannelConfig(String),

    #[error("Invalid timespan: start={start}, end={end}")]
    InvalidTimespan { start: u64, end: u64 },

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Loudness meter error: {0}")]
    Meter(String),

    #[error("Engine mode switch failed: {0}")]
    EngineMode(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

impl From<ebur128::Error> for Error {
    fn from(e: ebur128::Error) -> Self {
        Error::Meter(e.to_string())
    }
}
