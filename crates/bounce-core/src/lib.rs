//! Shared types for the bounce export graph.
//!
//! # Primary API
//!
//! - [`ProcessContext`]: transient sample view passed through one pipeline call
//! - [`ExportChannel`] / [`ChannelConfig`]: sources and how they form an output
//! - [`ExportSession`] / [`EngineMode`]: the session slice the graph consumes
//! - [`LoudnessReader`] / [`PeakReader`]: first-pass analysis
//!
//! # Example
//!
//! ```
//! use bounce_core::{Flags, ProcessContext};
//!
//! let block = [0.25f32, -0.25, 0.5, -0.5];
//! let ctx = ProcessContext::from_slice(&block[..], 2)?
//!     .with_flags(Flags::END_OF_INPUT);
//! assert_eq!(ctx.frames(), 2);
//! assert!(ctx.end_of_input());
//! # Ok::<(), bounce_core::Error>(())
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod context;
pub use context::{Flags, ProcessContext, Sample, SampleKind, Samples, SamplesMut};

pub mod channel;
pub use channel::{ChannelConfig, ChannelId, ExportChannel};

pub mod timespan;
pub use timespan::Timespan;

pub mod session;
pub use session::{BufferPool, EngineMode, ExportSession, FreewheelLock, StaticSession};

pub mod metering;
pub use metering::{
    amplitude_to_db, analyze_loudness, analyze_true_peak, db_to_amplitude, AnalysisResult,
    LoudnessReader, PeakReader,
};

pub mod prelude {
    pub use crate::{
        ChannelConfig, ChannelId, EngineMode, Error, ExportChannel, ExportSession, Flags,
        ProcessContext, Result, SampleKind, Samples, SamplesMut, StaticSession, Timespan,
    };
}
