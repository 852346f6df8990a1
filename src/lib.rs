//! # Bounce - Audio Export Graph
//!
//! Renders timeline channels into finished audio files.
//!
//! ## Architecture
//!
//! Bounce is an umbrella crate that coordinates:
//! - **bounce-core** - Process contexts, channel configuration, session hooks, loudness metering
//! - **bounce-export** - The export graph: stages, encoders, and the graph builder
//!
//! ## Quick Start
//!
//! ```ignore
//! use bounce::prelude::*;
//!
//! let session = Arc::new(StaticSession::new(48_000, 1024)?);
//! let mut graph = GraphBuilder::new(session, BuilderConfig::default());
//!
//! let config = ChannelConfig::new().with_channel(left).with_channel(right);
//! let format = FormatSpec::new(FormatId::Flac).with_sample_format(SampleFormat::Int24);
//! graph.add_config(FileSpec::new(config, format, Arc::new(FilenameTemplate::in_dir("out"))), false)?;
//!
//! while !done {
//!     graph.process(1024, last)?;
//! }
//! while !graph.post_process()? {}
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - WAV and FLAC output
//! - `wav` - WAV via hound
//! - `flac` - FLAC via flacenc
//! - `serialization` - serde derives on options and analysis results

/// Re-export of bounce-core for direct access
pub use bounce_core as core;

/// Re-export of bounce-export for direct access
pub use bounce_export as export;

mod error;
pub use error::{Error, Result};

// Core types
pub use bounce_core::{
    AnalysisResult, ChannelConfig, ChannelId, EngineMode, ExportChannel, ExportSession, Flags,
    FreewheelLock, ProcessContext, Samples, StaticSession, Timespan,
};

// Export graph
pub use bounce_export::{
    BuilderConfig, CodecQuality, DemoNoise, DitherType, Endianness, ExportAnalysis, ExportError,
    ExportFilename, FileSpec, FileWrittenCallback, FilenameTemplate, FormatId, FormatSpec,
    GraphBuilder, GraphStats, Normalization, SampleFormat, SampleRateTarget, SilenceOptions,
    SrcQuality, Threader,
};

/// Prelude for common imports
pub mod prelude {
    pub use crate::{Error, Result};

    pub use bounce_core::prelude::*;
    pub use bounce_core::{AnalysisResult, FreewheelLock};

    pub use bounce_export::{
        BuilderConfig, CodecQuality, DemoNoise, DitherType, Endianness, ExportAnalysis,
        ExportError, ExportFilename, FileSpec, FileWrittenCallback, FilenameTemplate, FormatId,
        FormatSpec, GraphBuilder, GraphStats, Normalization, SampleFormat, SampleRateTarget,
        SilenceOptions, SrcQuality, Stage, Threader,
    };

    pub use std::sync::Arc;
}
