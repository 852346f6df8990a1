//! # Bounce Export
//!
//! The export graph: turns timeline channels into finished audio files.
//!
//! [`GraphBuilder`] assembles a tree of processing stages per requested
//! output and shares every stage that equivalent outputs have in common:
//!
//! - **Interleave and chunk** each channel configuration once
//! - **Trim and pad silence** at either end
//! - **Resample** to the output rate (rubato)
//! - **Normalize** in two passes: capture and measure, then re-render
//!   through a limiter
//! - **Dither** down to the target sample format
//! - **Encode** to WAV, FLAC, raw PCM, or an external transcoder
//!
//! ## Example
//!
//! ```no_run
//! use bounce_core::{ChannelConfig, ChannelId, ExportChannel, StaticSession};
//! use bounce_export::{BuilderConfig, FileSpec, FormatId, FormatSpec, GraphBuilder, Normalization};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! struct Silence;
//!
//! impl ExportChannel for Silence {
//!     fn id(&self) -> ChannelId {
//!         ChannelId(0)
//!     }
//!
//!     fn read(&self, out: &mut [f32]) -> usize {
//!         out.fill(0.0);
//!         out.len()
//!     }
//! }
//!
//! let session = Arc::new(StaticSession::new(48_000, 1024)?);
//! let mut graph = GraphBuilder::new(session, BuilderConfig::default());
//!
//! let config = ChannelConfig::new().with_channel(Arc::new(Silence));
//! let format = FormatSpec::new(FormatId::Wav).with_normalization(Normalization::lufs(-23.0));
//! graph.add_config(FileSpec::new(config, format, Arc::new(PathBuf::from("mix.wav"))), false)?;
//!
//! graph.process(1024, true)?;
//! while !graph.post_process()? {}
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `wav` (default): WAV output via hound (pure Rust)
//! - `flac` (default): FLAC output via flacenc (pure Rust)
//! - `serialization`: serde derives on the option types

// Core modules
pub mod error;
pub mod file_spec;
pub mod options;

// Graph and stages
pub mod graph;
pub mod node;

// Advanced APIs
pub mod dsp;
pub mod format;
pub mod io;

// Re-exports
pub use error::{ExportError, Result};
pub use file_spec::{ExportFilename, FileSpec, FilenameContext, FilenameTemplate, Metadata};
pub use format::FileWrittenCallback;
pub use graph::{ExportAnalysis, GraphBuilder, GraphStats, NodeArena, NodeId};
pub use node::{Pipeline, Sink, Stage, Threader};
pub use options::{
    BuilderConfig, CodecQuality, DemoNoise, DitherType, Endianness, FormatId, FormatSpec,
    Normalization, PipeEncoderOptions, SampleFormat, SampleRateTarget, SilenceOptions, SrcQuality,
};
