//! Builder-side bookkeeping for each level of the export tree.
//!
//! The tree below every channel configuration is
//! `chunker -> silence -> src -> intermediate -> sfc -> encoder`. Each level
//! keeps the key that decides whether a new file spec can share it, the
//! arena node(s) it owns, and its children.

use super::NodeId;
use crate::file_spec::{FileSpec, Metadata};
use crate::format::SharedTargets;
use crate::node::Interleaver;
use crate::options::{
    CodecQuality, DemoNoise, DitherType, Endianness, FormatId, Normalization, SampleFormat,
    SilenceOptions, SrcQuality,
};
use bounce_core::{AnalysisResult, ChannelConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// A level whose nodes can be shared by equal keys.
pub(crate) trait Level {
    type Key: PartialEq;

    fn key(&self) -> &Self::Key;
}

pub(crate) fn find<L: Level>(levels: &[L], key: &L::Key) -> Option<usize> {
    levels.iter().position(|l| l.key() == key)
}

pub(crate) struct ChannelConfigLevel {
    pub config: ChannelConfig,
    pub interleaver: Interleaver,
    pub chunker: NodeId,
    pub silence: Vec<SilenceLevel>,
}

impl Level for ChannelConfigLevel {
    type Key = ChannelConfig;

    fn key(&self) -> &ChannelConfig {
        &self.config
    }
}

pub(crate) struct SilenceLevel {
    pub key: SilenceOptions,
    pub node: NodeId,
    pub srcs: Vec<SrcLevel>,
}

impl Level for SilenceLevel {
    type Key = SilenceOptions;

    fn key(&self) -> &SilenceOptions {
        &self.key
    }
}

/// Silence key of `spec`. The threshold only matters when something is trimmed.
pub(crate) fn silence_key(spec: &FileSpec) -> SilenceOptions {
    let options = spec.format.silence;
    if options.trim_beginning || options.trim_end {
        options
    } else {
        SilenceOptions {
            threshold_db: SilenceOptions::default().threshold_db,
            ..options
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SrcKey {
    pub rate: u32,
    /// `None` for a passthrough, where quality does not matter.
    pub quality: Option<SrcQuality>,
}

impl SrcKey {
    pub fn new(session_rate: u32, rate: u32, quality: SrcQuality) -> Self {
        Self {
            rate,
            quality: (rate != session_rate).then_some(quality),
        }
    }
}

pub(crate) struct SrcLevel {
    pub key: SrcKey,
    pub node: NodeId,
    /// Largest block the converter emits, in samples.
    pub max_samples_out: usize,
    pub intermediates: Vec<IntermediateLevel>,
}

impl Level for SrcLevel {
    type Key = SrcKey;

    fn key(&self) -> &SrcKey {
        &self.key
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct IntermediateKey {
    pub normalization: Normalization,
    pub demo_noise: Option<DemoNoise>,
}

impl IntermediateKey {
    pub fn from_spec(spec: &FileSpec) -> Self {
        let normalization = if spec.format.normalization.is_enabled() {
            spec.format.normalization
        } else {
            Normalization::default()
        };
        Self {
            normalization,
            demo_noise: spec.format.demo_noise,
        }
    }
}

/// Pass-two progress of one capture stage.
pub(crate) struct CaptureState {
    pub id: u64,
    /// Deleted once the render pass has read it back.
    pub scratch: Option<NamedTempFile>,
    /// Root of the render pass.
    pub limiter: NodeId,
    pub channels: usize,
    pub sample_rate: u32,
    pub written: Option<(AnalysisResult, u64)>,
    pub reader: Option<BufReader<File>>,
    pub samples_read: u64,
    pub done: bool,
}

impl CaptureState {
    pub fn total_samples(&self) -> Option<u64> {
        self.written.map(|(_, samples)| samples)
    }
}

pub(crate) struct IntermediateLevel {
    pub key: IntermediateKey,
    /// Node the converter feeds.
    pub entry: NodeId,
    /// Node the format converters hang from.
    pub fan_out: NodeId,
    pub capture: Option<CaptureState>,
    pub sfcs: Vec<SfcLevel>,
}

impl Level for IntermediateLevel {
    type Key = IntermediateKey;

    fn key(&self) -> &IntermediateKey {
        &self.key
    }
}

impl IntermediateLevel {
    /// Every output path below this level, copies included.
    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.sfcs
            .iter()
            .flat_map(|sfc| &sfc.encoders)
            .flat_map(|enc| {
                let extra = enc.targets.lock().extra_paths.clone();
                std::iter::once(enc.path.clone()).chain(extra)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SfcKey {
    pub sample_format: SampleFormat,
    pub dither: DitherType,
    pub clip_floats: bool,
}

impl SfcKey {
    pub fn from_spec(spec: &FileSpec) -> Self {
        let sample_format = spec.format.sample_format;
        let float = sample_format.is_float();
        Self {
            sample_format,
            dither: if float { DitherType::None } else { spec.format.dither },
            clip_floats: float && spec.format.clip_floats,
        }
    }
}

pub(crate) struct SfcLevel {
    pub key: SfcKey,
    pub node: NodeId,
    pub encoders: Vec<EncoderLevel>,
}

impl Level for SfcLevel {
    type Key = SfcKey;

    fn key(&self) -> &SfcKey {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EncoderKey {
    pub format: FormatId,
    pub sample_format: SampleFormat,
    pub endianness: Endianness,
    pub quality: CodecQuality,
    pub program: PathBuf,
    pub metadata: Metadata,
}

impl EncoderKey {
    pub fn from_spec(spec: &FileSpec) -> Self {
        Self {
            format: spec.format.format,
            sample_format: spec.format.sample_format,
            endianness: spec.format.endianness,
            quality: spec.format.quality,
            program: spec.format.pipe.program.clone(),
            metadata: spec.metadata.clone(),
        }
    }
}

pub(crate) struct EncoderLevel {
    pub key: EncoderKey,
    pub node: NodeId,
    pub path: PathBuf,
    pub targets: SharedTargets,
}

impl Level for EncoderLevel {
    type Key = EncoderKey;

    fn key(&self) -> &EncoderKey {
        &self.key
    }
}
