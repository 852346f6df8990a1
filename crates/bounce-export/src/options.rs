//! Export format options.

use bounce_core::SampleKind;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "serialization")]
use serde::{Deserialize, Serialize};

/// Container/codec family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum FormatId {
    #[default]
    Wav,
    Flac,
    /// Headerless PCM.
    Raw,
    /// Ogg/Vorbis through the external transcoder.
    Ogg,
    /// MPEG layer 3 through the external transcoder.
    Mp3,
}

impl FormatId {
    /// File extension (without dot).
    pub fn extension(&self) -> &'static str {
        match self {
            FormatId::Wav => "wav",
            FormatId::Flac => "flac",
            FormatId::Raw => "raw",
            FormatId::Ogg => "ogg",
            FormatId::Mp3 => "mp3",
        }
    }

    /// Whether this format is produced by piping PCM to an external process.
    pub fn is_piped(&self) -> bool {
        matches!(self, FormatId::Ogg | FormatId::Mp3)
    }

    pub fn supports(&self, format: SampleFormat) -> bool {
        use SampleFormat::*;
        match self {
            FormatId::Wav => matches!(format, U8 | Int16 | Int24 | Int32 | Float32),
            FormatId::Flac => matches!(format, Int16 | Int24),
            FormatId::Raw => true,
            FormatId::Ogg | FormatId::Mp3 => format == Float32,
        }
    }

    /// Sample format used when none is requested.
    pub fn default_sample_format(&self) -> SampleFormat {
        match self {
            FormatId::Wav | FormatId::Flac | FormatId::Raw => SampleFormat::Int24,
            FormatId::Ogg | FormatId::Mp3 => SampleFormat::Float32,
        }
    }
}

/// Output sample representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum SampleFormat {
    /// Unsigned 8-bit (WAV convention).
    U8,
    Int16,
    #[default]
    Int24,
    Int32,
    Float32,
    Float64,
}

impl SampleFormat {
    /// Bits per sample.
    pub fn bits(&self) -> u16 {
        match self {
            SampleFormat::U8 => 8,
            SampleFormat::Int16 => 16,
            SampleFormat::Int24 => 24,
            SampleFormat::Int32 | SampleFormat::Float32 => 32,
            SampleFormat::Float64 => 64,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SampleFormat::Float32 | SampleFormat::Float64)
    }

    /// Sample kind carried in process contexts after conversion.
    ///
    /// 24-bit values travel right-aligned in `i32`.
    pub fn kind(&self) -> SampleKind {
        match self {
            SampleFormat::U8 => SampleKind::U8,
            SampleFormat::Int16 => SampleKind::I16,
            SampleFormat::Int24 | SampleFormat::Int32 => SampleKind::I32,
            SampleFormat::Float32 => SampleKind::F32,
            SampleFormat::Float64 => SampleKind::F64,
        }
    }
}

/// Byte order for raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Dithering algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum DitherType {
    /// Plain rounding.
    None,
    Rectangular,
    #[default]
    Triangular,
    /// Error-feedback noise shaping.
    Shaped,
}

/// Target sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum SampleRateTarget {
    /// Follow the session's nominal rate.
    #[default]
    Session,
    Hz(u32),
}

impl SampleRateTarget {
    pub const PRESETS: [u32; 7] = [8_000, 22_050, 44_100, 48_000, 88_200, 96_000, 192_000];

    /// Concrete rate given the session rate.
    pub fn resolve(&self, session_rate: u32) -> u32 {
        match self {
            SampleRateTarget::Session => session_rate,
            SampleRateTarget::Hz(rate) => *rate,
        }
    }
}

/// Sample-rate conversion quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum SrcQuality {
    Best,
    #[default]
    Good,
    Quick,
    Fastest,
    /// Linear interpolation.
    Linear,
    /// Nearest-sample hold.
    ZeroOrderHold,
}

/// Normalization targets applied in the render pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct Normalization {
    /// Peak target in dBFS.
    pub peak_dbfs: Option<f64>,
    /// Loudness target in LUFS.
    pub loudness_lufs: Option<f64>,
    /// Measure loudness as maximum short-term instead of integrated.
    pub use_short_term: bool,
    /// True-peak ceiling in dBTP; also the limiter ceiling.
    pub true_peak_limit_dbtp: Option<f64>,
}

impl Normalization {
    pub fn peak(dbfs: f64) -> Self {
        Self {
            peak_dbfs: Some(dbfs),
            ..Self::default()
        }
    }

    /// Loudness normalization with the default true peak limit (-1.0 dBTP).
    pub fn lufs(target_lufs: f64) -> Self {
        Self {
            loudness_lufs: Some(target_lufs),
            true_peak_limit_dbtp: Some(-1.0),
            ..Self::default()
        }
    }

    pub fn with_true_peak_limit(mut self, dbtp: Option<f64>) -> Self {
        self.true_peak_limit_dbtp = dbtp;
        self
    }

    pub fn with_short_term(mut self, short_term: bool) -> Self {
        self.use_short_term = short_term;
        self
    }

    /// Whether this requires the two-pass capture path.
    pub fn is_enabled(&self) -> bool {
        self.peak_dbfs.is_some() || self.loudness_lufs.is_some()
    }
}

/// Silence trimming and padding.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct SilenceOptions {
    pub trim_beginning: bool,
    pub trim_end: bool,
    /// Samples at or below this level count as silence. `-inf` disables detection.
    pub threshold_db: f64,
    pub pad_beginning: Duration,
    pub pad_end: Duration,
}

impl Default for SilenceOptions {
    fn default() -> Self {
        Self {
            trim_beginning: false,
            trim_end: false,
            threshold_db: -90.0,
            pad_beginning: Duration::ZERO,
            pad_end: Duration::ZERO,
        }
    }
}

/// Periodic noise bursts for demo builds.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct DemoNoise {
    pub interval: Duration,
    pub duration: Duration,
    pub level_db: f64,
}

impl Default for DemoNoise {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            duration: Duration::from_millis(500),
            level_db: -20.0,
        }
    }
}

/// External transcoder invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct PipeEncoderOptions {
    /// Executable name or path. Bare names are looked up on `PATH`.
    pub program: PathBuf,
}

impl Default for PipeEncoderOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }
}

/// Codec quality for lossy or compressed formats.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub enum CodecQuality {
    #[default]
    Default,
    /// Variable bit rate quality, 0.0 (smallest) to 1.0 (best).
    Vbr(f32),
    /// Constant bit rate in kbit/s.
    Bitrate(u32),
    /// FLAC compression level (0-8).
    Compression(u8),
}

/// Everything about how one output is rendered and encoded.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(Serialize, Deserialize))]
pub struct FormatSpec {
    pub format: FormatId,
    pub sample_format: SampleFormat,
    pub endianness: Endianness,
    pub sample_rate: SampleRateTarget,
    pub src_quality: SrcQuality,
    pub dither: DitherType,
    pub normalization: Normalization,
    pub silence: SilenceOptions,
    pub demo_noise: Option<DemoNoise>,
    pub quality: CodecQuality,
    /// Clip float output to [-1.0, 1.0].
    pub clip_floats: bool,
    pub pipe: PipeEncoderOptions,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            format: FormatId::Wav,
            sample_format: SampleFormat::Int24,
            endianness: Endianness::Little,
            sample_rate: SampleRateTarget::Session,
            src_quality: SrcQuality::Good,
            dither: DitherType::Triangular,
            normalization: Normalization::default(),
            silence: SilenceOptions::default(),
            demo_noise: None,
            quality: CodecQuality::Default,
            clip_floats: false,
            pipe: PipeEncoderOptions::default(),
        }
    }
}

impl FormatSpec {
    pub fn new(format: FormatId) -> Self {
        Self {
            format,
            sample_format: format.default_sample_format(),
            ..Self::default()
        }
    }

    pub fn with_sample_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = sample_format;
        self
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn with_sample_rate(mut self, rate: SampleRateTarget) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_src_quality(mut self, quality: SrcQuality) -> Self {
        self.src_quality = quality;
        self
    }

    pub fn with_dither(mut self, dither: DitherType) -> Self {
        self.dither = dither;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_silence(mut self, silence: SilenceOptions) -> Self {
        self.silence = silence;
        self
    }

    pub fn with_demo_noise(mut self, demo_noise: Option<DemoNoise>) -> Self {
        self.demo_noise = demo_noise;
        self
    }

    pub fn with_quality(mut self, quality: CodecQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_clip_floats(mut self, clip: bool) -> Self {
        self.clip_floats = clip;
        self
    }

    pub fn with_pipe_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.pipe.program = program.into();
        self
    }

    /// Concrete output rate, if the target is already resolved.
    pub fn resolved_rate(&self) -> Option<u32> {
        match self.sample_rate {
            SampleRateTarget::Session => None,
            SampleRateTarget::Hz(rate) => Some(rate),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BuilderConfig {
    /// Largest frame count accepted by one `process` call.
    pub max_frames: usize,
    /// Frames read from the capture file per render-pass step.
    pub post_process_frames: usize,
    /// Ring buffer length for background capture writers.
    pub ring_buffer_seconds: f32,
    /// Where capture files go; the system temp dir when `None`.
    pub temp_dir: Option<PathBuf>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_frames: 8192,
            post_process_frames: 8192,
            ring_buffer_seconds: 2.0,
            temp_dir: None,
        }
    }
}

impl BuilderConfig {
    pub fn with_max_frames(mut self, frames: usize) -> Self {
        self.max_frames = frames;
        self
    }

    pub fn with_post_process_frames(mut self, frames: usize) -> Self {
        self.post_process_frames = frames;
        self
    }

    pub fn with_ring_buffer_seconds(mut self, seconds: f32) -> Self {
        self.ring_buffer_seconds = seconds;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }
}
