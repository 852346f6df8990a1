//! Output writers and the encoder stage that drives them.
//!
//! Each writer is feature-gated where it pulls in a codec:
//! - `wav`: WAV via hound (pure Rust)
//! - `flac`: FLAC via flacenc (pure Rust)
//!
//! Raw PCM and the external transcoder pipe are always available.

mod encoder;
mod pipe;
mod raw;

#[cfg(feature = "wav")]
mod wav;

#[cfg(feature = "flac")]
mod flac;

pub use encoder::{Encoder, EncoderTargets, FileWrittenCallback, SharedTargets};
pub use pipe::{find_program, PipeEncoder};
pub use raw::RawWriter;

#[cfg(feature = "wav")]
pub use wav::WavFileWriter;

#[cfg(feature = "flac")]
pub use flac::FlacFileWriter;

/// Highest compression level a FLAC output accepts.
pub const MAX_FLAC_COMPRESSION: u8 = 8;

use crate::error::{ExportError, Result};
use crate::file_spec::Metadata;
use crate::options::{CodecQuality, FormatId, FormatSpec};
use bounce_core::Samples;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Sink for converted samples of one output file.
pub trait SampleWriter: Send {
    /// Append interleaved samples.
    fn write(&mut self, samples: Samples<'_>) -> Result<()>;

    /// Complete the file. Further calls are no-ops.
    fn finalize(&mut self) -> Result<()>;
}

/// Create the target file, failing if something already sits at `path`.
pub(crate) fn create_output(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(ExportError::from)
}

pub(crate) fn wrong_kind(writer: &str, samples: &Samples<'_>) -> ExportError {
    ExportError::Context(format!(
        "{writer}: cannot write {:?} samples",
        samples.kind()
    ))
}

/// Check that `spec` can be written at all, before any resource is touched.
pub fn validate(spec: &FormatSpec) -> Result<()> {
    if !spec.format.supports(spec.sample_format) {
        return Err(ExportError::UnsupportedFormat(format!(
            "{:?} cannot store {:?} samples",
            spec.format, spec.sample_format
        )));
    }
    check_quality(spec.format, spec.quality)?;
    match spec.format {
        FormatId::Wav if cfg!(not(feature = "wav")) => Err(ExportError::UnsupportedFormat(
            "WAV support requires the `wav` feature".into(),
        )),
        FormatId::Flac if cfg!(not(feature = "flac")) => Err(ExportError::UnsupportedFormat(
            "FLAC support requires the `flac` feature".into(),
        )),
        FormatId::Wav if spec.endianness == crate::options::Endianness::Big => Err(
            ExportError::UnsupportedFormat("WAV is little-endian only".into()),
        ),
        FormatId::Ogg | FormatId::Mp3 => find_program(&spec.pipe.program)
            .map(|_| ())
            .ok_or_else(|| ExportError::Spawn {
                program: spec.pipe.program.display().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "not found on PATH"),
            }),
        _ => Ok(()),
    }
}

fn check_quality(format: FormatId, quality: CodecQuality) -> Result<()> {
    let honored = match (format, quality) {
        (_, CodecQuality::Default) => true,
        (FormatId::Flac, CodecQuality::Compression(level)) => level <= MAX_FLAC_COMPRESSION,
        (FormatId::Ogg | FormatId::Mp3, CodecQuality::Vbr(_) | CodecQuality::Bitrate(_)) => true,
        _ => false,
    };
    if honored {
        Ok(())
    } else {
        Err(ExportError::UnsupportedFormat(format!(
            "{format:?} cannot honor quality {quality:?}"
        )))
    }
}

/// Tags travel only through the external transcoder; the other writers
/// have nowhere to put them.
pub fn validate_metadata(format: FormatId, metadata: &Metadata) -> Result<()> {
    if metadata.is_empty() || format.is_piped() {
        return Ok(());
    }
    Err(ExportError::UnsupportedFormat(format!(
        "{format:?} output cannot carry metadata ({} entries)",
        metadata.len()
    )))
}

/// Open the writer for one output file.
///
/// The target is created (or the transcoder spawned) here, so a failure
/// aborts only this output.
pub fn open_writer(
    spec: &FormatSpec,
    path: &Path,
    channels: usize,
    sample_rate: u32,
    metadata: &Metadata,
) -> Result<Box<dyn SampleWriter>> {
    validate(spec)?;
    validate_metadata(spec.format, metadata)?;
    if path.exists() {
        return Err(ExportError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        )));
    }
    let writer: Box<dyn SampleWriter> = match spec.format {
        #[cfg(feature = "wav")]
        FormatId::Wav => Box::new(WavFileWriter::create(
            path,
            channels,
            sample_rate,
            spec.sample_format,
        )?),
        #[cfg(feature = "flac")]
        FormatId::Flac => Box::new(FlacFileWriter::create(
            path,
            channels,
            sample_rate,
            spec.sample_format,
            spec.quality,
        )?),
        FormatId::Raw => Box::new(RawWriter::create(path, spec.endianness)?),
        FormatId::Ogg | FormatId::Mp3 => Box::new(PipeEncoder::spawn(
            &spec.pipe.program,
            path,
            channels,
            sample_rate,
            spec.quality,
            metadata,
        )?),
        #[allow(unreachable_patterns)]
        other => {
            return Err(ExportError::UnsupportedFormat(format!(
                "{other:?} support not compiled in"
            )))
        }
    };
    Ok(writer)
}
