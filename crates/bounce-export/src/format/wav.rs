//! WAV writer using hound
//!
//! Supports 8, 16, 24 and 32-bit integer and 32-bit float WAV files.

use super::{create_output, wrong_kind, SampleWriter};
use crate::error::{ExportError, Result};
use crate::options::SampleFormat;
use bounce_core::Samples;
use hound::{WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub struct WavFileWriter {
    writer: Option<WavWriter<BufWriter<File>>>,
    sample_format: SampleFormat,
}

impl std::fmt::Debug for WavFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavFileWriter")
            .field("sample_format", &self.sample_format)
            .field("open", &self.writer.is_some())
            .finish()
    }
}

/// Create hound WavSpec from our options
fn create_wav_spec(channels: usize, sample_rate: u32, format: SampleFormat) -> Result<WavSpec> {
    let sample_format = match format {
        SampleFormat::Float32 => hound::SampleFormat::Float,
        SampleFormat::U8 | SampleFormat::Int16 | SampleFormat::Int24 | SampleFormat::Int32 => {
            hound::SampleFormat::Int
        }
        SampleFormat::Float64 => {
            return Err(ExportError::UnsupportedFormat(
                "WAV does not support 64-bit float".into(),
            ))
        }
    };
    let channels = u16::try_from(channels)
        .map_err(|_| ExportError::InvalidConfig(format!("{channels} channels in one WAV file")))?;
    Ok(WavSpec {
        channels,
        sample_rate,
        bits_per_sample: format.bits(),
        sample_format,
    })
}

impl WavFileWriter {
    pub fn create(
        path: &Path,
        channels: usize,
        sample_rate: u32,
        format: SampleFormat,
    ) -> Result<Self> {
        let spec = create_wav_spec(channels, sample_rate, format)?;
        let file = create_output(path)?;
        let writer = WavWriter::new(BufWriter::new(file), spec)?;
        Ok(Self {
            writer: Some(writer),
            sample_format: format,
        })
    }
}

impl SampleWriter for WavFileWriter {
    fn write(&mut self, samples: Samples<'_>) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(ExportError::Encoding("WAV file already finalized".into()));
        };
        match (self.sample_format, samples) {
            (SampleFormat::U8, Samples::U8(data)) => {
                // hound takes signed 8-bit and stores it offset.
                for &s in data {
                    writer.write_sample((s as i16 - 128) as i8)?;
                }
            }
            (SampleFormat::Int16, Samples::I16(data)) => {
                for &s in data {
                    writer.write_sample(s)?;
                }
            }
            (SampleFormat::Int24 | SampleFormat::Int32, Samples::I32(data)) => {
                for &s in data {
                    writer.write_sample(s)?;
                }
            }
            (SampleFormat::Float32, Samples::F32(data)) => {
                for &s in data {
                    writer.write_sample(s)?;
                }
            }
            (_, other) => return Err(wrong_kind("wav", &other)),
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}
