//! FLAC writer using flacenc
//!
//! flacenc encodes from memory, so samples are collected until
//! finalization. The target file is created up front so a bad path fails
//! the output at setup time.

use super::{create_output, wrong_kind, SampleWriter, MAX_FLAC_COMPRESSION};
use crate::error::{ExportError, Result};
use crate::options::{CodecQuality, SampleFormat};
use bounce_core::Samples;
use flacenc::bitsink::ByteSink;
use flacenc::component::BitRepr;
use flacenc::config::Encoder as EncoderConfig;
use flacenc::encode_with_fixed_block_size;
use flacenc::error::Verify;
use flacenc::source::MemSource;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Samples per block for a compression level, following the reference
/// encoder's presets: levels 0 to 2 use short blocks, the rest 4096.
fn block_size(quality: CodecQuality) -> Result<usize> {
    match quality {
        CodecQuality::Default => Ok(4096),
        CodecQuality::Compression(level @ 0..=2) => {
            log::debug!("FLAC compression level {level}");
            Ok(1152)
        }
        CodecQuality::Compression(level @ 3..=MAX_FLAC_COMPRESSION) => {
            log::debug!("FLAC compression level {level}");
            Ok(4096)
        }
        other => Err(ExportError::UnsupportedFormat(format!(
            "FLAC takes a compression level from 0 to {MAX_FLAC_COMPRESSION}, not {other:?}"
        ))),
    }
}

#[derive(Debug)]
pub struct FlacFileWriter {
    file: Option<File>,
    channels: usize,
    sample_rate: u32,
    bits: usize,
    block_size: usize,
    samples: Vec<i32>,
}

impl FlacFileWriter {
    pub fn create(
        path: &Path,
        channels: usize,
        sample_rate: u32,
        format: SampleFormat,
        quality: CodecQuality,
    ) -> Result<Self> {
        let bits = match format {
            SampleFormat::Int16 => 16,
            SampleFormat::Int24 => 24,
            other => {
                return Err(ExportError::UnsupportedFormat(format!(
                    "FLAC does not support {other:?}, use 16-bit or 24-bit"
                )))
            }
        };
        let block_size = block_size(quality)?;
        Ok(Self {
            file: Some(create_output(path)?),
            channels,
            sample_rate,
            bits,
            block_size,
            samples: Vec::new(),
        })
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let config = EncoderConfig::default()
            .into_verified()
            .map_err(|e| ExportError::Encoding(format!("Invalid FLAC config: {:?}", e)))?;

        let source = MemSource::from_samples(
            &self.samples,
            self.channels,
            self.bits,
            self.sample_rate as usize,
        );

        let stream = encode_with_fixed_block_size(&config, source, self.block_size)
            .map_err(|e| ExportError::Encoding(format!("FLAC encoding failed: {:?}", e)))?;

        let mut sink = ByteSink::new();
        stream
            .write(&mut sink)
            .map_err(|e| ExportError::Encoding(format!("Failed to write FLAC stream: {:?}", e)))?;
        Ok(sink.into_inner())
    }
}

impl SampleWriter for FlacFileWriter {
    fn write(&mut self, samples: Samples<'_>) -> Result<()> {
        if self.file.is_none() {
            return Err(ExportError::Encoding("FLAC file already finalized".into()));
        }
        match samples {
            Samples::I16(data) if self.bits == 16 => {
                self.samples.extend(data.iter().map(|&s| s as i32));
            }
            Samples::I32(data) if self.bits == 24 => self.samples.extend_from_slice(data),
            other => return Err(wrong_kind("flac", &other)),
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        let bytes = self.encode()?;
        if let Some(mut file) = self.file.take() {
            file.write_all(&bytes)?;
            file.sync_data()?;
        }
        self.samples = Vec::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_flac_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.flac");
        let mut writer =
            FlacFileWriter::create(&path, 2, 44_100, SampleFormat::Int16, CodecQuality::Default)
                .unwrap();
        let block: Vec<i16> = (0..2048).map(|i| ((i % 200) * 100 - 10_000) as i16).collect();
        writer.write(Samples::I16(&block)).unwrap();
        writer.finalize().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"fLaC");
    }

    #[test]
    fn test_compression_level_sets_block_size() {
        assert_eq!(block_size(CodecQuality::Compression(0)).unwrap(), 1152);
        assert_eq!(block_size(CodecQuality::Compression(8)).unwrap(), 4096);
        assert!(block_size(CodecQuality::Compression(9)).is_err());
        assert!(block_size(CodecQuality::Bitrate(320)).is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fast.flac");
        let mut writer = FlacFileWriter::create(
            &path,
            1,
            48_000,
            SampleFormat::Int16,
            CodecQuality::Compression(1),
        )
        .unwrap();
        let block: Vec<i16> = (0..3000).map(|i| ((i % 50) * 200) as i16).collect();
        writer.write(Samples::I16(&block)).unwrap();
        writer.finalize().unwrap();
        assert_eq!(&std::fs::read(&path).unwrap()[0..4], b"fLaC");
    }

    #[test]
    fn test_rejects_float_and_wrong_width() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FlacFileWriter::create(
            &dir.path().join("a.flac"),
            1,
            48_000,
            SampleFormat::Float32,
            CodecQuality::Default
        )
        .is_err());

        let mut writer = FlacFileWriter::create(
            &dir.path().join("b.flac"),
            1,
            48_000,
            SampleFormat::Int24,
            CodecQuality::Default,
        )
        .unwrap();
        assert!(writer.write(Samples::I16(&[1, 2])).is_err());
    }
}
