//! Synchronous capture writer.

use super::CAPTURE_SAMPLE_BYTES;
use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};

#[derive(Debug)]
pub struct TmpWriter {
    writer: BufWriter<File>,
    scratch: Vec<u8>,
    samples: u64,
}

impl TmpWriter {
    pub fn new(file: File) -> Self {
        Self {
            writer: BufWriter::new(file),
            scratch: Vec::new(),
            samples: 0,
        }
    }

    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.scratch.clear();
        self.scratch.reserve(samples.len() * CAPTURE_SAMPLE_BYTES);
        for s in samples {
            self.scratch.extend_from_slice(&s.to_le_bytes());
        }
        self.writer.write_all(&self.scratch)?;
        self.samples += samples.len() as u64;
        Ok(())
    }

    pub fn samples_written(&self) -> u64 {
        self.samples
    }

    /// Flush everything to disk. Returns the total samples written.
    pub fn finish(&mut self) -> Result<u64> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(self.samples)
    }
}
