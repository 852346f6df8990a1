//! Scratch storage writers for the capture stage.
//!
//! Both write headerless little-endian f32 PCM. [`TmpWriter`] writes on the
//! calling thread; [`DiskWriter`] hands blocks to a dedicated thread through
//! a lock-free ring so a realtime caller never waits on the disk.

mod disk_writer;
mod tmp_writer;

pub use disk_writer::DiskWriter;
pub use tmp_writer::TmpWriter;

use crate::error::Result;

/// Bytes per sample in capture files.
pub const CAPTURE_SAMPLE_BYTES: usize = 4;

/// Decode a block of capture-file bytes into samples.
pub fn decode_samples(bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(CAPTURE_SAMPLE_BYTES)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    );
}

/// Either capture writer, chosen by the realtime flag.
#[derive(Debug)]
pub enum CaptureWriter {
    Sync(TmpWriter),
    Background(DiskWriter),
}

impl CaptureWriter {
    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        match self {
            CaptureWriter::Sync(w) => w.write(samples),
            CaptureWriter::Background(w) => w.write(samples),
        }
    }

    pub fn samples_written(&self) -> u64 {
        match self {
            CaptureWriter::Sync(w) => w.samples_written(),
            CaptureWriter::Background(w) => w.samples_queued(),
        }
    }
}
