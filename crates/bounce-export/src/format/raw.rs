//! Headerless PCM in either byte order.

use super::{create_output, SampleWriter};
use crate::error::Result;
use crate::options::Endianness;
use bounce_core::Samples;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug)]
pub struct RawWriter {
    writer: Option<BufWriter<File>>,
    endianness: Endianness,
    scratch: Vec<u8>,
}

macro_rules! encode {
    ($out:expr, $data:expr, $endianness:expr) => {
        match $endianness {
            Endianness::Little => $data.iter().for_each(|s| $out.extend_from_slice(&s.to_le_bytes())),
            Endianness::Big => $data.iter().for_each(|s| $out.extend_from_slice(&s.to_be_bytes())),
        }
    };
}

impl RawWriter {
    pub fn create(path: &Path, endianness: Endianness) -> Result<Self> {
        Ok(Self {
            writer: Some(BufWriter::new(create_output(path)?)),
            endianness,
            scratch: Vec::new(),
        })
    }
}

impl SampleWriter for RawWriter {
    /// 24-bit samples arrive in `i32` and are written as four bytes.
    fn write(&mut self, samples: Samples<'_>) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(crate::error::ExportError::Encoding("raw file already finalized".into()));
        };
        self.scratch.clear();
        match samples {
            Samples::F32(data) => encode!(self.scratch, data, self.endianness),
            Samples::F64(data) => encode!(self.scratch, data, self.endianness),
            Samples::I32(data) => encode!(self.scratch, data, self.endianness),
            Samples::I16(data) => encode!(self.scratch, data, self.endianness),
            Samples::U8(data) => self.scratch.extend_from_slice(data),
        }
        writer.write_all(&self.scratch)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_order() {
        let dir = tempfile::tempdir().unwrap();
        for (endianness, expected) in [
            (Endianness::Little, vec![0x01, 0x02, 0xff, 0x7f]),
            (Endianness::Big, vec![0x02, 0x01, 0x7f, 0xff]),
        ] {
            let path = dir.path().join(format!("{endianness:?}.raw"));
            let mut writer = RawWriter::create(&path, endianness).unwrap();
            writer.write(Samples::I16(&[0x0201, 0x7fff])).unwrap();
            writer.finalize().unwrap();
            assert_eq!(std::fs::read(&path).unwrap(), expected);
        }
    }
}
