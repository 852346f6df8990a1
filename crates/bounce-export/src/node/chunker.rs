//! Fixed-size re-segmentation.

use super::{check_channels, Stage};
use crate::error::{ExportError, Result};
use crate::graph::Outlet;
use bounce_core::{Flags, ProcessContext, Sample};

/// Collects an arbitrary-length stream into blocks of `chunk_samples`.
///
/// Full blocks go out without the end-of-input flag. On end of input the
/// partial remainder (possibly empty) goes out carrying the flag.
#[derive(Debug)]
pub struct Chunker<T: Sample> {
    channels: usize,
    buffer: Vec<T>,
    filled: usize,
}

impl<T: Sample> Chunker<T> {
    pub fn new(chunk_samples: usize, channels: usize) -> Result<Self> {
        if channels == 0 || chunk_samples == 0 || chunk_samples % channels != 0 {
            return Err(ExportError::InvalidConfig(format!(
                "chunk of {chunk_samples} samples does not hold whole frames of {channels} channels"
            )));
        }
        Ok(Self {
            channels,
            buffer: vec![T::default(); chunk_samples],
            filled: 0,
        })
    }

    pub fn chunk_samples(&self) -> usize {
        self.buffer.len()
    }

    fn emit_buffer(&mut self, len: usize, flags: Flags, out: &mut Outlet<'_>) -> Result<()> {
        let ctx = ProcessContext::from_slice_mut(&mut self.buffer[..len], self.channels)?
            .with_flags(flags);
        out.emit(ctx)
    }
}

impl<T: Sample> Stage for Chunker<T> {
    fn process(&mut self, ctx: ProcessContext<'_>, out: &mut Outlet<'_>) -> Result<()> {
        check_channels("chunker", self.channels, &ctx)?;
        let data = ctx.typed::<T>()?;
        let chunk = self.buffer.len();

        let mut pos = 0;
        while pos < data.len() {
            let take = (chunk - self.filled).min(data.len() - pos);
            self.buffer[self.filled..self.filled + take].copy_from_slice(&data[pos..pos + take]);
            self.filled += take;
            pos += take;

            if self.filled == chunk {
                self.filled = 0;
                self.emit_buffer(chunk, Flags::NONE, out)?;
            }
        }

        if ctx.end_of_input() {
            let remainder = std::mem::take(&mut self.filled);
            self.emit_buffer(remainder, Flags::END_OF_INPUT, out)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "chunker"
    }
}
