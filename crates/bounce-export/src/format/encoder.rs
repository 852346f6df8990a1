//! Terminal stage: hands converted samples to a writer.

use super::SampleWriter;
use crate::error::{ExportError, Result};
use crate::graph::Outlet;
use crate::node::Stage;
use bounce_core::ProcessContext;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Called once for every finished output file, copies included.
pub type FileWrittenCallback = Arc<dyn Fn(&Path) + Send + Sync>;

/// Output bookkeeping shared between an encoder and the builder.
#[derive(Debug, Default)]
pub struct EncoderTargets {
    /// Paths that receive a copy of the encoded file.
    pub extra_paths: Vec<PathBuf>,
    /// Set once the primary file and every copy are complete.
    pub finalized: bool,
}

pub type SharedTargets = Arc<Mutex<EncoderTargets>>;

/// Writes one output file and copies it to every equivalent request.
pub struct Encoder {
    channels: usize,
    path: PathBuf,
    writer: Box<dyn SampleWriter>,
    targets: SharedTargets,
    on_written: Option<FileWrittenCallback>,
    frames: u64,
    done: bool,
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encoder")
            .field("path", &self.path)
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .field("done", &self.done)
            .finish()
    }
}

impl Encoder {
    pub fn new(
        channels: usize,
        path: PathBuf,
        writer: Box<dyn SampleWriter>,
        targets: SharedTargets,
        on_written: Option<FileWrittenCallback>,
    ) -> Self {
        Self {
            channels,
            path,
            writer,
            targets,
            on_written,
            frames: 0,
            done: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn complete(&mut self) -> Result<()> {
        self.writer.finalize()?;
        self.done = true;

        let extra = {
            let mut targets = self.targets.lock();
            targets.finalized = true;
            targets.extra_paths.clone()
        };
        for copy in &extra {
            fs::copy(&self.path, copy).map_err(|e| ExportError::from(e).for_output(copy))?;
        }
        log::info!(
            "wrote {} ({} frames, {} copies)",
            self.path.display(),
            self.frames,
            extra.len()
        );

        if let Some(callback) = &self.on_written {
            callback(&self.path);
            for copy in &extra {
                callback(copy);
            }
        }
        Ok(())
    }
}

impl Stage for Encoder {
    fn process(&mut self, ctx: ProcessContext<'_>, _out: &mut Outlet<'_>) -> Result<()> {
        crate::node::check_channels("encoder", self.channels, &ctx)?;
        if self.done {
            return Err(ExportError::Context(format!(
                "encoder for {}: data after end of input",
                self.path.display()
            )));
        }
        self.writer
            .write(ctx.samples())
            .map_err(|e| e.for_output(&self.path))?;
        self.frames += ctx.frames() as u64;

        if ctx.end_of_input() {
            self.complete().map_err(|e| e.for_output(&self.path))?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "encoder"
    }
}
