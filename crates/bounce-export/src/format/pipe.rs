//! Streaming PCM into an external transcoder.
//!
//! The transcoder reads interleaved little-endian f32 on stdin and writes
//! the final file itself. Closing stdin ends the stream; the exit status
//! decides whether the file is good.

use super::{wrong_kind, SampleWriter};
use crate::error::{ExportError, Result};
use crate::file_spec::Metadata;
use crate::options::CodecQuality;
use bounce_core::Samples;
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Resolve `program` the way a shell would: paths are checked as given,
/// bare names are searched on `PATH`.
pub fn find_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

fn quality_args(quality: CodecQuality) -> Vec<OsString> {
    match quality {
        CodecQuality::Default | CodecQuality::Compression(_) => Vec::new(),
        CodecQuality::Vbr(q) => vec![
            "-q:a".into(),
            format!("{:.1}", q.clamp(0.0, 1.0) * 10.0).into(),
        ],
        CodecQuality::Bitrate(kbps) => vec!["-b:a".into(), format!("{kbps}k").into()],
    }
}

pub struct PipeEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    program: String,
    scratch: Vec<u8>,
    finished: bool,
}

impl std::fmt::Debug for PipeEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeEncoder")
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .field("finished", &self.finished)
            .finish()
    }
}

impl PipeEncoder {
    pub fn spawn(
        program: &Path,
        output: &Path,
        channels: usize,
        sample_rate: u32,
        quality: CodecQuality,
        metadata: &Metadata,
    ) -> Result<Self> {
        let name = program.display().to_string();
        let resolved = find_program(program).ok_or_else(|| ExportError::Spawn {
            program: name.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "not found on PATH"),
        })?;

        let mut command = Command::new(&resolved);
        command
            .args(["-hide_banner", "-loglevel", "error", "-f", "f32le"])
            .arg("-ar")
            .arg(sample_rate.to_string())
            .arg("-ac")
            .arg(channels.to_string())
            .args(["-i", "pipe:0"]);
        for (key, value) in metadata {
            command.arg("-metadata").arg(format!("{key}={value}"));
        }
        command
            .args(quality_args(quality))
            .arg("-y")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(|source| ExportError::Spawn {
            program: name.clone(),
            source,
        })?;
        let stdin = child.stdin.take();
        log::debug!("spawned {} for {}", name, output.display());

        Ok(Self {
            child,
            stdin,
            program: name,
            scratch: Vec::new(),
            finished: false,
        })
    }
}

impl SampleWriter for PipeEncoder {
    fn write(&mut self, samples: Samples<'_>) -> Result<()> {
        let Samples::F32(data) = samples else {
            return Err(wrong_kind("pipe encoder", &samples));
        };
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            ExportError::Encoding(format!("{}: input already closed", self.program))
        })?;
        self.scratch.clear();
        for s in data {
            self.scratch.extend_from_slice(&s.to_le_bytes());
        }
        stdin.write_all(&self.scratch)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        drop(self.stdin.take());
        let status = self.child.wait()?;
        self.finished = true;
        if !status.success() {
            return Err(ExportError::Encoding(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        Ok(())
    }
}

impl Drop for PipeEncoder {
    fn drop(&mut self) {
        if !self.finished {
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
