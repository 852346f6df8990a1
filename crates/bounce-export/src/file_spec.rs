//! Output file specifications and filename generation.

use crate::options::FormatSpec;
use bounce_core::{ChannelConfig, Timespan};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Broadcast-wave style metadata passed to encoders that can carry it.
pub type Metadata = BTreeMap<String, String>;

/// Inputs available when naming an output file.
#[derive(Debug, Clone, Copy)]
pub struct FilenameContext<'a> {
    pub format: &'a FormatSpec,
    pub timespan: Option<&'a Timespan>,
    /// Source channel for split exports.
    pub channel: Option<usize>,
}

/// Produces the final output path for one file.
pub trait ExportFilename: Send + Sync {
    fn path(&self, ctx: &FilenameContext<'_>) -> PathBuf;
}

/// `ExportFilename` for a fixed path. The channel index is appended for split exports.
impl ExportFilename for PathBuf {
    fn path(&self, ctx: &FilenameContext<'_>) -> PathBuf {
        match ctx.channel {
            None => self.clone(),
            Some(channel) => {
                let stem = self
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let mut name = format!("{stem}-{}", channel + 1);
                if let Some(ext) = self.extension() {
                    name.push('.');
                    name.push_str(&ext.to_string_lossy());
                }
                self.with_file_name(name)
            }
        }
    }
}

/// Directory plus a pattern with `{name}`, `{channel}` and `{ext}` placeholders.
///
/// `{name}` is the timespan name (or `session` without one). `{channel}` is
/// the 1-based channel number and expands to nothing for interleaved exports,
/// along with a `-` directly before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    dir: PathBuf,
    pattern: String,
}

impl FilenameTemplate {
    pub fn new(dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            pattern: pattern.into(),
        }
    }

    /// `{name}-{channel}.{ext}` in `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, "{name}-{channel}.{ext}")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn render(&self, ctx: &FilenameContext<'_>) -> String {
        let name = ctx.timespan.map(|t| t.name()).unwrap_or("session");
        let mut out = self
            .pattern
            .replace("{name}", name)
            .replace("{ext}", ctx.format.format.extension());
        match ctx.channel {
            Some(channel) => out = out.replace("{channel}", &(channel + 1).to_string()),
            None => {
                out = out.replace("-{channel}", "").replace("{channel}", "");
            }
        }
        out
    }
}

impl ExportFilename for FilenameTemplate {
    fn path(&self, ctx: &FilenameContext<'_>) -> PathBuf {
        self.dir.join(self.render(ctx))
    }
}

/// One requested output file.
#[derive(Clone)]
pub struct FileSpec {
    pub channel_config: ChannelConfig,
    pub format: FormatSpec,
    pub filename: Arc<dyn ExportFilename>,
    pub metadata: Metadata,
    /// Set on the per-channel specs a split export expands into.
    pub channel_index: Option<usize>,
}

impl FileSpec {
    pub fn new(
        channel_config: ChannelConfig,
        format: FormatSpec,
        filename: Arc<dyn ExportFilename>,
    ) -> Self {
        Self {
            channel_config,
            format,
            filename,
            metadata: Metadata::new(),
            channel_index: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn output_path(&self, timespan: Option<&Timespan>) -> PathBuf {
        self.filename.path(&FilenameContext {
            format: &self.format,
            timespan,
            channel: self.channel_index,
        })
    }
}

impl fmt::Debug for FileSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSpec")
            .field("channel_config", &self.channel_config)
            .field("format", &self.format)
            .field("metadata", &self.metadata)
            .field("channel_index", &self.channel_index)
            .finish()
    }
}
