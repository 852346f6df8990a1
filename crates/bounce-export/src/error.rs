//! Error types for bounce-export

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Export error type
#[derive(Error, Debug)]
pub enum ExportError {
    /// Bad sample rate, zero channels, unsupported format/depth combination
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unsupported format or feature not enabled
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// External encoder could not be started
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Resampling error
    #[error("Resampling error: {0}")]
    Resample(String),

    /// Encoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Capture ring buffer could not take a whole block
    #[error("Capture buffer overrun: dropped {dropped} of {requested} samples")]
    Overrun { requested: usize, dropped: usize },

    /// Stage wiring error: channel mismatch, over-budget block, wrong sample kind
    #[error("Process context error: {0}")]
    Context(String),

    /// One or more fan-out branches failed
    #[error("{} of {total} branches failed: {}", .failures.len(), format_failures(.failures))]
    Branches {
        total: usize,
        failures: Vec<(usize, String)>,
    },

    /// Any error attributed to one output file
    #[error("Export of {} failed: {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: Box<ExportError>,
    },

    #[error(transparent)]
    Core(#[from] bounce_core::Error),
}

fn format_failures(failures: &[(usize, String)]) -> String {
    failures
        .iter()
        .map(|(branch, msg)| format!("branch {branch}: {msg}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ExportError {
    /// Attach the output path this error belongs to.
    pub fn for_output(self, path: impl Into<PathBuf>) -> Self {
        match self {
            e @ ExportError::Output { .. } => e,
            e => ExportError::Output {
                path: path.into(),
                source: Box::new(e),
            },
        }
    }
}

/// Result type for export operations
pub type Result<T> = std::result::Result<T, ExportError>;

#[cfg(feature = "wav")]
impl From<hound::Error> for ExportError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => ExportError::Io(io),
            other => ExportError::Encoding(other.to_string()),
        }
    }
}

impl From<rubato::ResamplerConstructionError> for ExportError {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        ExportError::Resample(e.to_string())
    }
}

impl From<rubato::ResampleError> for ExportError {
    fn from(e: rubato::ResampleError) -> Self {
        ExportError::Resample(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_error_names_file() {
        let err = ExportError::Encoding("disk full".into()).for_output("/tmp/mix.wav");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/mix.wav"), "{msg}");
        assert!(matches!(
            err.for_output("/tmp/other.wav"),
            ExportError::Output { path, .. } if path == PathBuf::from("/tmp/mix.wav")
        ));
    }

    #[test]
    fn test_branch_failures_listed_once() {
        let err = ExportError::Branches {
            total: 3,
            failures: vec![(0, "boom".into())],
        };
        let msg = err.to_string();
        assert_eq!(msg.matches("boom").count(), 1);
        assert!(msg.starts_with("1 of 3"));
    }
}
