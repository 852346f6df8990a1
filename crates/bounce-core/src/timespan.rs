//! Timeline selections to be exported.

use crate::error::{Error, Result};

/// An immutable `[start, end)` sample range with a display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct Timespan {
    start: u64,
    end: u64,
    name: String,
    id: String,
}

impl Timespan {
    pub fn new(start: u64, end: u64, name: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        if end < start {
            return Err(Error::InvalidTimespan { start, end });
        }
        Ok(Self {
            start,
            end,
            name: name.into(),
            id: id.into(),
        })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Length in frames.
    pub fn length(&self) -> u64 {
        self.end - self.start
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}
