//! Export channels and channel configurations.

use std::fmt;
use std::sync::Arc;

/// Stable identity of an export channel within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelId(pub u64);

/// A mono source of audio inside the session.
///
/// `read` is called once per process cycle per distinct channel; the
/// channel fills `out` with up to `out.len()` frames and returns the number
/// written. Fewer than requested means the remainder is silence.
pub trait ExportChannel: Send + Sync {
    fn id(&self) -> ChannelId;

    /// Latency in frames relative to the session timeline.
    fn latency(&self) -> u64 {
        0
    }

    fn read(&self, out: &mut [f32]) -> usize;
}

impl fmt::Debug for dyn ExportChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportChannel")
            .field("id", &self.id())
            .field("latency", &self.latency())
            .finish()
    }
}

/// Ordered list of channels forming one output plus split/region options.
///
/// Two configs are equal when their channel sequences have the same ids and
/// they agree on region export, which changes how the sources are read.
/// `split` does not take part: the builder expands a split config into
/// single-channel configs before comparing.
#[derive(Clone, Default)]
pub struct ChannelConfig {
    channels: Vec<Arc<dyn ExportChannel>>,
    split: bool,
    region_export: bool,
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Arc<dyn ExportChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn add_channel(&mut self, channel: Arc<dyn ExportChannel>) {
        self.channels.push(channel);
    }

    /// Produce one mono output per channel instead of one interleaved output.
    pub fn with_split(mut self, split: bool) -> Self {
        self.split = split;
        self
    }

    pub fn with_region_export(mut self, region_export: bool) -> Self {
        self.region_export = region_export;
        self
    }

    pub fn channels(&self) -> &[Arc<dyn ExportChannel>] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn split(&self) -> bool {
        self.split
    }

    pub fn region_export(&self) -> bool {
        self.region_export
    }

    pub fn ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.iter().map(|c| c.id())
    }
}

impl PartialEq for ChannelConfig {
    fn eq(&self, other: &Self) -> bool {
        self.region_export == other.region_export
            && self.channels.len() == other.channels.len()
            && self.ids().eq(other.ids())
    }
}

impl Eq for ChannelConfig {}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("channels", &self.ids().collect::<Vec<_>>())
            .field("split", &self.split)
            .field("region_export", &self.region_export)
            .finish()
    }
}
