//! The narrow slice of the session that the export graph talks to.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Audio engine offline/freewheel switch.
pub trait EngineMode: Send + Sync {
    fn enter_offline(&self) -> Result<()>;
    fn exit_offline(&self) -> Result<()>;
}

/// Session collaborator consulted by the graph builder.
pub trait ExportSession: Send + Sync {
    fn nominal_sample_rate(&self) -> u32;

    /// Frames of latency preroll still to be consumed before real output.
    fn remaining_latency_preroll(&self) -> u64;

    fn buffer_pool(&self) -> &BufferPool;

    fn engine_mode(&self) -> Option<Arc<dyn EngineMode>> {
        None
    }
}

/// Reusable zero and scratch buffers keyed by channel count.
///
/// Every buffer holds `frames * channels` samples.
#[derive(Debug)]
pub struct BufferPool {
    frames: usize,
    silent: Mutex<HashMap<usize, Arc<[f32]>>>,
    scratch: Mutex<HashMap<usize, Vec<Vec<f32>>>>,
}

impl BufferPool {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            silent: Mutex::new(HashMap::new()),
            scratch: Mutex::new(HashMap::new()),
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Shared all-zero buffer.
    pub fn silent(&self, channels: usize) -> Arc<[f32]> {
        let mut silent = self.silent.lock();
        silent
            .entry(channels)
            .or_insert_with(|| vec![0.0; self.frames * channels].into())
            .clone()
    }

    /// Scratch buffer with unspecified contents. Hand it back with [`BufferPool::give_back`].
    pub fn take_scratch(&self, channels: usize) -> Vec<f32> {
        let len = self.frames * channels;
        let reused = self
            .scratch
            .lock()
            .get_mut(&channels)
            .and_then(|free| free.pop());
        match reused {
            Some(mut buf) => {
                buf.resize(len, 0.0);
                buf
            }
            None => vec![0.0; len],
        }
    }

    pub fn give_back(&self, channels: usize, buf: Vec<f32>) {
        self.scratch.lock().entry(channels).or_default().push(buf);
    }
}

/// Admits one owner at a time into engine offline mode.
///
/// Owned by the graph builder and handed to capture stages when their second
/// pass starts. Cloning shares the same lock.
#[derive(Debug, Clone, Default)]
pub struct FreewheelLock {
    owner: Arc<Mutex<Option<u64>>>,
}

impl FreewheelLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim offline mode for `owner`, switching the engine on first claim.
    ///
    /// Returns `false` when a different owner holds it.
    pub fn try_acquire(&self, owner: u64, engine: Option<&dyn EngineMode>) -> Result<bool> {
        let mut current = self.owner.lock();
        match *current {
            Some(held) if held == owner => Ok(true),
            Some(_) => Ok(false),
            None => {
                if let Some(engine) = engine {
                    engine.enter_offline()?;
                }
                *current = Some(owner);
                Ok(true)
            }
        }
    }

    /// Give up offline mode if `owner` holds it. A no-op otherwise.
    pub fn release(&self, owner: u64, engine: Option<&dyn EngineMode>) -> Result<()> {
        let mut current = self.owner.lock();
        if *current != Some(owner) {
            return Ok(());
        }
        *current = None;
        match engine {
            Some(engine) => engine.exit_offline(),
            None => Ok(()),
        }
    }

    pub fn holder(&self) -> Option<u64> {
        *self.owner.lock()
    }
}

/// Fixed-rate session with a settable preroll, for offline bounces and tests.
pub struct StaticSession {
    sample_rate: u32,
    preroll: AtomicU64,
    pool: BufferPool,
    engine: Option<Arc<dyn EngineMode>>,
}

impl std::fmt::Debug for StaticSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSession")
            .field("sample_rate", &self.sample_rate)
            .field("preroll", &self.preroll)
            .field("has_engine", &self.engine.is_some())
            .finish()
    }
}

impl StaticSession {
    pub fn new(sample_rate: u32, max_frames: usize) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidSampleRate(sample_rate));
        }
        Ok(Self {
            sample_rate,
            preroll: AtomicU64::new(0),
            pool: BufferPool::new(max_frames),
            engine: None,
        })
    }

    pub fn with_engine_mode(mut self, engine: Arc<dyn EngineMode>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn set_remaining_latency_preroll(&self, frames: u64) {
        self.preroll.store(frames, Ordering::Release);
    }

    /// Consume `frames` of preroll, saturating at zero.
    pub fn advance(&self, frames: u64) {
        let _ = self
            .preroll
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
                Some(p.saturating_sub(frames))
            });
    }
}

impl ExportSession for StaticSession {
    fn nominal_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn remaining_latency_preroll(&self) -> u64 {
        self.preroll.load(Ordering::Acquire)
    }

    fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    fn engine_mode(&self) -> Option<Arc<dyn EngineMode>> {
        self.engine.clone()
    }
}
