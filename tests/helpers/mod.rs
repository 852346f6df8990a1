//! Test helpers and fixtures for bounce integration tests
//!
//! Channels are fed from fixed buffers, the session runs at a fixed rate,
//! and every graph writes into its own temporary directory. Cycles are
//! driven by hand so tests control exactly where end of input falls.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): Exact operations (passthrough, unity gain)
//! - `SRC_EPSILON` (2e-3): Resampled steady signals
//! - `INT16_EPSILON` / `INT24_EPSILON`: one quantization step

#![allow(dead_code)]

pub mod tolerances;

use bounce::prelude::*;
use bounce::export::graph::Outlet;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: u32 = 48_000;

/// Cycle size for deterministic testing
pub const TEST_BLOCK_SIZE: usize = 512;

/// A mono source that plays a fixed buffer once, then runs dry.
pub struct TestChannel {
    id: u64,
    latency: u64,
    data: Vec<f32>,
    pos: Mutex<usize>,
}

impl TestChannel {
    pub fn new(id: u64, data: Vec<f32>) -> Arc<Self> {
        Self::with_latency(id, data, 0)
    }

    pub fn with_latency(id: u64, data: Vec<f32>, latency: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            latency,
            data,
            pos: Mutex::new(0),
        })
    }
}

impl ExportChannel for TestChannel {
    fn id(&self) -> ChannelId {
        ChannelId(self.id)
    }

    fn latency(&self) -> u64 {
        self.latency
    }

    fn read(&self, out: &mut [f32]) -> usize {
        let mut pos = self.pos.lock();
        let n = out.len().min(self.data.len() - *pos);
        out[..n].copy_from_slice(&self.data[*pos..*pos + n]);
        *pos += n;
        n
    }
}

/// Session at [`TEST_SAMPLE_RATE`] with a pool sized for [`TEST_BLOCK_SIZE`].
pub fn test_session() -> Arc<StaticSession> {
    Arc::new(StaticSession::new(TEST_SAMPLE_RATE, TEST_BLOCK_SIZE).expect("valid session"))
}

/// Graph writing its scratch files into `dir`.
pub fn test_graph(session: &Arc<StaticSession>, dir: &Path) -> GraphBuilder {
    let session: Arc<dyn ExportSession> = session.clone();
    GraphBuilder::new(
        session,
        BuilderConfig::default()
            .with_max_frames(TEST_BLOCK_SIZE)
            .with_post_process_frames(TEST_BLOCK_SIZE)
            .with_temp_dir(dir),
    )
}

/// Engine that counts offline-mode switches and notices nested entries.
#[derive(Default)]
pub struct CountingEngine {
    active: AtomicBool,
    entered: AtomicUsize,
    exited: AtomicUsize,
    overlaps: AtomicUsize,
}

impl CountingEngine {
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn exited(&self) -> usize {
        self.exited.load(Ordering::SeqCst)
    }

    /// Entries made while offline mode was already on.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

impl EngineMode for CountingEngine {
    fn enter_offline(&self) -> bounce::core::Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.entered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn exit_offline(&self) -> bounce::core::Result<()> {
        self.active.store(false, Ordering::SeqCst);
        self.exited.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Session like [`test_session`] that reports offline-mode switches to `engine`.
pub fn engine_session(engine: &Arc<CountingEngine>) -> Arc<StaticSession> {
    let engine: Arc<dyn EngineMode> = engine.clone();
    Arc::new(
        StaticSession::new(TEST_SAMPLE_RATE, TEST_BLOCK_SIZE)
            .expect("valid session")
            .with_engine_mode(engine),
    )
}

pub fn file_spec(config: &ChannelConfig, format: FormatSpec, path: PathBuf) -> FileSpec {
    FileSpec::new(config.clone(), format, Arc::new(path))
}

/// Push `frames` frames in full cycles, then run every render pass to completion.
pub fn run_to_end(graph: &mut GraphBuilder, frames: usize) {
    let mut remaining = frames;
    loop {
        let cycle = remaining.min(TEST_BLOCK_SIZE);
        remaining -= cycle;
        graph.process(cycle, remaining == 0).expect("process");
        if remaining == 0 {
            break;
        }
    }
    wait_for_render(graph);
}

/// Poll `post_process` until every capture is done.
pub fn wait_for_render(graph: &mut GraphBuilder) {
    let start = std::time::Instant::now();
    while !graph.post_process().expect("post_process") {
        assert!(
            start.elapsed() < std::time::Duration::from_secs(10),
            "render pass did not finish"
        );
        std::thread::yield_now();
    }
}

/// Records the files reported by the file-written callback.
pub fn record_written(graph: &mut GraphBuilder) -> Arc<Mutex<Vec<PathBuf>>> {
    let written = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&written);
    graph.set_file_written_callback(Some(Arc::new(move |path: &Path| {
        log.lock().push(path.to_path_buf())
    })));
    written
}

pub fn read_wav_f32(path: &Path) -> Vec<f32> {
    hound::WavReader::open(path)
        .expect("readable wav")
        .samples::<f32>()
        .map(|s| s.expect("sample"))
        .collect()
}

pub fn read_wav_i32(path: &Path) -> Vec<i32> {
    hound::WavReader::open(path)
        .expect("readable wav")
        .samples::<i32>()
        .map(|s| s.expect("sample"))
        .collect()
}

pub fn wav_spec(path: &Path) -> hound::WavSpec {
    hound::WavReader::open(path).expect("readable wav").spec()
}

/// Terminal stage that keeps every sample it receives.
pub struct Recorder {
    pub seen: Arc<Mutex<Vec<f32>>>,
    pub end_of_input: Arc<Mutex<usize>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            seen: Arc::default(),
            end_of_input: Arc::default(),
        }
    }
}

impl Stage for Recorder {
    fn process(
        &mut self,
        ctx: ProcessContext<'_>,
        _out: &mut Outlet<'_>,
    ) -> bounce::export::Result<()> {
        self.seen.lock().extend_from_slice(ctx.f32()?);
        if ctx.end_of_input() {
            *self.end_of_input.lock() += 1;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

/// Generate a test signal: sine wave at given frequency for specified samples.
pub fn generate_sine(frequency: f64, amplitude: f32, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f64 / TEST_SAMPLE_RATE as f64;
            amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin() as f32
        })
        .collect()
}

/// Generate a DC offset signal (constant value).
pub fn generate_dc(value: f32, num_samples: usize) -> Vec<f32> {
    vec![value; num_samples]
}

/// Generate a normalized staircase signal in range [-1, 1].
pub fn generate_normalized_staircase(num_samples: usize) -> Vec<f32> {
    if num_samples <= 1 {
        return vec![0.0; num_samples];
    }
    let max = (num_samples - 1) as f32;
    (0..num_samples)
        .map(|i| (i as f32 / max) * 2.0 - 1.0)
        .collect()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}
