//! Background capture writer.
//!
//! The producer side pushes into a SPSC ring and signals a condvar; a named,
//! high-priority thread drains the ring to disk. Completion is reported once
//! through the callback given at spawn time, after the last sample hits the
//! file.

use super::CAPTURE_SAMPLE_BYTES;
use crate::error::{ExportError, Result};
use parking_lot::{Condvar, Mutex};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thread_priority::ThreadPriority;

/// Samples moved from the ring per write.
const DRAIN_CHUNK: usize = 4096;

pub type FlushCallback = Box<dyn FnOnce(Result<u64>) + Send + 'static>;

#[derive(Debug, Default)]
struct Signal {
    pending: bool,
    finished: bool,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Shared {
    signal: Mutex<Signal>,
    cond: Condvar,
}

impl Shared {
    fn notify(&self, update: impl FnOnce(&mut Signal)) {
        let mut signal = self.signal.lock();
        update(&mut signal);
        self.cond.notify_one();
    }
}

pub struct DiskWriter {
    producer: HeapProd<f32>,
    shared: Arc<Shared>,
    thread_handle: Option<JoinHandle<()>>,
    queued: u64,
}

impl std::fmt::Debug for DiskWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskWriter")
            .field("queued", &self.queued)
            .field("running", &self.thread_handle.is_some())
            .finish()
    }
}

impl DiskWriter {
    /// Start the writer thread. `capacity` is the ring size in samples.
    pub fn spawn(file: File, capacity: usize, on_flushed: FlushCallback) -> Result<Self> {
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
        let shared = Arc::new(Shared::default());
        let thread_shared = Arc::clone(&shared);

        let handle = thread::Builder::new()
            .name("bounce-capture".into())
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                let result = writer_loop(consumer, file, &thread_shared);
                if let Some(result) = result {
                    on_flushed(result);
                }
            })?;

        Ok(Self {
            producer,
            shared,
            thread_handle: Some(handle),
            queued: 0,
        })
    }

    /// Queue a block. Never blocks; a full ring is an overrun.
    pub fn write(&mut self, samples: &[f32]) -> Result<()> {
        let pushed = self.producer.push_slice(samples);
        self.queued += pushed as u64;
        self.shared.notify(|s| s.pending = true);
        if pushed < samples.len() {
            return Err(ExportError::Overrun {
                requested: samples.len(),
                dropped: samples.len() - pushed,
            });
        }
        Ok(())
    }

    pub fn samples_queued(&self) -> u64 {
        self.queued
    }

    /// Ask the thread to drain, flush and report. Does not wait.
    pub fn finish(&mut self) {
        self.shared.notify(|s| s.finished = true);
    }

    /// Stop the thread without reporting; queued samples may be lost.
    pub fn stop(&mut self) {
        self.shared.notify(|s| s.shutdown = true);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Wait for the thread to exit after `finish`.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Returns `None` when shut down before finishing.
fn writer_loop(mut consumer: HeapCons<f32>, file: File, shared: &Shared) -> Option<Result<u64>> {
    let mut writer = BufWriter::new(file);
    let mut chunk = vec![0.0f32; DRAIN_CHUNK];
    let mut bytes = Vec::with_capacity(DRAIN_CHUNK * CAPTURE_SAMPLE_BYTES);
    let mut written = 0u64;

    loop {
        while !consumer.is_empty() {
            let n = consumer.pop_slice(&mut chunk);
            bytes.clear();
            for s in &chunk[..n] {
                bytes.extend_from_slice(&s.to_le_bytes());
            }
            if let Err(e) = writer.write_all(&bytes) {
                return Some(Err(e.into()));
            }
            written += n as u64;
        }

        let mut signal = shared.signal.lock();
        if signal.shutdown {
            return None;
        }
        if signal.finished && consumer.is_empty() {
            drop(signal);
            let flushed = writer
                .flush()
                .and_then(|_| writer.get_ref().sync_data())
                .map(|_| written)
                .map_err(ExportError::from);
            return Some(flushed);
        }
        if !signal.pending && !signal.finished {
            shared.cond.wait(&mut signal);
        }
        signal.pending = false;
    }
}
