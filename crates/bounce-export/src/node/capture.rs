//! First pass of two-pass normalization: analyze and spill to scratch.

use super::{check_channels, Stage};
use crate::error::{ExportError, Result};
use crate::graph::Outlet;
use crate::io::CaptureWriter;
use bounce_core::{AnalysisResult, LoudnessReader, PeakReader, ProcessContext};
use crossbeam_channel::Sender;

/// Progress of one capture stage, in the order they are sent.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// All input analyzed and handed to the writer. Pass two can be set up.
    FileWritten {
        capture: u64,
        analysis: AnalysisResult,
        samples: u64,
    },
    /// Every sample is on disk. Pass two can run.
    FileFlushed { capture: u64 },
    /// The scratch file could not be completed.
    Failed { capture: u64, error: String },
}

impl CaptureEvent {
    pub fn capture(&self) -> u64 {
        match self {
            CaptureEvent::FileWritten { capture, .. }
            | CaptureEvent::FileFlushed { capture }
            | CaptureEvent::Failed { capture, .. } => *capture,
        }
    }
}

/// Terminal stage of pass one.
///
/// Every block is measured (sample peak always, loudness and true peak when
/// asked for) and written to the scratch file. End of input finishes the
/// writer and reports through the event channel. A synchronous writer
/// reports `FileWritten` and `FileFlushed` back to back; a background
/// writer reports `FileFlushed` from its own thread once the ring drains.
#[derive(Debug)]
pub struct CaptureStage {
    id: u64,
    channels: usize,
    peak: PeakReader,
    loudness: Option<LoudnessReader>,
    writer: CaptureWriter,
    events: Sender<CaptureEvent>,
    finished: bool,
}

impl CaptureStage {
    pub fn new(
        id: u64,
        channels: usize,
        sample_rate: u32,
        measure_loudness: bool,
        writer: CaptureWriter,
        events: Sender<CaptureEvent>,
    ) -> Result<Self> {
        let loudness = if measure_loudness {
            Some(LoudnessReader::new(channels, sample_rate)?)
        } else {
            None
        };
        Ok(Self {
            id,
            channels,
            peak: PeakReader::new(),
            loudness,
            writer,
            events,
            finished: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn analysis(&self) -> Result<AnalysisResult> {
        let frames = self.peak.samples() / self.channels as u64;
        let mut analysis = match &self.loudness {
            Some(reader) => reader.result()?,
            None => AnalysisResult::default(),
        };
        analysis.frames = frames;
        analysis.sample_peak = analysis.sample_peak.max(self.peak.peak() as f64);
        Ok(analysis)
    }

    fn send(&self, event: CaptureEvent) {
        // The receiver only goes away when the graph is being torn down.
        if self.events.send(event).is_err() {
            log::debug!("capture {}: event dropped, builder gone", self.id);
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        let analysis = self.analysis()?;
        let samples = self.writer.samples_written();

        match &mut self.writer {
            CaptureWriter::Sync(writer) => {
                let flushed = writer.finish()?;
                self.send(CaptureEvent::FileWritten {
                    capture: self.id,
                    analysis,
                    samples: flushed,
                });
                self.send(CaptureEvent::FileFlushed { capture: self.id });
            }
            CaptureWriter::Background(writer) => {
                self.events
                    .send(CaptureEvent::FileWritten {
                        capture: self.id,
                        analysis,
                        samples,
                    })
                    .map_err(|_| ExportError::Context("capture: builder gone".into()))?;
                writer.finish();
            }
        }
        log::info!(
            "capture {}: pass one done, {} frames, peak {:.2} dBFS",
            self.id,
            analysis.frames,
            analysis.sample_peak_dbfs()
        );
        Ok(())
    }
}

impl Stage for CaptureStage {
    fn process(&mut self, ctx: ProcessContext<'_>, _out: &mut Outlet<'_>) -> Result<()> {
        check_channels("capture", self.channels, &ctx)?;
        if self.finished {
            return Err(ExportError::Context("capture: data after end of input".into()));
        }
        let data = ctx.f32()?;
        self.peak.process(data);
        if let Some(reader) = &mut self.loudness {
            reader.process(data)?;
        }
        self.writer.write(data)?;

        if ctx.end_of_input() {
            self.finish()?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "capture"
    }
}
