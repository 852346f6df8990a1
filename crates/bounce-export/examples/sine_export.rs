//! Bounce a stereo sine to a 16-bit WAV and a loudness-normalized copy.

use bounce_core::{ChannelConfig, ChannelId, ExportChannel, StaticSession};
use bounce_export::{
    BuilderConfig, DitherType, FileSpec, FormatId, FormatSpec, GraphBuilder, Normalization,
    SampleFormat,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Sine {
    id: u64,
    freq: f32,
    sample_rate: f32,
    length: usize,
    pos: AtomicUsize,
}

impl ExportChannel for Sine {
    fn id(&self) -> ChannelId {
        ChannelId(self.id)
    }

    fn read(&self, out: &mut [f32]) -> usize {
        let start = self.pos.load(Ordering::Relaxed);
        let n = out.len().min(self.length - start);
        for (i, sample) in out[..n].iter_mut().enumerate() {
            let t = (start + i) as f32 / self.sample_rate;
            *sample = 0.25 * (2.0 * std::f32::consts::PI * self.freq * t).sin();
        }
        self.pos.store(start + n, Ordering::Relaxed);
        n
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sample_rate = 44_100;
    let block = 1024;
    let length = sample_rate as usize;

    let session = Arc::new(StaticSession::new(sample_rate, block)?);
    let mut graph = GraphBuilder::new(session, BuilderConfig::default().with_max_frames(block));
    graph.set_file_written_callback(Some(Arc::new(|path: &std::path::Path| {
        println!("Exported {}", path.display())
    })));

    let channel = |id, freq| -> Arc<dyn ExportChannel> {
        Arc::new(Sine {
            id,
            freq,
            sample_rate: sample_rate as f32,
            length,
            pos: AtomicUsize::new(0),
        })
    };
    let config = ChannelConfig::new()
        .with_channel(channel(0, 440.0))
        .with_channel(channel(1, 660.0));

    let pcm = FormatSpec::new(FormatId::Wav)
        .with_sample_format(SampleFormat::Int16)
        .with_dither(DitherType::Triangular);
    graph.add_config(
        FileSpec::new(config.clone(), pcm.clone(), Arc::new(PathBuf::from("sine.wav"))),
        false,
    )?;
    graph.add_config(
        FileSpec::new(
            config,
            pcm.with_normalization(Normalization::lufs(-16.0)),
            Arc::new(PathBuf::from("sine-loud.wav")),
        ),
        false,
    )?;

    let mut remaining = length;
    while remaining > 0 {
        let frames = remaining.min(block);
        remaining -= frames;
        graph.process(frames, remaining == 0)?;
    }
    while !graph.post_process()? {}

    for (path, analysis) in graph.analysis() {
        println!(
            "{}: {:.1} LUFS measured, gain {:.2}",
            path.display(),
            analysis.measured.integrated_lufs,
            analysis.gain
        );
    }
    Ok(())
}
