//! The export orchestrator.
//!
//! [`GraphBuilder`] turns [`FileSpec`]s into a tree of stages and drives it:
//!
//! ```text
//! sources -> interleaver -> chunker -> silence -> src -+-> identity ----------------> sfc -> encoder
//!                                                      '-> capture   limiter -> sfc -> encoder
//! ```
//!
//! Every level is shared between specs whose keys match, so two outputs that
//! differ only in their path end up on one encoder that copies its file.
//! Normalized outputs stop at a capture stage during [`process`]; the
//! second pass is pushed from the scratch file through a limiter by
//! [`post_process`].
//!
//! [`process`]: GraphBuilder::process
//! [`post_process`]: GraphBuilder::post_process

use super::levels::{
    find, silence_key, CaptureState, ChannelConfigLevel, EncoderKey, EncoderLevel,
    IntermediateKey, IntermediateLevel, SfcKey, SfcLevel, SilenceLevel, SrcKey, SrcLevel,
};
use super::{NodeArena, NodeId};
use crate::dsp::{limiter_ceiling, normalization_gain};
use crate::error::{ExportError, Result};
use crate::file_spec::FileSpec;
use crate::format::{self, Encoder, FileWrittenCallback, SampleWriter, SharedTargets};
use crate::io::{decode_samples, CaptureWriter, DiskWriter, TmpWriter, CAPTURE_SAMPLE_BYTES};
use crate::node::{
    CaptureEvent, CaptureStage, Chunker, DemoNoiseAdder, Identity, Interleaver, Limiter,
    SampleFormatConverter, SampleRateConverter, SilenceTrimmer, Stage,
};
use crate::options::{BuilderConfig, SampleRateTarget, SilenceOptions};
use bounce_core::{
    AnalysisResult, BufferPool, ChannelConfig, ChannelId, ExportSession, Flags, FreewheelLock,
    ProcessContext, Timespan,
};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// First-pass measurement of one normalized output and the gain applied to it.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct ExportAnalysis {
    pub measured: AnalysisResult,
    /// Linear gain applied in the render pass.
    pub gain: f32,
}

/// Node counts of the current tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub channel_configs: usize,
    pub silence_trimmers: usize,
    pub resamplers: usize,
    pub captures: usize,
    pub limiters: usize,
    pub format_converters: usize,
    pub encoders: usize,
    /// Registered output paths, copies included.
    pub outputs: usize,
}

struct Output {
    path: PathBuf,
    /// Primary path of the encoder that produces this output.
    primary: PathBuf,
    targets: SharedTargets,
}

/// Index of the deepest existing level matching a spec.
#[derive(Debug, Default, Clone, Copy)]
struct Depth {
    channel: Option<usize>,
    silence: Option<usize>,
    src: Option<usize>,
    intermediate: Option<usize>,
    sfc: Option<usize>,
    encoder: Option<usize>,
}

struct Keys {
    silence: SilenceOptions,
    src: SrcKey,
    intermediate: IntermediateKey,
    sfc: SfcKey,
    encoder: EncoderKey,
}

struct NewIntermediate {
    entry: Box<dyn Stage>,
    limiter: Option<Limiter>,
    demo_noise: Option<DemoNoiseAdder>,
    capture: Option<(u64, tempfile::NamedTempFile)>,
}

/// Stages built for one `add_config` call, not yet in the arena.
#[derive(Default)]
struct Pending {
    channel: Option<(Interleaver, Chunker<f32>)>,
    silence: Option<SilenceTrimmer>,
    src: Option<(SampleRateConverter, usize)>,
    intermediate: Option<NewIntermediate>,
    sfc: Option<SampleFormatConverter>,
    writer: Option<Box<dyn SampleWriter>>,
}

/// Assembles and runs the export graph for one export run.
pub struct GraphBuilder {
    session: Arc<dyn ExportSession>,
    config: BuilderConfig,
    arena: NodeArena,
    channel_configs: Vec<ChannelConfigLevel>,
    outputs: Vec<Output>,
    events_tx: Sender<CaptureEvent>,
    events_rx: Receiver<CaptureEvent>,
    freewheel: FreewheelLock,
    on_file_written: Arc<Mutex<Option<FileWrittenCallback>>>,
    timespan: Option<Timespan>,
    /// Smallest source latency, fixed on the first cycle.
    alignment: Option<u64>,
    next_capture: u64,
    read_buffers: HashMap<ChannelId, Vec<f32>>,
    analysis: BTreeMap<PathBuf, ExportAnalysis>,
    pass_bytes: Vec<u8>,
    pass_samples: Vec<f32>,
}

impl std::fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("config", &self.config)
            .field("arena", &self.arena)
            .field("outputs", &self.outputs.iter().map(|o| &o.path).collect::<Vec<_>>())
            .field("timespan", &self.timespan)
            .finish()
    }
}

impl GraphBuilder {
    pub fn new(session: Arc<dyn ExportSession>, config: BuilderConfig) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            session,
            config,
            arena: NodeArena::new(),
            channel_configs: Vec::new(),
            outputs: Vec::new(),
            events_tx,
            events_rx,
            freewheel: FreewheelLock::new(),
            on_file_written: Arc::new(Mutex::new(None)),
            timespan: None,
            alignment: None,
            next_capture: 0,
            read_buffers: HashMap::new(),
            analysis: BTreeMap::new(),
            pass_bytes: Vec::new(),
            pass_samples: Vec::new(),
        }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Timespan used to name outputs added from now on.
    pub fn set_current_timespan(&mut self, timespan: Option<Timespan>) {
        self.timespan = timespan;
    }

    pub fn current_timespan(&self) -> Option<&Timespan> {
        self.timespan.as_ref()
    }

    /// Called once per finished output path, copies included.
    pub fn set_file_written_callback(&mut self, callback: Option<FileWrittenCallback>) {
        *self.on_file_written.lock() = callback;
    }

    /// Measurements of every normalized output whose first pass completed.
    pub fn analysis(&self) -> &BTreeMap<PathBuf, ExportAnalysis> {
        &self.analysis
    }

    /// The freewheel lock handed to render passes.
    pub fn freewheel_lock(&self) -> &FreewheelLock {
        &self.freewheel
    }

    /// Every registered output path, in registration order.
    pub fn output_paths(&self) -> impl Iterator<Item = &Path> {
        self.outputs.iter().map(|o| o.path.as_path())
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            channel_configs: self.channel_configs.len(),
            silence_trimmers: self.arena.count("silence_trimmer"),
            resamplers: self.arena.count("sample_rate_converter"),
            captures: self.arena.count("capture"),
            limiters: self.arena.count("limiter"),
            format_converters: self.arena.count("sample_format_converter"),
            encoders: self.arena.count("encoder"),
            outputs: self.outputs.len(),
        }
    }

    /// Register one output.
    ///
    /// A split channel configuration registers one mono output per channel.
    /// Errors name the output that failed and leave outputs registered
    /// earlier untouched.
    pub fn add_config(&mut self, spec: FileSpec, realtime: bool) -> Result<()> {
        if spec.channel_config.channel_count() == 0 {
            let path = spec.output_path(self.timespan.as_ref());
            return Err(ExportError::InvalidConfig(
                "channel configuration has no channels".into(),
            )
            .for_output(path));
        }
        if !spec.channel_config.split() {
            return self.add_single(spec, realtime);
        }

        let config = spec.channel_config.clone();
        for (index, channel) in config.channels().iter().enumerate() {
            let mut mono = spec.clone();
            mono.channel_config = ChannelConfig::new()
                .with_channel(Arc::clone(channel))
                .with_region_export(config.region_export());
            mono.channel_index = Some(index);
            self.add_single(mono, realtime)?;
        }
        Ok(())
    }

    fn add_single(&mut self, mut spec: FileSpec, realtime: bool) -> Result<()> {
        let session_rate = self.session.nominal_sample_rate();
        let rate = spec.format.sample_rate.resolve(session_rate);
        spec.format.sample_rate = SampleRateTarget::Hz(rate);

        let path = spec.output_path(self.timespan.as_ref());
        self.register(&spec, session_rate, rate, &path, realtime)
            .map_err(|e| e.for_output(&path))
    }

    fn keys(spec: &FileSpec, session_rate: u32, rate: u32) -> Keys {
        Keys {
            silence: silence_key(spec),
            src: SrcKey::new(session_rate, rate, spec.format.src_quality),
            intermediate: IntermediateKey::from_spec(spec),
            sfc: SfcKey::from_spec(spec),
            encoder: EncoderKey::from_spec(spec),
        }
    }

    fn depth(&self, spec: &FileSpec, keys: &Keys) -> Depth {
        let mut depth = Depth::default();
        let Some(c) = find(&self.channel_configs, &spec.channel_config) else {
            return depth;
        };
        depth.channel = Some(c);
        let channel = &self.channel_configs[c];

        let Some(s) = find(&channel.silence, &keys.silence) else {
            return depth;
        };
        depth.silence = Some(s);
        let silence = &channel.silence[s];

        let Some(r) = find(&silence.srcs, &keys.src) else {
            return depth;
        };
        depth.src = Some(r);
        let src = &silence.srcs[r];

        let Some(i) = find(&src.intermediates, &keys.intermediate) else {
            return depth;
        };
        depth.intermediate = Some(i);
        let intermediate = &src.intermediates[i];

        let Some(f) = find(&intermediate.sfcs, &keys.sfc) else {
            return depth;
        };
        depth.sfc = Some(f);
        depth.encoder = find(&intermediate.sfcs[f].encoders, &keys.encoder);
        depth
    }

    fn register(
        &mut self,
        spec: &FileSpec,
        session_rate: u32,
        rate: u32,
        path: &Path,
        realtime: bool,
    ) -> Result<()> {
        if rate == 0 {
            return Err(ExportError::InvalidConfig("sample rate of 0 Hz".into()));
        }
        if self.outputs.iter().any(|o| o.path == path) {
            return Err(ExportError::InvalidConfig(format!(
                "{} is already registered",
                path.display()
            )));
        }
        if path.exists() {
            return Err(ExportError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        format::validate(&spec.format)?;
        format::validate_metadata(spec.format.format, &spec.metadata)?;

        let keys = Self::keys(spec, session_rate, rate);
        let depth = self.depth(spec, &keys);

        if depth.encoder.is_some() {
            return self.attach_copy(&depth, path);
        }

        let pending = self.prepare(spec, &keys, &depth, session_rate, rate, path, realtime)?;
        self.commit(spec, keys, depth, pending, rate, path)
    }

    /// Reuse an equivalent encoder; its file is copied to `path` when done.
    fn attach_copy(&mut self, depth: &Depth, path: &Path) -> Result<()> {
        let encoder = self.encoder_level(depth)?;
        let primary = encoder.path.clone();
        let targets = Arc::clone(&encoder.targets);
        {
            let mut t = targets.lock();
            if t.finalized {
                return Err(ExportError::InvalidConfig(format!(
                    "{} is already finalized",
                    primary.display()
                )));
            }
            t.extra_paths.push(path.to_path_buf());
        }
        log::debug!("{} shares the encoder of {}", path.display(), primary.display());
        self.outputs.push(Output {
            path: path.to_path_buf(),
            primary,
            targets,
        });
        Ok(())
    }

    fn encoder_level(&self, depth: &Depth) -> Result<&EncoderLevel> {
        let missing = || ExportError::Context("graph level vanished".into());
        let (c, s, r, i, f, e) = (
            depth.channel.ok_or_else(missing)?,
            depth.silence.ok_or_else(missing)?,
            depth.src.ok_or_else(missing)?,
            depth.intermediate.ok_or_else(missing)?,
            depth.sfc.ok_or_else(missing)?,
            depth.encoder.ok_or_else(missing)?,
        );
        Ok(&self.channel_configs[c].silence[s].srcs[r].intermediates[i].sfcs[f].encoders[e])
    }

    /// Build every stage this spec needs that does not exist yet.
    ///
    /// Nothing is inserted into the arena here, so a failure leaves the
    /// graph as it was. The output file is opened last.
    #[allow(clippy::too_many_arguments)]
    fn prepare(
        &self,
        spec: &FileSpec,
        keys: &Keys,
        depth: &Depth,
        session_rate: u32,
        rate: u32,
        path: &Path,
        realtime: bool,
    ) -> Result<Pending> {
        let channels = spec.channel_config.channel_count();
        let pool = self.session.buffer_pool();
        let max_frames = self.config.max_frames;
        let mut pending = Pending::default();

        if depth.channel.is_none() {
            pending.channel = Some((
                Interleaver::new(channels, max_frames)?,
                Chunker::new(max_frames * channels, channels)?,
            ));
        }

        if depth.silence.is_none() {
            let options = &keys.silence;
            let mut trimmer = SilenceTrimmer::new(channels, pool.silent(channels))?;
            trimmer.set_threshold(options.threshold_db);
            trimmer.set_trim_beginning(options.trim_beginning);
            trimmer.set_trim_end(options.trim_end);
            trimmer.add_silence_to_beginning(duration_frames(options.pad_beginning, session_rate));
            trimmer.add_silence_to_end(duration_frames(options.pad_end, session_rate));
            pending.silence = Some(trimmer);
        }

        let max_samples_out = match depth.src.and_then(|_| self.src_level(depth)) {
            Some(level) => level.max_samples_out,
            None => {
                let mut src =
                    SampleRateConverter::new(channels, session_rate, rate, spec.format.src_quality)?;
                let max_in = max_frames.max(pool.frames()) * channels;
                let max_out = src.allocate_buffers(max_in);
                pending.src = Some((src, max_out));
                max_out
            }
        };

        if depth.intermediate.is_none() {
            pending.intermediate = Some(self.prepare_intermediate(
                spec,
                keys,
                channels,
                rate,
                max_samples_out,
                realtime,
            )?);
        }

        if depth.sfc.is_none() {
            let mut sfc = SampleFormatConverter::new(channels)?;
            let max = max_samples_out.max(self.config.post_process_frames * channels);
            sfc.init(max, keys.sfc.dither, keys.sfc.sample_format);
            sfc.set_clip_floats(keys.sfc.clip_floats);
            pending.sfc = Some(sfc);
        }

        pending.writer = Some(format::open_writer(
            &spec.format,
            path,
            channels,
            rate,
            &spec.metadata,
        )?);
        Ok(pending)
    }

    fn src_level(&self, depth: &Depth) -> Option<&SrcLevel> {
        let channel = self.channel_configs.get(depth.channel?)?;
        channel.silence.get(depth.silence?)?.srcs.get(depth.src?)
    }

    fn prepare_intermediate(
        &self,
        spec: &FileSpec,
        keys: &Keys,
        channels: usize,
        rate: u32,
        max_samples_out: usize,
        realtime: bool,
    ) -> Result<NewIntermediate> {
        let demo_noise = keys
            .intermediate
            .demo_noise
            .as_ref()
            .map(|noise| DemoNoiseAdder::new(channels, rate, noise))
            .transpose()?;

        let normalization = keys.intermediate.normalization;
        if !normalization.is_enabled() {
            return Ok(NewIntermediate {
                entry: Box::new(Identity),
                limiter: None,
                demo_noise,
                capture: None,
            });
        }

        let id = self.next_capture;
        let mut scratch = tempfile::Builder::new();
        scratch.prefix("bounce-capture-").suffix(".f32");
        let scratch = match &self.config.temp_dir {
            Some(dir) => scratch.tempfile_in(dir)?,
            None => scratch.tempfile()?,
        };
        let file = scratch.as_file().try_clone()?;

        let writer = if realtime {
            let capacity = ((self.config.ring_buffer_seconds.max(0.0) * rate as f32) as usize
                * channels)
                .max(2 * max_samples_out);
            let events = self.events_tx.clone();
            CaptureWriter::Background(DiskWriter::spawn(
                file,
                capacity,
                Box::new(move |result: Result<u64>| {
                    let event = match result {
                        Ok(_) => CaptureEvent::FileFlushed { capture: id },
                        Err(e) => CaptureEvent::Failed {
                            capture: id,
                            error: e.to_string(),
                        },
                    };
                    if events.send(event).is_err() {
                        log::debug!("capture {id}: builder gone before the writer finished");
                    }
                }),
            )?)
        } else {
            CaptureWriter::Sync(TmpWriter::new(file))
        };

        let measure_loudness =
            normalization.loudness_lufs.is_some() || normalization.true_peak_limit_dbtp.is_some();
        let capture = CaptureStage::new(
            id,
            channels,
            rate,
            measure_loudness,
            writer,
            self.events_tx.clone(),
        )?;
        log::debug!(
            "capture {id} for {} spills to {}",
            spec.output_path(self.timespan.as_ref()).display(),
            scratch.path().display()
        );

        Ok(NewIntermediate {
            entry: Box::new(capture),
            limiter: Some(Limiter::unity(channels, rate)),
            demo_noise,
            capture: Some((id, scratch)),
        })
    }

    /// Insert prepared stages and wire them below the matched levels.
    fn commit(
        &mut self,
        spec: &FileSpec,
        keys: Keys,
        depth: Depth,
        pending: Pending,
        rate: u32,
        path: &Path,
    ) -> Result<()> {
        let unprepared =
            |level: &str| ExportError::Context(format!("no {level} stage prepared for a new level"));
        let channels = spec.channel_config.channel_count();
        let Self {
            arena,
            channel_configs,
            outputs,
            on_file_written,
            next_capture,
            ..
        } = self;

        let c = match (depth.channel, pending.channel) {
            (Some(c), _) => c,
            (None, Some((interleaver, chunker))) => {
                let chunker = arena.insert(chunker);
                channel_configs.push(ChannelConfigLevel {
                    config: spec.channel_config.clone(),
                    interleaver,
                    chunker,
                    silence: Vec::new(),
                });
                log::debug!("new channel configuration {:?}", spec.channel_config);
                channel_configs.len() - 1
            }
            (None, None) => return Err(unprepared("chunker")),
        };
        let channel = &mut channel_configs[c];

        let s = match (depth.silence, pending.silence) {
            (Some(s), _) => s,
            (None, Some(trimmer)) => {
                let node = arena.insert(trimmer);
                connect(arena, channel.chunker, node)?;
                channel.silence.push(SilenceLevel {
                    key: keys.silence,
                    node,
                    srcs: Vec::new(),
                });
                channel.silence.len() - 1
            }
            (None, None) => return Err(unprepared("silence")),
        };
        let silence = &mut channel.silence[s];

        let r = match (depth.src, pending.src) {
            (Some(r), _) => r,
            (None, Some((src, max_samples_out))) => {
                let node = arena.insert(src);
                connect(arena, silence.node, node)?;
                silence.srcs.push(SrcLevel {
                    key: keys.src,
                    node,
                    max_samples_out,
                    intermediates: Vec::new(),
                });
                silence.srcs.len() - 1
            }
            (None, None) => return Err(unprepared("converter")),
        };
        let src = &mut silence.srcs[r];

        let i = match (depth.intermediate, pending.intermediate) {
            (Some(i), _) => i,
            (None, Some(new)) => {
                let entry = arena.insert_boxed(new.entry);
                connect(arena, src.node, entry)?;

                let (fan_out, capture) = match (new.limiter, new.capture) {
                    (Some(limiter), Some((id, scratch))) => {
                        let limiter = arena.insert(limiter);
                        *next_capture = id + 1;
                        let state = CaptureState {
                            id,
                            scratch: Some(scratch),
                            limiter,
                            channels,
                            sample_rate: rate,
                            written: None,
                            reader: None,
                            samples_read: 0,
                            done: false,
                        };
                        (limiter, Some(state))
                    }
                    _ => (entry, None),
                };
                let fan_out = match new.demo_noise {
                    Some(noise) => {
                        let node = arena.insert(noise);
                        connect(arena, fan_out, node)?;
                        node
                    }
                    None => fan_out,
                };
                src.intermediates.push(IntermediateLevel {
                    key: keys.intermediate,
                    entry,
                    fan_out,
                    capture,
                    sfcs: Vec::new(),
                });
                src.intermediates.len() - 1
            }
            (None, None) => return Err(unprepared("intermediate")),
        };
        let intermediate = &mut src.intermediates[i];

        let f = match (depth.sfc, pending.sfc) {
            (Some(f), _) => f,
            (None, Some(sfc)) => {
                let node = arena.insert(sfc);
                connect(arena, intermediate.fan_out, node)?;
                intermediate.sfcs.push(SfcLevel {
                    key: keys.sfc,
                    node,
                    encoders: Vec::new(),
                });
                intermediate.sfcs.len() - 1
            }
            (None, None) => return Err(unprepared("format converter")),
        };
        let sfc = &mut intermediate.sfcs[f];

        let writer = pending.writer.ok_or_else(|| unprepared("encoder"))?;
        let targets = SharedTargets::default();
        let slot = Arc::clone(on_file_written);
        let callback: FileWrittenCallback = Arc::new(move |written: &Path| {
            let callback = slot.lock().clone();
            if let Some(callback) = callback {
                callback(written);
            }
        });
        let node = arena.insert(Encoder::new(
            channels,
            path.to_path_buf(),
            writer,
            Arc::clone(&targets),
            Some(callback),
        ));
        connect(arena, sfc.node, node)?;
        sfc.encoders.push(EncoderLevel {
            key: keys.encoder,
            node,
            path: path.to_path_buf(),
            targets: Arc::clone(&targets),
        });
        outputs.push(Output {
            path: path.to_path_buf(),
            primary: path.to_path_buf(),
            targets,
        });
        log::debug!("registered {}", path.display());
        Ok(())
    }

    /// Run one cycle of `frames` frames from every source.
    ///
    /// Returns the frames that reached the graph, which is zero while the
    /// session is still inside its latency preroll. `last` marks the final
    /// cycle; its block carries end of input even when it is empty.
    pub fn process(&mut self, frames: usize, last: bool) -> Result<usize> {
        if frames > self.config.max_frames {
            return Err(ExportError::Context(format!(
                "{frames} frames exceed the {} frame cycle budget",
                self.config.max_frames
            )));
        }

        let alignment = match self.alignment {
            Some(alignment) => alignment,
            None => {
                let alignment = self
                    .channel_configs
                    .iter()
                    .flat_map(|level| level.config.channels())
                    .map(|channel| channel.latency())
                    .min()
                    .unwrap_or(0);
                self.alignment = Some(alignment);
                alignment
            }
        };
        let preroll = self.session.remaining_latency_preroll();
        let skip = (preroll.saturating_sub(alignment) as usize).min(frames);

        let Self {
            channel_configs,
            read_buffers,
            arena,
            session,
            ..
        } = self;

        read_sources(&channel_configs[..], read_buffers, session.buffer_pool(), frames);

        // Region exports start at the region's first frame, preroll or not.
        let level_skip = |level: &ChannelConfigLevel| {
            if level.config.region_export() {
                0
            } else {
                skip
            }
        };
        if !last && channel_configs.iter().all(|level| level_skip(level) == frames) {
            return Ok(0);
        }

        let flags = if last { Flags::END_OF_INPUT } else { Flags::NONE };
        let mut pushed = 0;
        for level in channel_configs.iter_mut() {
            let skip = level_skip(level);
            let mut inputs = Vec::with_capacity(level.config.channel_count());
            for channel in level.config.channels() {
                let buffer = read_buffers.get(&channel.id()).ok_or_else(|| {
                    ExportError::Context(format!("no buffer for channel {:?}", channel.id()))
                })?;
                inputs.push(&buffer[skip..frames]);
            }
            let ctx = level.interleaver.interleave(&inputs, flags)?;
            arena.push(level.chunker, ctx)?;
            pushed = pushed.max(frames - skip);
        }
        Ok(pushed)
    }

    /// Advance the render pass of finished captures by one chunk each.
    ///
    /// Only one capture renders at a time; it holds the freewheel lock
    /// (and with it the engine's offline mode) until its scratch file is
    /// exhausted. Returns `true` once every capture is done.
    pub fn post_process(&mut self) -> Result<bool> {
        self.drain_events()?;

        let engine = self.session.engine_mode();
        let chunk_frames = self.config.post_process_frames.max(1);
        let Self {
            channel_configs,
            arena,
            freewheel,
            pass_bytes,
            pass_samples,
            ..
        } = self;

        let mut all_done = true;
        for intermediate in intermediates_mut(channel_configs) {
            let Some(capture) = intermediate.capture.as_mut() else {
                continue;
            };
            if capture.done {
                continue;
            }
            if capture.written.is_none() || capture.reader.is_none() {
                all_done = false;
                continue;
            }
            if !freewheel.try_acquire(capture.id, engine.as_deref())? {
                all_done = false;
                continue;
            }

            render_step(arena, capture, pass_bytes, pass_samples, chunk_frames)?;
            if capture.done {
                log::info!("capture {}: render pass done", capture.id);
                freewheel.release(capture.id, engine.as_deref())?;
            } else {
                all_done = false;
            }
        }
        Ok(all_done)
    }

    fn drain_events(&mut self) -> Result<()> {
        while let Ok(event) = self.events_rx.try_recv() {
            let id = event.capture();
            let Some(intermediate) = intermediates_mut(&mut self.channel_configs)
                .find(|i| i.capture.as_ref().is_some_and(|c| c.id == id))
            else {
                log::debug!("event for unknown capture {id} ignored");
                continue;
            };
            let normalization = intermediate.key.normalization;
            let paths = intermediate.output_paths();
            let Some(capture) = intermediate.capture.as_mut() else {
                continue;
            };

            match event {
                CaptureEvent::FileWritten {
                    analysis, samples, ..
                } => {
                    let gain = normalization_gain(&normalization, &analysis);
                    let ceiling = limiter_ceiling(&normalization);
                    let limiter = Limiter::new(capture.channels, capture.sample_rate, gain, ceiling);
                    self.arena.replace(capture.limiter, Box::new(limiter))?;
                    capture.written = Some((analysis, samples));
                    log::info!(
                        "capture {id}: gain {gain:.4}, ceiling {ceiling:.4}, {samples} samples to render"
                    );
                    for path in paths {
                        self.analysis.insert(
                            path,
                            ExportAnalysis {
                                measured: analysis,
                                gain,
                            },
                        );
                    }
                }
                CaptureEvent::FileFlushed { .. } => {
                    let scratch = capture.scratch.as_ref().ok_or_else(|| {
                        ExportError::Context(format!("capture {id}: scratch file already removed"))
                    })?;
                    capture.reader = Some(BufReader::new(scratch.reopen()?));
                }
                CaptureEvent::Failed { error, .. } => {
                    return Err(ExportError::Io(io::Error::other(format!(
                        "capture {id}: {error}"
                    ))));
                }
            }
        }
        Ok(())
    }

    /// Drop every stage and forget all outputs.
    ///
    /// With `remove_files`, outputs whose encoder never finished are deleted
    /// along with their copies. Finished files always stay.
    pub fn cleanup(&mut self, remove_files: bool) {
        // Stages first: writers close their files and transcoders are killed.
        self.arena.clear();
        self.channel_configs.clear();

        if let Some(owner) = self.freewheel.holder() {
            let engine = self.session.engine_mode();
            if let Err(e) = self.freewheel.release(owner, engine.as_deref()) {
                log::warn!("could not leave offline mode: {e}");
            }
        }

        for output in self.outputs.drain(..) {
            if !remove_files || output.targets.lock().finalized {
                continue;
            }
            if output.path.exists() {
                match fs::remove_file(&output.path) {
                    Ok(()) => log::info!(
                        "removed unfinished {} (encoded as {})",
                        output.path.display(),
                        output.primary.display()
                    ),
                    Err(e) => log::warn!("could not remove {}: {e}", output.path.display()),
                }
            }
        }
        self.alignment = None;
        let pool = self.session.buffer_pool();
        for (_, buffer) in self.read_buffers.drain() {
            pool.give_back(1, buffer);
        }
    }

    /// Tear down the graph and start a fresh run.
    pub fn reset(&mut self) {
        self.cleanup(false);
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        self.events_tx = events_tx;
        self.events_rx = events_rx;
        self.analysis.clear();
        self.timespan = None;
    }
}

impl Drop for GraphBuilder {
    fn drop(&mut self) {
        if let Some(owner) = self.freewheel.holder() {
            let engine = self.session.engine_mode();
            let _ = self.freewheel.release(owner, engine.as_deref());
        }
    }
}

fn connect(arena: &mut NodeArena, from: NodeId, to: NodeId) -> Result<()> {
    arena.connect(from, to).map_err(|e| {
        log::error!("graph wiring failed: {e}");
        e
    })
}

fn duration_frames(duration: Duration, rate: u32) -> u64 {
    (duration.as_secs_f64() * rate as f64).round() as u64
}

fn intermediates_mut(
    levels: &mut [ChannelConfigLevel],
) -> impl Iterator<Item = &mut IntermediateLevel> {
    levels
        .iter_mut()
        .flat_map(|c| c.silence.iter_mut())
        .flat_map(|s| s.srcs.iter_mut())
        .flat_map(|r| r.intermediates.iter_mut())
}

/// Fill one buffer per distinct source, zero-padding short reads.
fn read_sources(
    levels: &[ChannelConfigLevel],
    buffers: &mut HashMap<ChannelId, Vec<f32>>,
    pool: &BufferPool,
    frames: usize,
) {
    let mut seen = Vec::new();
    for channel in levels.iter().flat_map(|l| l.config.channels()) {
        let id = channel.id();
        if seen.contains(&id) {
            continue;
        }
        seen.push(id);
        let buffer = buffers.entry(id).or_insert_with(|| pool.take_scratch(1));
        buffer.resize(frames, 0.0);
        let read = channel.read(buffer).min(frames);
        buffer[read..].fill(0.0);
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Push the next chunk of a capture's scratch file into its limiter.
///
/// A short read ends the stream for this capture only.
fn render_step(
    arena: &mut NodeArena,
    capture: &mut CaptureState,
    bytes: &mut Vec<u8>,
    samples: &mut Vec<f32>,
    chunk_frames: usize,
) -> Result<()> {
    let (Some(total), Some(reader)) = (capture.total_samples(), capture.reader.as_mut()) else {
        return Ok(());
    };
    let channels = capture.channels;
    let remaining = total.saturating_sub(capture.samples_read);
    let want = remaining.min((chunk_frames * channels) as u64) as usize;

    bytes.resize(want * CAPTURE_SAMPLE_BYTES, 0);
    let got = match read_up_to(reader, bytes) {
        Ok(got) => got,
        Err(e) => {
            log::warn!("capture {}: read failed, ending stream: {e}", capture.id);
            0
        }
    };
    let whole = got / (CAPTURE_SAMPLE_BYTES * channels) * channels;
    decode_samples(&bytes[..whole * CAPTURE_SAMPLE_BYTES], samples);
    capture.samples_read += whole as u64;

    let short = whole < want;
    if short {
        log::warn!(
            "capture {}: short read, {} of {total} samples recovered",
            capture.id,
            capture.samples_read
        );
    }
    let end = short || capture.samples_read >= total;
    let flags = if end { Flags::END_OF_INPUT } else { Flags::NONE };

    let ctx = ProcessContext::from_slice_mut(&mut samples[..], channels)?.with_flags(flags);
    arena.push(capture.limiter, ctx)?;

    if end {
        capture.done = true;
        capture.reader = None;
        capture.scratch = None;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{DitherType, FormatId, FormatSpec, Normalization, SampleFormat};
    use bounce_core::{ExportChannel, StaticSession};

    struct Source {
        id: u64,
        data: Vec<f32>,
        pos: Mutex<usize>,
    }

    impl Source {
        fn new(id: u64, data: Vec<f32>) -> Arc<Self> {
            Arc::new(Self {
                id,
                data,
                pos: Mutex::new(0),
            })
        }
    }

    impl ExportChannel for Source {
        fn id(&self) -> ChannelId {
            ChannelId(self.id)
        }

        fn read(&self, out: &mut [f32]) -> usize {
            let mut pos = self.pos.lock();
            let n = out.len().min(self.data.len() - *pos);
            out[..n].copy_from_slice(&self.data[*pos..*pos + n]);
            *pos += n;
            n
        }
    }

    fn session() -> Arc<StaticSession> {
        Arc::new(StaticSession::new(48_000, 256).unwrap())
    }

    fn builder(session: &Arc<StaticSession>, dir: &Path) -> GraphBuilder {
        let session: Arc<dyn ExportSession> = session.clone();
        GraphBuilder::new(
            session,
            BuilderConfig::default().with_max_frames(256).with_temp_dir(dir),
        )
    }

    fn float_wav() -> FormatSpec {
        FormatSpec::new(FormatId::Wav).with_sample_format(SampleFormat::Float32)
    }

    fn spec(config: &ChannelConfig, format: FormatSpec, path: PathBuf) -> FileSpec {
        FileSpec::new(config.clone(), format, Arc::new(path))
    }

    fn read_wav(path: &Path) -> Vec<f32> {
        hound::WavReader::open(path)
            .unwrap()
            .samples::<f32>()
            .map(|s| s.unwrap())
            .collect()
    }

    fn run(builder: &mut GraphBuilder, frames: usize) {
        let mut left = frames;
        while left > 256 {
            builder.process(256, false).unwrap();
            left -= 256;
        }
        builder.process(left, true).unwrap();
        for _ in 0..1000 {
            if builder.post_process().unwrap() {
                return;
            }
        }
        panic!("render pass did not finish");
    }

    #[test]
    fn test_equivalent_specs_share_one_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let mut builder = builder(&session, dir.path());
        let config = ChannelConfig::new().with_channel(Source::new(1, vec![0.25; 600]));

        let written = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&written);
        builder.set_file_written_callback(Some(Arc::new(move |p: &Path| {
            log.lock().push(p.to_path_buf())
        })));

        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        builder.add_config(spec(&config, float_wav(), a.clone()), false).unwrap();
        builder.add_config(spec(&config, float_wav(), b.clone()), false).unwrap();

        let stats = builder.stats();
        assert_eq!(stats.channel_configs, 1);
        assert_eq!(stats.silence_trimmers, 1);
        assert_eq!(stats.resamplers, 1);
        assert_eq!(stats.encoders, 1);
        assert_eq!(stats.outputs, 2);

        run(&mut builder, 600);
        assert_eq!(*written.lock(), vec![a.clone(), b.clone()]);
        assert_eq!(read_wav(&a), vec![0.25; 600]);
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }

    #[test]
    fn test_peak_normalization_renders_second_pass() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let mut builder = builder(&session, dir.path());
        let config = ChannelConfig::new().with_channel(Source::new(1, vec![0.5; 1000]));
        let out = dir.path().join("loud.wav");
        builder
            .add_config(
                spec(&config, float_wav().with_normalization(Normalization::peak(0.0)), out.clone()),
                false,
            )
            .unwrap();
        assert_eq!(builder.stats().captures, 1);
        assert_eq!(builder.stats().limiters, 1);

        builder.process(256, false).unwrap();
        assert!(!builder.post_process().unwrap());
        assert!(builder.analysis().is_empty());

        run(&mut builder, 744);
        assert_eq!(read_wav(&out), vec![1.0; 1000]);

        let analysis = builder.analysis()[&out];
        assert_eq!(analysis.gain, 2.0);
        assert_eq!(analysis.measured.frames, 1000);
        assert!(builder.freewheel_lock().holder().is_none());
    }

    #[test]
    fn test_split_config_registers_one_output_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let mut builder = builder(&session, dir.path());
        let config = ChannelConfig::new()
            .with_channel(Source::new(1, vec![0.1; 100]))
            .with_channel(Source::new(2, vec![-0.2; 100]))
            .with_split(true);

        builder
            .add_config(spec(&config, float_wav(), dir.path().join("mix.wav")), false)
            .unwrap();
        let stats = builder.stats();
        assert_eq!(stats.channel_configs, 2);
        assert_eq!(stats.silence_trimmers, 2);
        assert_eq!(stats.encoders, 2);

        run(&mut builder, 100);
        assert_eq!(read_wav(&dir.path().join("mix-1.wav")), vec![0.1; 100]);
        assert_eq!(read_wav(&dir.path().join("mix-2.wav")), vec![-0.2; 100]);
    }

    #[test]
    fn test_preroll_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let mut builder = builder(&session, dir.path());
        let ramp: Vec<f32> = (0..48).map(|i| i as f32 / 64.0).collect();
        let config = ChannelConfig::new().with_channel(Source::new(1, ramp.clone()));
        let out = dir.path().join("ramp.wav");
        builder.add_config(spec(&config, float_wav(), out.clone()), false).unwrap();

        session.set_remaining_latency_preroll(20);
        assert_eq!(builder.process(16, false).unwrap(), 0);
        session.set_remaining_latency_preroll(4);
        assert_eq!(builder.process(16, false).unwrap(), 12);
        session.set_remaining_latency_preroll(0);
        assert_eq!(builder.process(16, true).unwrap(), 16);

        assert_eq!(read_wav(&out), ramp[20..].to_vec());
    }

    #[test]
    fn test_failed_output_leaves_graph_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let mut builder = builder(&session, dir.path());
        let config = ChannelConfig::new().with_channel(Source::new(1, vec![0.0; 10]));
        builder
            .add_config(spec(&config, float_wav(), dir.path().join("ok.wav")), false)
            .unwrap();
        let before = builder.stats();

        let taken = dir.path().join("taken.wav");
        std::fs::write(&taken, b"x").unwrap();
        let err = builder
            .add_config(spec(&config, float_wav(), taken), false)
            .unwrap_err();
        assert!(err.to_string().contains("taken.wav"), "{err}");

        let flac_float = FormatSpec::new(FormatId::Flac).with_sample_format(SampleFormat::Float32);
        let err = builder
            .add_config(spec(&config, flac_float, dir.path().join("bad.flac")), false)
            .unwrap_err();
        assert!(matches!(err, ExportError::Output { .. }));

        let tagged = spec(&config, float_wav(), dir.path().join("tagged.wav"))
            .with_metadata("artist", "nobody");
        assert!(builder.add_config(tagged, false).is_err());
        assert!(!dir.path().join("tagged.wav").exists());
        assert_eq!(builder.stats(), before);
    }

    #[test]
    fn test_cleanup_removes_unfinished_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let mut builder = builder(&session, dir.path());
        let config = ChannelConfig::new().with_channel(Source::new(1, vec![0.3; 64]));
        let out = dir.path().join("partial.raw");
        let raw = FormatSpec::new(FormatId::Raw)
            .with_sample_format(SampleFormat::Int16)
            .with_dither(DitherType::None);
        builder.add_config(spec(&config, raw, out.clone()), false).unwrap();

        builder.process(32, false).unwrap();
        assert!(out.exists());
        builder.cleanup(true);
        assert!(!out.exists());
        assert_eq!(builder.stats(), GraphStats::default());
    }

    #[test]
    fn test_cleanup_returns_read_buffers_to_pool() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let mut builder = builder(&session, dir.path());
        let config = ChannelConfig::new().with_channel(Source::new(1, vec![0.5; 64]));
        builder
            .add_config(spec(&config, float_wav(), dir.path().join("pool.wav")), false)
            .unwrap();

        builder.process(64, true).unwrap();
        builder.cleanup(false);

        let reused = session.buffer_pool().take_scratch(1);
        assert_eq!(reused.len(), 256);
        assert_eq!(&reused[..64], &[0.5; 64][..]);
    }

    #[test]
    fn test_commit_without_prepared_stages_fails() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let mut builder = builder(&session, dir.path());
        let config = ChannelConfig::new().with_channel(Source::new(1, vec![0.0; 10]));
        let out = dir.path().join("never.wav");
        let spec = spec(&config, float_wav(), out.clone());
        let keys = GraphBuilder::keys(&spec, 48_000, 48_000);

        let err = builder
            .commit(&spec, keys, Depth::default(), Pending::default(), 48_000, &out)
            .unwrap_err();
        assert!(matches!(err, ExportError::Context(_)), "{err}");
        assert_eq!(builder.stats(), GraphStats::default());
    }

    #[test]
    fn test_cycle_over_budget_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let mut builder = builder(&session, dir.path());
        assert!(matches!(
            builder.process(257, false),
            Err(ExportError::Context(_))
        ));
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let session = session();
        let mut builder = builder(&session, dir.path());
        let config = ChannelConfig::new().with_channel(Source::new(1, vec![0.0; 10]));
        let out = dir.path().join("once.wav");
        builder.add_config(spec(&config, float_wav(), out.clone()), false).unwrap();
        assert!(builder.add_config(spec(&config, float_wav(), out), false).is_err());
        assert_eq!(builder.stats().outputs, 1);
    }
}
