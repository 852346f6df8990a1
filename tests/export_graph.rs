//! Export graph integration tests
//!
//! End-to-end runs through the graph builder: sharing of equivalent
//! stages, two-pass normalization, channel splits, resampling and
//! silence trimming, with the written files read back.
//!
//! Run with:
//! ```bash
//! cargo test -p bounce --test export_graph
//! ```

mod helpers;

use approx::assert_relative_eq;
use bounce::core::analyze_loudness;
use bounce::prelude::*;
use helpers::tolerances::*;
use helpers::*;

fn float_wav() -> FormatSpec {
    FormatSpec::new(FormatId::Wav).with_sample_format(SampleFormat::Float32)
}

/// Two specs that differ only in their filename share every stage.
#[test]
fn test_equivalent_outputs_share_stages() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());
    let written = record_written(&mut graph);

    let config = ChannelConfig::new().with_channel(TestChannel::new(1, generate_sine(440.0, 0.3, 4000)));
    let format = float_wav()
        .with_sample_rate(SampleRateTarget::Hz(44_100))
        .with_normalization(Normalization::peak(-1.0));
    let first = dir.path().join("first.wav");
    let second = dir.path().join("second.wav");
    graph.add_config(file_spec(&config, format.clone(), first.clone()), false).unwrap();
    graph.add_config(file_spec(&config, format, second.clone()), false).unwrap();

    let stats = graph.stats();
    assert_eq!(stats.resamplers, 1);
    assert_eq!(stats.silence_trimmers, 1);
    assert_eq!(stats.captures, 1);
    assert_eq!(stats.encoders, 1);
    assert_eq!(stats.outputs, 2);

    run_to_end(&mut graph, 4000);

    assert_eq!(*written.lock(), vec![first.clone(), second.clone()]);
    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    assert_eq!(wav_spec(&first).sample_rate, 44_100);
    assert!(graph.analysis().contains_key(&second));
}

/// Peak 0.5 normalized to 0 dBFS comes out at exactly 1.0, untouched by the limiter.
#[test]
fn test_two_pass_peak_normalization() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let config = ChannelConfig::new().with_channel(TestChannel::new(1, generate_dc(0.5, 3000)));
    let out = dir.path().join("normalized.wav");
    graph
        .add_config(
            file_spec(&config, float_wav().with_normalization(Normalization::peak(0.0)), out.clone()),
            false,
        )
        .unwrap();

    run_to_end(&mut graph, 3000);

    let samples = read_wav_f32(&out);
    assert_eq!(samples.len(), 3000);
    assert!(samples.iter().all(|&s| s == 1.0));

    let report = graph.analysis()[&out];
    assert_eq!(report.gain, 2.0);
    assert_relative_eq!(report.measured.sample_peak, 0.5);
    assert_eq!(report.measured.frames, 3000);
}

/// The realtime path spills through the background writer and renders after its flush.
#[test]
fn test_realtime_capture_renders_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let config = ChannelConfig::new()
        .with_channel(TestChannel::new(1, generate_dc(0.25, 5000)))
        .with_channel(TestChannel::new(2, generate_dc(-0.125, 5000)));
    let out = dir.path().join("realtime.wav");
    graph
        .add_config(
            file_spec(&config, float_wav().with_normalization(Normalization::peak(-6.0)), out.clone()),
            true,
        )
        .unwrap();

    run_to_end(&mut graph, 5000);

    let samples = read_wav_f32(&out);
    assert_eq!(samples.len(), 10_000);
    let target = 10f32.powf(-6.0 / 20.0);
    for frame in samples.chunks(2) {
        assert_relative_eq!(frame[0], target, epsilon = FLOAT_EPSILON);
        assert_relative_eq!(frame[1], -target / 2.0, epsilon = FLOAT_EPSILON);
    }
    assert!(graph.freewheel_lock().holder().is_none());
}

/// Loudness normalization lands on the target and respects the true-peak ceiling.
#[test]
fn test_loudness_normalization_hits_target() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let frames = 3 * TEST_SAMPLE_RATE as usize;
    let config = ChannelConfig::new().with_channel(TestChannel::new(1, generate_sine(997.0, 0.05, frames)));
    let out = dir.path().join("loudness.wav");
    graph
        .add_config(
            file_spec(&config, float_wav().with_normalization(Normalization::lufs(-16.0)), out.clone()),
            false,
        )
        .unwrap();

    run_to_end(&mut graph, frames);

    let samples = read_wav_f32(&out);
    assert_eq!(samples.len(), frames);
    let measured = analyze_loudness(&samples, 1, TEST_SAMPLE_RATE).unwrap();
    assert_relative_eq!(measured.integrated_lufs, -16.0, epsilon = 0.5);
    assert!(peak(&samples) <= 10f32.powf(-1.0 / 20.0) + FLOAT_EPSILON);

    let report = graph.analysis()[&out];
    assert!(report.gain > 1.0);
    assert!(report.measured.integrated_lufs < -16.0);
}

/// A split configuration yields one mono file per channel, named by timespan and channel.
#[test]
fn test_split_export_per_channel() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());
    graph.set_current_timespan(Some(Timespan::new(0, 1000, "verse", "t1").unwrap()));

    let config = ChannelConfig::new()
        .with_channel(TestChannel::new(1, generate_dc(0.1, 1000)))
        .with_channel(TestChannel::new(2, generate_dc(-0.3, 1000)))
        .with_split(true);
    let spec = FileSpec::new(config, float_wav(), Arc::new(FilenameTemplate::in_dir(dir.path())));
    graph.add_config(spec, false).unwrap();

    let stats = graph.stats();
    assert_eq!(stats.channel_configs, 2);
    assert_eq!(stats.silence_trimmers, 2);
    assert_eq!(stats.resamplers, 2);
    assert_eq!(stats.encoders, 2);

    run_to_end(&mut graph, 1000);

    let left = dir.path().join("verse-1.wav");
    let right = dir.path().join("verse-2.wav");
    assert_eq!(wav_spec(&left).channels, 1);
    assert_eq!(read_wav_f32(&left), vec![0.1; 1000]);
    assert_eq!(read_wav_f32(&right), vec![-0.3; 1000]);
}

/// Exporting at the session rate passes samples through bit for bit.
#[test]
fn test_session_rate_is_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let input = generate_normalized_staircase(2000);
    let config = ChannelConfig::new().with_channel(TestChannel::new(1, input.clone()));
    let out = dir.path().join("passthrough.wav");
    graph
        .add_config(
            file_spec(
                &config,
                float_wav().with_sample_rate(SampleRateTarget::Hz(TEST_SAMPLE_RATE)),
                out.clone(),
            ),
            false,
        )
        .unwrap();

    run_to_end(&mut graph, 2000);
    assert_eq!(read_wav_f32(&out), input);
}

/// Halving the rate halves the length and keeps a steady level.
#[test]
fn test_downsampled_export_length() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let config = ChannelConfig::new().with_channel(TestChannel::new(1, generate_dc(0.25, 4800)));
    let out = dir.path().join("half.wav");
    graph
        .add_config(
            file_spec(
                &config,
                float_wav()
                    .with_sample_rate(SampleRateTarget::Hz(24_000))
                    .with_src_quality(SrcQuality::Best),
                out.clone(),
            ),
            false,
        )
        .unwrap();

    run_to_end(&mut graph, 4800);

    let samples = read_wav_f32(&out);
    assert_eq!(samples.len(), 2400);
    for &s in &samples[400..2000] {
        assert_relative_eq!(s, 0.25, epsilon = SRC_EPSILON);
    }
}

/// Silence around a burst is trimmed and replaced by the requested padding.
#[test]
fn test_trim_and_pad() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let mut input = vec![0.0f32; 3000];
    input[1200..1300].fill(0.5);
    let config = ChannelConfig::new().with_channel(TestChannel::new(1, input));
    let silence = SilenceOptions {
        trim_beginning: true,
        trim_end: true,
        pad_beginning: std::time::Duration::from_millis(1),
        pad_end: std::time::Duration::from_millis(2),
        ..SilenceOptions::default()
    };
    let out = dir.path().join("trimmed.wav");
    graph
        .add_config(file_spec(&config, float_wav().with_silence(silence), out.clone()), false)
        .unwrap();

    run_to_end(&mut graph, 3000);

    let samples = read_wav_f32(&out);
    assert_eq!(samples.len(), 48 + 100 + 96);
    assert!(samples[..48].iter().all(|&s| s == 0.0));
    assert!(samples[48..148].iter().all(|&s| s == 0.5));
    assert!(samples[148..].iter().all(|&s| s == 0.0));
}

/// Integer output of a full-scale signal stays inside the 16-bit range.
#[test]
fn test_int16_output_in_range() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let config = ChannelConfig::new().with_channel(TestChannel::new(1, generate_sine(1000.0, 1.0, 4800)));
    let out = dir.path().join("int16.wav");
    let format = FormatSpec::new(FormatId::Wav)
        .with_sample_format(SampleFormat::Int16)
        .with_dither(DitherType::Shaped);
    graph.add_config(file_spec(&config, format, out.clone()), false).unwrap();

    run_to_end(&mut graph, 4800);

    assert_eq!(wav_spec(&out).bits_per_sample, 16);
    let samples = read_wav_i32(&out);
    assert_eq!(samples.len(), 4800);
    assert!(samples.iter().all(|&s| (i16::MIN as i32..=i16::MAX as i32).contains(&s)));
    assert!(samples.iter().any(|&s| s.abs() > 30_000));
}

/// Different latencies are aligned by skipping only the preroll beyond the smallest one.
#[test]
fn test_preroll_skips_leading_frames() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let input = generate_normalized_staircase(1024);
    let config = ChannelConfig::new()
        .with_channel(TestChannel::with_latency(1, input.clone(), 64))
        .with_channel(TestChannel::with_latency(2, input.clone(), 100));
    let out = dir.path().join("aligned.wav");
    graph.add_config(file_spec(&config, float_wav(), out.clone()), false).unwrap();

    session.set_remaining_latency_preroll(64 + 200);
    assert_eq!(graph.process(128, false).unwrap(), 0);
    session.advance(128);
    assert_eq!(graph.process(128, false).unwrap(), 56);
    session.advance(128);
    assert_eq!(graph.process(512, false).unwrap(), 512);
    assert_eq!(graph.process(256, true).unwrap(), 256);
    wait_for_render(&mut graph);

    let samples = read_wav_f32(&out);
    assert_eq!(samples.len(), 2 * (56 + 512 + 256));
    assert_eq!(samples[0], input[200]);
    assert_eq!(samples[1], input[200]);
}

/// A region export of the same channels is its own level and ignores the preroll.
#[test]
fn test_region_export_is_its_own_level() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let input = generate_normalized_staircase(1024);
    let channel = TestChannel::new(1, input.clone());
    let timeline = ChannelConfig::new().with_channel(channel.clone());
    let region = ChannelConfig::new().with_channel(channel).with_region_export(true);
    let timeline_out = dir.path().join("timeline.wav");
    let region_out = dir.path().join("region.wav");
    graph.add_config(file_spec(&timeline, float_wav(), timeline_out.clone()), false).unwrap();
    graph.add_config(file_spec(&region, float_wav(), region_out.clone()), false).unwrap();

    let stats = graph.stats();
    assert_eq!(stats.channel_configs, 2);
    assert_eq!(stats.encoders, 2);

    session.set_remaining_latency_preroll(100);
    assert_eq!(graph.process(512, false).unwrap(), 512);
    session.advance(512);
    assert_eq!(graph.process(512, true).unwrap(), 512);
    wait_for_render(&mut graph);

    assert_eq!(read_wav_f32(&timeline_out), input[100..].to_vec());
    assert_eq!(read_wav_f32(&region_out), input);
}

/// Normalized captures render one at a time, each inside its own offline-mode window.
#[test]
fn test_normalized_renders_take_turns_offline() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(CountingEngine::default());
    let session = engine_session(&engine);
    let mut graph = test_graph(&session, dir.path());

    let config = ChannelConfig::new().with_channel(TestChannel::new(1, generate_dc(0.5, 2000)));
    let loud = dir.path().join("loud.wav");
    let quiet = dir.path().join("quiet.wav");
    graph
        .add_config(
            file_spec(&config, float_wav().with_normalization(Normalization::peak(0.0)), loud.clone()),
            false,
        )
        .unwrap();
    graph
        .add_config(
            file_spec(&config, float_wav().with_normalization(Normalization::peak(-6.0)), quiet.clone()),
            false,
        )
        .unwrap();
    assert_eq!(graph.stats().captures, 2);

    for cycle in 0..4 {
        graph.process(500, cycle == 3).unwrap();
    }
    assert_eq!(engine.entered(), 0);

    let start = std::time::Instant::now();
    while !graph.post_process().unwrap() {
        assert!(engine.exited() < 2);
        assert!(engine.entered() <= engine.exited() + 1);
        assert!(start.elapsed() < std::time::Duration::from_secs(10), "render pass did not finish");
        std::thread::yield_now();
    }

    assert_eq!(engine.entered(), 2);
    assert_eq!(engine.exited(), 2);
    assert_eq!(engine.overlaps(), 0);
    assert!(graph.freewheel_lock().holder().is_none());
    assert!(read_wav_f32(&loud).iter().all(|&s| s == 1.0));
    let target = 10f32.powf(-6.0 / 20.0);
    for s in read_wav_f32(&quiet) {
        assert_relative_eq!(s, target, epsilon = FLOAT_EPSILON);
    }
}

/// Push a normalized output to end of input and render until offline mode is entered.
fn start_render(graph: &mut GraphBuilder, engine: &CountingEngine, dir: &std::path::Path) {
    let config = ChannelConfig::new().with_channel(TestChannel::new(1, generate_dc(0.5, 4000)));
    let out = dir.join("interrupted.wav");
    graph
        .add_config(file_spec(&config, float_wav().with_normalization(Normalization::peak(0.0)), out), false)
        .unwrap();
    for cycle in 0..8 {
        graph.process(500, cycle == 7).unwrap();
    }
    let start = std::time::Instant::now();
    while engine.entered() == 0 {
        assert!(!graph.post_process().unwrap());
        assert!(start.elapsed() < std::time::Duration::from_secs(10), "render pass did not start");
        std::thread::yield_now();
    }
}

/// Cleanup or drop in the middle of a render pass leaves offline mode.
#[test]
fn test_interrupted_render_leaves_offline_mode() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(CountingEngine::default());
    let session = engine_session(&engine);

    let mut graph = test_graph(&session, dir.path());
    start_render(&mut graph, &engine, dir.path());
    assert!(graph.freewheel_lock().holder().is_some());
    assert_eq!(engine.exited(), 0);
    graph.cleanup(true);
    assert!(graph.freewheel_lock().holder().is_none());
    assert_eq!((engine.entered(), engine.exited()), (1, 1));

    let other = tempfile::tempdir().unwrap();
    let mut graph = test_graph(&session, other.path());
    start_render(&mut graph, &engine, other.path());
    assert_eq!((engine.entered(), engine.exited()), (2, 1));
    drop(graph);
    assert_eq!((engine.entered(), engine.exited()), (2, 2));
    assert_eq!(engine.overlaps(), 0);
}

/// Cancelling removes files that never finished and keeps the graph reusable.
#[test]
fn test_cancel_removes_partial_files() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let config = ChannelConfig::new().with_channel(TestChannel::new(1, generate_dc(0.2, 4096)));
    let out = dir.path().join("cancelled.raw");
    let raw = FormatSpec::new(FormatId::Raw).with_sample_format(SampleFormat::Int24);
    graph.add_config(file_spec(&config, raw, out.clone()), false).unwrap();
    graph.process(512, false).unwrap();
    graph.process(512, false).unwrap();
    assert!(out.exists());

    graph.cleanup(true);
    assert!(!out.exists());
    assert_eq!(graph.stats(), GraphStats::default());

    graph.reset();
    let again = dir.path().join("again.wav");
    graph.add_config(file_spec(&config, float_wav(), again.clone()), false).unwrap();
    run_to_end(&mut graph, 512);
    assert_eq!(read_wav_f32(&again).len(), 512);
}

/// A failing output is reported by name and its siblings still complete.
#[test]
fn test_failed_output_does_not_disturb_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());

    let config = ChannelConfig::new().with_channel(TestChannel::new(1, generate_dc(0.4, 700)));
    let good = dir.path().join("good.wav");
    graph.add_config(file_spec(&config, float_wav(), good.clone()), false).unwrap();

    let missing = FormatSpec::new(FormatId::Ogg).with_pipe_program("/nonexistent/transcoder");
    let err = graph
        .add_config(file_spec(&config, missing, dir.path().join("bad.ogg")), false)
        .unwrap_err();
    assert!(err.to_string().contains("bad.ogg"), "{err}");

    run_to_end(&mut graph, 700);
    assert_eq!(read_wav_f32(&good), vec![0.4; 700]);
    assert!(!dir.path().join("bad.ogg").exists());
}

/// A configuration without channels is refused before anything is built.
#[test]
fn test_zero_channel_config_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let session = test_session();
    let mut graph = test_graph(&session, dir.path());
    let err = graph
        .add_config(file_spec(&ChannelConfig::new(), float_wav(), dir.path().join("none.wav")), false)
        .unwrap_err();
    assert!(err.to_string().contains("no channels"), "{err}");
    assert_eq!(graph.stats(), GraphStats::default());
}
