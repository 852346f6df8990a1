//! Float to output sample format, with dithering.

use super::{check_budget, check_channels, Stage};
use crate::dsp::Ditherer;
use crate::error::{ExportError, Result};
use crate::graph::Outlet;
use crate::options::{DitherType, SampleFormat};
use bounce_core::{ProcessContext, Sample};

#[derive(Debug)]
enum Output {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I16(Vec<i16>),
    U8(Vec<u8>),
}

/// Converts interleaved f32 to the encoder's sample format.
///
/// Integer targets are scaled to `2^(bits-1) - 1`, dithered, and clamped to
/// the representable range. 24-bit samples travel in `i32`, unsigned 8-bit
/// carries the usual +128 offset. Float targets pass through unless clipping
/// is requested, which happens in place when the context allows it.
#[derive(Debug)]
pub struct SampleFormatConverter {
    channels: usize,
    format: SampleFormat,
    clip_floats: bool,
    max_samples: usize,
    ditherer: Ditherer,
    output: Option<Output>,
}

impl SampleFormatConverter {
    /// Must be followed by [`init`](Self::init) before processing.
    pub fn new(channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(ExportError::InvalidConfig(
                "sample format converter needs at least one channel".into(),
            ));
        }
        Ok(Self {
            channels,
            format: SampleFormat::Float32,
            clip_floats: false,
            max_samples: 0,
            ditherer: Ditherer::new(DitherType::None, channels),
            output: None,
        })
    }

    pub fn init(&mut self, max_samples: usize, dither: DitherType, format: SampleFormat) {
        let dither = if format.is_float() { DitherType::None } else { dither };
        self.format = format;
        self.max_samples = max_samples;
        self.ditherer = Ditherer::new(dither, self.channels);
        self.output = Some(match format {
            SampleFormat::Float32 => Output::F32(vec![0.0; max_samples]),
            SampleFormat::Float64 => Output::F64(vec![0.0; max_samples]),
            SampleFormat::Int24 | SampleFormat::Int32 => Output::I32(vec![0; max_samples]),
            SampleFormat::Int16 => Output::I16(vec![0; max_samples]),
            SampleFormat::U8 => Output::U8(vec![0; max_samples]),
        });
    }

    pub fn set_clip_floats(&mut self, clip: bool) {
        self.clip_floats = clip;
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }
}

fn clip(data: &mut [f32]) {
    for s in data {
        *s = s.clamp(-1.0, 1.0);
    }
}

fn quantize<T: Sample>(
    input: &[f32],
    output: &mut [T],
    channels: usize,
    ditherer: &mut Ditherer,
    bits: u16,
    store: impl Fn(i64) -> T,
) {
    let max = (1i64 << (bits - 1)) - 1;
    let min = -max - 1;
    let scale = max as f32;
    for (i, (x, o)) in input.iter().zip(output.iter_mut()).enumerate() {
        let q = ditherer.quantize(i % channels, x * scale);
        *o = store(q.clamp(min, max));
    }
}

impl Stage for SampleFormatConverter {
    fn process(&mut self, mut ctx: ProcessContext<'_>, out: &mut Outlet<'_>) -> Result<()> {
        let Self {
            channels,
            format,
            clip_floats,
            max_samples,
            ditherer,
            output,
        } = self;
        check_channels("sample format converter", *channels, &ctx)?;
        let output = output.as_mut().ok_or_else(|| {
            ExportError::Context("sample format converter: init not called".into())
        })?;
        check_budget("sample format converter", *max_samples, &ctx)?;

        let n = ctx.len();
        let flags = ctx.flags();
        let bits = format.bits();

        match output {
            Output::F32(buffer) => {
                if !*clip_floats {
                    return out.emit(ctx);
                }
                if ctx.is_mutable() {
                    if let Some(data) = ctx.typed_mut::<f32>() {
                        clip(data);
                        return out.emit(ctx);
                    }
                }
                buffer[..n].copy_from_slice(ctx.f32()?);
                clip(&mut buffer[..n]);
                out.emit(ProcessContext::from_slice_mut(&mut buffer[..n], *channels)?.with_flags(flags))
            }
            Output::F64(buffer) => {
                for (o, &x) in buffer.iter_mut().zip(ctx.f32()?) {
                    *o = (if *clip_floats { x.clamp(-1.0, 1.0) } else { x }) as f64;
                }
                out.emit(ProcessContext::from_slice_mut(&mut buffer[..n], *channels)?.with_flags(flags))
            }
            Output::I32(buffer) => {
                quantize(ctx.f32()?, buffer, *channels, ditherer, bits, |q| q as i32);
                out.emit(ProcessContext::from_slice_mut(&mut buffer[..n], *channels)?.with_flags(flags))
            }
            Output::I16(buffer) => {
                quantize(ctx.f32()?, buffer, *channels, ditherer, bits, |q| q as i16);
                out.emit(ProcessContext::from_slice_mut(&mut buffer[..n], *channels)?.with_flags(flags))
            }
            Output::U8(buffer) => {
                quantize(ctx.f32()?, buffer, *channels, ditherer, bits, |q| (q + 128) as u8);
                out.emit(ProcessContext::from_slice_mut(&mut buffer[..n], *channels)?.with_flags(flags))
            }
        }
    }

    fn name(&self) -> &'static str {
        "sample_format_converter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeArena;
    use crate::node::testing::{flatten, Collector, Seen};
    use bounce_core::{Flags, SampleKind};
    use proptest::prelude::*;

    fn convert(
        format: SampleFormat,
        dither: DitherType,
        clip_floats: bool,
        input: &[f32],
        channels: usize,
    ) -> Seen {
        let mut sfc = SampleFormatConverter::new(channels).unwrap();
        sfc.init(input.len().max(1), dither, format);
        sfc.set_clip_floats(clip_floats);
        let mut arena = NodeArena::new();
        let node = arena.insert(sfc);
        let (sink, seen) = Collector::new();
        let sink = arena.insert(sink);
        arena.connect(node, sink).unwrap();
        let ctx = ProcessContext::from_slice(input, channels)
            .unwrap()
            .with_flags(Flags::END_OF_INPUT);
        arena.push(node, ctx).unwrap();
        seen
    }

    #[test]
    fn test_int16_scaling_without_dither() {
        let seen = convert(SampleFormat::Int16, DitherType::None, false, &[0.0, 1.0, -1.0, 0.5], 2);
        assert_eq!(flatten(&seen), vec![0.0, 32767.0, -32767.0, 16384.0]);
        assert!(seen.lock()[0].end_of_input);
    }

    #[test]
    fn test_int24_and_u8_ranges() {
        let seen = convert(SampleFormat::Int24, DitherType::None, false, &[1.0, -2.0], 1);
        assert_eq!(flatten(&seen), vec![8_388_607.0, -8_388_608.0]);

        let seen = convert(SampleFormat::U8, DitherType::None, false, &[0.0, 1.0, -1.0], 1);
        assert_eq!(flatten(&seen), vec![128.0, 255.0, 1.0]);
    }

    #[test]
    fn test_float_passthrough_and_clip() {
        let input = [1.5f32, -0.25];
        let seen = convert(SampleFormat::Float32, DitherType::Triangular, false, &input, 1);
        assert_eq!(flatten(&seen), vec![1.5, -0.25]);

        let seen = convert(SampleFormat::Float32, DitherType::None, true, &input, 1);
        assert_eq!(flatten(&seen), vec![1.0, -0.25]);
    }

    #[test]
    fn test_clip_in_place_when_mutable() {
        let mut sfc = SampleFormatConverter::new(1).unwrap();
        sfc.init(4, DitherType::None, SampleFormat::Float32);
        sfc.set_clip_floats(true);
        let mut data = [2.0f32, -3.0];
        let ctx = ProcessContext::from_slice_mut(&mut data[..], 1).unwrap();
        sfc.process(ctx, &mut Outlet::detached()).unwrap();
        assert_eq!(data, [1.0, -1.0]);
    }

    #[test]
    fn test_programming_errors() {
        let mut sfc = SampleFormatConverter::new(2).unwrap();
        let block = [0.0f32; 4];
        let ctx = || ProcessContext::from_slice(&block[..], 2).unwrap();
        assert!(sfc.process(ctx(), &mut Outlet::detached()).is_err());

        sfc.init(2, DitherType::None, SampleFormat::Int16);
        assert!(sfc.process(ctx(), &mut Outlet::detached()).is_err());
        let mono = ProcessContext::from_slice(&block[..2], 1).unwrap();
        assert!(sfc.process(mono, &mut Outlet::detached()).is_err());
    }

    #[test]
    fn test_output_kind_follows_format() {
        assert_eq!(SampleFormat::Int24.kind(), SampleKind::I32);
        let mut sfc = SampleFormatConverter::new(1).unwrap();
        sfc.init(1, DitherType::Shaped, SampleFormat::Float64);
        assert_eq!(sfc.format(), SampleFormat::Float64);
    }

    proptest! {
        #[test]
        fn undithered_int16_stays_in_range(input in prop::collection::vec(-1.0f32..=1.0, 1..256)) {
            let seen = convert(SampleFormat::Int16, DitherType::None, false, &input, 1);
            for s in flatten(&seen) {
                prop_assert!((i16::MIN as f64..=i16::MAX as f64).contains(&s));
            }
        }

        #[test]
        fn dithered_int16_stays_in_range(input in prop::collection::vec(-1.0f32..=1.0, 1..256)) {
            for dither in [DitherType::Rectangular, DitherType::Triangular, DitherType::Shaped] {
                let seen = convert(SampleFormat::Int16, dither, false, &input, 1);
                for s in flatten(&seen) {
                    prop_assert!((i16::MIN as f64..=i16::MAX as f64).contains(&s));
                }
            }
        }
    }
}
