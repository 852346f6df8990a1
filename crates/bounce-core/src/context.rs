//! Process contexts: the transient buffer handle passed through one pipeline call.
//!
//! A [`ProcessContext`] never owns its samples. It is either a shared view
//! (stages must copy before transforming) or an exclusive view (stages may
//! transform in place). Sample representation is a small closed set of
//! kinds; stages select a monomorphized inner loop once per call through the
//! [`Sample`] trait instead of dispatching per sample.

use crate::error::{Error, Result};

/// Numeric representation of the samples carried by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleKind {
    F32,
    F64,
    I32,
    I16,
    U8,
}

impl SampleKind {
    /// Size of one sample in bytes.
    pub fn bytes(&self) -> usize {
        match self {
            SampleKind::F32 | SampleKind::I32 => 4,
            SampleKind::F64 => 8,
            SampleKind::I16 => 2,
            SampleKind::U8 => 1,
        }
    }
}

/// Shared view over samples of one kind.
#[derive(Debug, Clone, Copy)]
pub enum Samples<'a> {
    F32(&'a [f32]),
    F64(&'a [f64]),
    I32(&'a [i32]),
    I16(&'a [i16]),
    U8(&'a [u8]),
}

/// Exclusive view over samples of one kind.
#[derive(Debug)]
pub enum SamplesMut<'a> {
    F32(&'a mut [f32]),
    F64(&'a mut [f64]),
    I32(&'a mut [i32]),
    I16(&'a mut [i16]),
    U8(&'a mut [u8]),
}

macro_rules! dispatch {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Self::F32($inner) => $body,
            Self::F64($inner) => $body,
            Self::I32($inner) => $body,
            Self::I16($inner) => $body,
            Self::U8($inner) => $body,
        }
    };
}

impl<'a> Samples<'a> {
    pub fn len(&self) -> usize {
        dispatch!(self, s => s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> SampleKind {
        match self {
            Samples::F32(_) => SampleKind::F32,
            Samples::F64(_) => SampleKind::F64,
            Samples::I32(_) => SampleKind::I32,
            Samples::I16(_) => SampleKind::I16,
            Samples::U8(_) => SampleKind::U8,
        }
    }

    /// Sub-range of this view, in samples.
    pub fn slice(&self, range: core::ops::Range<usize>) -> Samples<'a> {
        match *self {
            Samples::F32(s) => Samples::F32(&s[range]),
            Samples::F64(s) => Samples::F64(&s[range]),
            Samples::I32(s) => Samples::I32(&s[range]),
            Samples::I16(s) => Samples::I16(&s[range]),
            Samples::U8(s) => Samples::U8(&s[range]),
        }
    }
}

impl<'a> SamplesMut<'a> {
    pub fn len(&self) -> usize {
        dispatch!(self, s => s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> SampleKind {
        self.as_const().kind()
    }

    pub fn as_const(&self) -> Samples<'_> {
        match self {
            SamplesMut::F32(s) => Samples::F32(s),
            SamplesMut::F64(s) => Samples::F64(s),
            SamplesMut::I32(s) => Samples::I32(s),
            SamplesMut::I16(s) => Samples::I16(s),
            SamplesMut::U8(s) => Samples::U8(s),
        }
    }

    pub fn reborrow(&mut self) -> SamplesMut<'_> {
        match self {
            SamplesMut::F32(s) => SamplesMut::F32(s),
            SamplesMut::F64(s) => SamplesMut::F64(s),
            SamplesMut::I32(s) => SamplesMut::I32(s),
            SamplesMut::I16(s) => SamplesMut::I16(s),
            SamplesMut::U8(s) => SamplesMut::U8(s),
        }
    }
}

/// A sample type that can travel through a [`ProcessContext`].
pub trait Sample: Copy + Default + Send + Sync + 'static {
    const KIND: SampleKind;

    fn wrap(data: &[Self]) -> Samples<'_>;
    fn wrap_mut(data: &mut [Self]) -> SamplesMut<'_>;
    fn unwrap<'a>(samples: Samples<'a>) -> Option<&'a [Self]>;
    fn unwrap_mut<'a>(samples: SamplesMut<'a>) -> Option<&'a mut [Self]>;
}

macro_rules! impl_sample {
    ($ty:ty, $variant:ident) => {
        impl Sample for $ty {
            const KIND: SampleKind = SampleKind::$variant;

            #[inline]
            fn wrap(data: &[Self]) -> Samples<'_> {
                Samples::$variant(data)
            }

            #[inline]
            fn wrap_mut(data: &mut [Self]) -> SamplesMut<'_> {
                SamplesMut::$variant(data)
            }

            #[inline]
            fn unwrap<'a>(samples: Samples<'a>) -> Option<&'a [Self]> {
                match samples {
                    Samples::$variant(s) => Some(s),
                    _ => None,
                }
            }

            #[inline]
            fn unwrap_mut<'a>(samples: SamplesMut<'a>) -> Option<&'a mut [Self]> {
                match samples {
                    SamplesMut::$variant(s) => Some(s),
                    _ => None,
                }
            }
        }
    };
}

impl_sample!(f32, F32);
impl_sample!(f64, F64);
impl_sample!(i32, I32);
impl_sample!(i16, I16);
impl_sample!(u8, U8);

/// Flag bits carried by a context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// The last block of the stream. May be empty.
    pub const END_OF_INPUT: Flags = Flags(1);

    #[inline]
    pub fn contains(&self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

#[derive(Debug)]
enum Data<'a> {
    Const(Samples<'a>),
    Mut(SamplesMut<'a>),
}

/// Transient view over {samples, channel count, flags} for one pipeline call.
///
/// Samples are interleaved; `len()` is always a multiple of `channels()`.
#[derive(Debug)]
pub struct ProcessContext<'a> {
    data: Data<'a>,
    channels: usize,
    flags: Flags,
}

fn validate(len: usize, channels: usize) -> Result<()> {
    if channels == 0 {
        return Err(Error::ZeroChannels);
    }
    if len % channels != 0 {
        return Err(Error::MisalignedSamples {
            samples: len,
            channels,
        });
    }
    Ok(())
}

impl<'a> ProcessContext<'a> {
    /// Shared context. Stages that transform data must copy first.
    pub fn new(samples: Samples<'a>, channels: usize) -> Result<Self> {
        validate(samples.len(), channels)?;
        Ok(Self {
            data: Data::Const(samples),
            channels,
            flags: Flags::NONE,
        })
    }

    /// Exclusive context. Stages may transform in place.
    pub fn new_mut(samples: SamplesMut<'a>, channels: usize) -> Result<Self> {
        validate(samples.len(), channels)?;
        Ok(Self {
            data: Data::Mut(samples),
            channels,
            flags: Flags::NONE,
        })
    }

    pub fn from_slice<T: Sample>(data: &'a [T], channels: usize) -> Result<Self> {
        Self::new(T::wrap(data), channels)
    }

    pub fn from_slice_mut<T: Sample>(data: &'a mut [T], channels: usize) -> Result<Self> {
        Self::new_mut(T::wrap_mut(data), channels)
    }

    /// Builder-style flag setter.
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total samples (frames * channels).
    #[inline]
    pub fn len(&self) -> usize {
        match &self.data {
            Data::Const(s) => s.len(),
            Data::Mut(s) => s.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.len() / self.channels
    }

    pub fn kind(&self) -> SampleKind {
        self.samples().kind()
    }

    pub fn is_mutable(&self) -> bool {
        matches!(self.data, Data::Mut(_))
    }

    pub fn samples(&self) -> Samples<'_> {
        match &self.data {
            Data::Const(s) => *s,
            Data::Mut(s) => s.as_const(),
        }
    }

    /// Typed shared access. A kind mismatch is a wiring error.
    pub fn typed<T: Sample>(&self) -> Result<&[T]> {
        let samples = self.samples();
        let actual = samples.kind();
        T::unwrap(samples).ok_or(Error::SampleKind {
            expected: T::KIND,
            actual,
        })
    }

    /// Typed exclusive access; `None` for shared contexts or other kinds.
    pub fn typed_mut<T: Sample>(&mut self) -> Option<&mut [T]> {
        match &mut self.data {
            Data::Mut(s) => T::unwrap_mut(s.reborrow()),
            Data::Const(_) => None,
        }
    }

    #[inline]
    pub fn f32(&self) -> Result<&[f32]> {
        self.typed::<f32>()
    }

    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    #[inline]
    pub fn has_flag(&self, flag: Flags) -> bool {
        self.flags.contains(flag)
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flags) {
        self.flags.insert(flag);
    }

    #[inline]
    pub fn remove_flag(&mut self, flag: Flags) {
        self.flags.remove(flag);
    }

    #[inline]
    pub fn end_of_input(&self) -> bool {
        self.has_flag(Flags::END_OF_INPUT)
    }

    /// Shorter-lived handle with the same mutability.
    pub fn reborrow(&mut self) -> ProcessContext<'_> {
        let data = match &mut self.data {
            Data::Const(s) => Data::Const(*s),
            Data::Mut(s) => Data::Mut(s.reborrow()),
        };
        ProcessContext {
            data,
            channels: self.channels,
            flags: self.flags,
        }
    }

    /// Shared handle over the same samples, for fan-out to several consumers.
    pub fn as_const(&self) -> ProcessContext<'_> {
        ProcessContext {
            data: Data::Const(self.samples()),
            channels: self.channels,
            flags: self.flags,
        }
    }

    /// New shared context over other data, inheriting channels and flags.
    pub fn derive<'b>(&self, samples: Samples<'b>) -> Result<ProcessContext<'b>> {
        Ok(ProcessContext::new(samples, self.channels)?.with_flags(self.flags))
    }

    /// New exclusive context over other data, inheriting channels and flags.
    pub fn derive_mut<'b>(&self, samples: SamplesMut<'b>) -> Result<ProcessContext<'b>> {
        Ok(ProcessContext::new_mut(samples, self.channels)?.with_flags(self.flags))
    }
}
