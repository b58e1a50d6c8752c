use super::{f16_to_f32, f80_to_f64, window, Token};
use crate::error::Result;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::marker::PhantomData;

/// Byte order of a multi-byte primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endian {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

macro_rules! by_endian {
    ($endian:expr, $method:ident, $buf:expr) => {
        match $endian {
            Endian::Big => BigEndian::$method($buf),
            Endian::Little => LittleEndian::$method($buf),
        }
    };
}

/// The table of primitive fixed-width codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 16-bit integer.
    U16(Endian),
    /// Unsigned 24-bit integer.
    U24(Endian),
    /// Unsigned 32-bit integer.
    U32(Endian),
    /// Unsigned 64-bit integer.
    U64(Endian),
    /// Signed 16-bit integer.
    I16(Endian),
    /// Signed 24-bit integer.
    I24(Endian),
    /// Signed 32-bit integer.
    I32(Endian),
    /// Signed 64-bit integer.
    I64(Endian),
    /// IEEE-754 binary16 float.
    F16(Endian),
    /// IEEE-754 binary32 float.
    F32(Endian),
    /// IEEE-754 binary64 float.
    F64(Endian),
    /// x87 80-bit extended precision float.
    F80(Endian),
}

impl Primitive {
    /// Number of bytes spanned by this primitive.
    pub const fn len(self) -> usize {
        use Primitive::*;
        match self {
            U8 | I8 => 1,
            U16(_) | I16(_) | F16(_) => 2,
            U24(_) | I24(_) => 3,
            U32(_) | I32(_) | F32(_) => 4,
            U64(_) | I64(_) | F64(_) => 8,
            F80(_) => 10,
        }
    }

    /// Decodes this primitive from `buf` at `offset`.
    pub fn decode(self, buf: &[u8], offset: usize) -> Result<Number> {
        use Primitive::*;
        let b = window(buf, offset, self.len())?;

        Ok(match self {
            U8 => Number::Unsigned(u64::from(b[0])),
            I8 => Number::Signed(i64::from(b[0] as i8)),
            U16(e) => Number::Unsigned(u64::from(by_endian!(e, read_u16, b))),
            U24(e) => Number::Unsigned(u64::from(by_endian!(e, read_u24, b))),
            U32(e) => Number::Unsigned(u64::from(by_endian!(e, read_u32, b))),
            U64(e) => Number::Unsigned(by_endian!(e, read_u64, b)),
            I16(e) => Number::Signed(i64::from(by_endian!(e, read_i16, b))),
            I24(e) => Number::Signed(i64::from(by_endian!(e, read_i24, b))),
            I32(e) => Number::Signed(i64::from(by_endian!(e, read_i32, b))),
            I64(e) => Number::Signed(by_endian!(e, read_i64, b)),
            F16(e) => Number::Float(f64::from(f16_to_f32(by_endian!(e, read_u16, b)))),
            F32(e) => Number::Float(f64::from(by_endian!(e, read_f32, b))),
            F64(e) => Number::Float(by_endian!(e, read_f64, b)),
            F80(e) => {
                let mut raw = [0u8; 10];
                raw.copy_from_slice(b);
                if e == Endian::Little {
                    raw.reverse();
                }
                Number::Float(f80_to_f64(raw))
            },
        })
    }
}

impl Token for Primitive {
    type Output = Number;

    fn len(&self) -> usize {
        Primitive::len(*self)
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<Number> {
        Primitive::decode(*self, buf, offset)
    }
}

/// A decoded primitive value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    /// Any unsigned integer width.
    Unsigned(u64),
    /// Any signed integer width.
    Signed(i64),
    /// Any float width.
    Float(f64),
}

/// Conversion from a decoded [`Number`] into a Rust primitive.
///
/// Conversions are `as` casts: [`Num`] constants pair each codec with a target
/// type wide enough to hold it.
pub trait FromNumber: Sized {
    /// Converts `n` into `Self`.
    fn from_number(n: Number) -> Self;
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl FromNumber for $t {
                fn from_number(n: Number) -> Self {
                    match n {
                        Number::Unsigned(v) => v as $t,
                        Number::Signed(v) => v as $t,
                        Number::Float(v) => v as $t,
                    }
                }
            }
        )*
    };
}

impl_from_number!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// A primitive codec paired with the Rust type it decodes into.
pub struct Num<T> {
    primitive: Primitive,
    _out: PhantomData<fn() -> T>,
}

impl<T> Num<T> {
    /// Pairs `primitive` with the output type `T`.
    pub const fn new(primitive: Primitive) -> Self {
        Self {
            primitive,
            _out: PhantomData,
        }
    }

    /// The underlying codec.
    pub const fn primitive(&self) -> Primitive {
        self.primitive
    }
}

impl<T> Clone for Num<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Num<T> {}

impl<T> std::fmt::Debug for Num<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Num").field(&self.primitive).finish()
    }
}

impl<T: FromNumber> Token for Num<T> {
    type Output = T;

    fn len(&self) -> usize {
        self.primitive.len()
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<T> {
        self.primitive.decode(buf, offset).map(T::from_number)
    }
}

/// Unsigned 8-bit integer.
pub const U8: Num<u8> = Num::new(Primitive::U8);
/// Signed 8-bit integer.
pub const I8: Num<i8> = Num::new(Primitive::I8);
/// Unsigned 16-bit little-endian integer.
pub const U16_LE: Num<u16> = Num::new(Primitive::U16(Endian::Little));
/// Unsigned 16-bit big-endian integer.
pub const U16_BE: Num<u16> = Num::new(Primitive::U16(Endian::Big));
/// Unsigned 24-bit little-endian integer.
pub const U24_LE: Num<u32> = Num::new(Primitive::U24(Endian::Little));
/// Unsigned 24-bit big-endian integer.
pub const U24_BE: Num<u32> = Num::new(Primitive::U24(Endian::Big));
/// Unsigned 32-bit little-endian integer.
pub const U32_LE: Num<u32> = Num::new(Primitive::U32(Endian::Little));
/// Unsigned 32-bit big-endian integer.
pub const U32_BE: Num<u32> = Num::new(Primitive::U32(Endian::Big));
/// Unsigned 64-bit little-endian integer.
pub const U64_LE: Num<u64> = Num::new(Primitive::U64(Endian::Little));
/// Unsigned 64-bit big-endian integer.
pub const U64_BE: Num<u64> = Num::new(Primitive::U64(Endian::Big));
/// Signed 16-bit little-endian integer.
pub const I16_LE: Num<i16> = Num::new(Primitive::I16(Endian::Little));
/// Signed 16-bit big-endian integer.
pub const I16_BE: Num<i16> = Num::new(Primitive::I16(Endian::Big));
/// Signed 24-bit little-endian integer.
pub const I24_LE: Num<i32> = Num::new(Primitive::I24(Endian::Little));
/// Signed 24-bit big-endian integer.
pub const I24_BE: Num<i32> = Num::new(Primitive::I24(Endian::Big));
/// Signed 32-bit little-endian integer.
pub const I32_LE: Num<i32> = Num::new(Primitive::I32(Endian::Little));
/// Signed 32-bit big-endian integer.
pub const I32_BE: Num<i32> = Num::new(Primitive::I32(Endian::Big));
/// Signed 64-bit little-endian integer.
pub const I64_LE: Num<i64> = Num::new(Primitive::I64(Endian::Little));
/// Signed 64-bit big-endian integer.
pub const I64_BE: Num<i64> = Num::new(Primitive::I64(Endian::Big));
/// IEEE-754 half-precision little-endian float.
pub const F16_LE: Num<f32> = Num::new(Primitive::F16(Endian::Little));
/// IEEE-754 half-precision big-endian float.
pub const F16_BE: Num<f32> = Num::new(Primitive::F16(Endian::Big));
/// IEEE-754 single-precision little-endian float.
pub const F32_LE: Num<f32> = Num::new(Primitive::F32(Endian::Little));
/// IEEE-754 single-precision big-endian float.
pub const F32_BE: Num<f32> = Num::new(Primitive::F32(Endian::Big));
/// IEEE-754 double-precision little-endian float.
pub const F64_LE: Num<f64> = Num::new(Primitive::F64(Endian::Little));
/// IEEE-754 double-precision big-endian float.
pub const F64_BE: Num<f64> = Num::new(Primitive::F64(Endian::Big));
/// 80-bit extended precision little-endian float.
pub const F80_LE: Num<f64> = Num::new(Primitive::F80(Endian::Little));
/// 80-bit extended precision big-endian float.
pub const F80_BE: Num<f64> = Num::new(Primitive::F80(Endian::Big));
