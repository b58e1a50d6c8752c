//! Declarative, fixed-layout binary descriptors.
//!
//! A [`Token`] knows how many bytes it spans and how to turn those bytes into a
//! value. Tokens are plain data: the primitive codecs form the closed
//! [`Primitive`] table, and compound structures (chunk headers, Ogg page headers,
//! `fmt ` blocks, ...) implement [`Token`] by decoding primitives at fixed
//! offsets inside one call.
//!
//! Tokens whose length depends on previously decoded data are built in two
//! steps: decode the length with a primitive, then construct the sized token
//! (e.g. [`StringToken::new`]) for the bytes which follow.

pub mod bits;
mod float;
mod number;
mod string;

pub use self::{float::*, number::*, string::*};

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// A descriptor for decoding a fixed- or computed-length region of bytes.
pub trait Token {
    /// Value produced by this token.
    type Output;

    /// Number of bytes spanned by this token.
    fn len(&self) -> usize;

    /// Decodes this token from `buf`, starting at `offset`.
    ///
    /// Fails with [`Error::EndOfStream`] if `buf` holds fewer than
    /// `offset + self.len()` bytes.
    fn decode(&self, buf: &[u8], offset: usize) -> Result<Self::Output>;
}

impl<T: Token + ?Sized> Token for &T {
    type Output = T::Output;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<Self::Output> {
        (**self).decode(buf, offset)
    }
}

/// Returns `buf[offset..offset + len]`, or [`Error::EndOfStream`] if that range does
/// not lie within `buf`.
pub fn window(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or(Error::EndOfStream)
}

/// A four-character code, as used to identify RIFF chunks and MP4 atoms.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    /// Creates a four-character code from its raw bytes.
    pub const fn new(raw: &[u8; 4]) -> Self {
        Self(*raw)
    }

    /// Returns the raw bytes of this code.
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Latin-1, so that MP4's `©nam`-style codes render as intended.
        for b in &self.0 {
            write!(f, "{}", char::from(*b))?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({:?})", self.to_string())
    }
}

impl PartialEq<[u8; 4]> for FourCc {
    fn eq(&self, other: &[u8; 4]) -> bool {
        &self.0 == other
    }
}

impl PartialEq<&[u8; 4]> for FourCc {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        &self.0 == *other
    }
}

impl From<[u8; 4]> for FourCc {
    fn from(val: [u8; 4]) -> Self {
        Self(val)
    }
}

impl Serialize for FourCc {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Decodes a [`FourCc`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FourCcToken;

impl Token for FourCcToken {
    type Output = FourCc;

    fn len(&self) -> usize {
        4
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<FourCc> {
        let mut out = [0u8; 4];
        out.copy_from_slice(window(buf, offset, 4)?);
        Ok(FourCc(out))
    }
}

/// Token for a [`FourCc`].
pub const FOURCC: FourCcToken = FourCcToken;

/// Decodes a 16-byte GUID stored in Microsoft's mixed-endian field layout (ASF).
#[derive(Clone, Copy, Debug, Default)]
pub struct GuidToken;

impl Token for GuidToken {
    type Output = Uuid;

    fn len(&self) -> usize {
        16
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<Uuid> {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(window(buf, offset, 16)?);
        Ok(Uuid::from_bytes_le(raw))
    }
}

/// Token for a mixed-endian GUID.
pub const GUID: GuidToken = GuidToken;

/// Copies out `len` raw bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferToken(pub usize);

impl Token for BufferToken {
    type Output = Vec<u8>;

    fn len(&self) -> usize {
        self.0
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<Vec<u8>> {
        Ok(window(buf, offset, self.0)?.to_vec())
    }
}

/// Spans `len` bytes without producing a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IgnoreToken(pub usize);

impl Token for IgnoreToken {
    type Output = ();

    fn len(&self) -> usize {
        self.0
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<()> {
        window(buf, offset, self.0).map(|_| ())
    }
}
