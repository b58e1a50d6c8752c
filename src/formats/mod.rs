//! Structural walkers for individual container formats.
//!
//! Each walker pairs a [`ChunkFormat`] with a visitor or page reader, and
//! returns a plain info struct of raw values. Tag semantics are left to the
//! caller: text comes back as decoded strings, everything else as numbers or
//! raw bytes.
//!
//! Walkers treat a truncated tail as the end of a best-effort parse: whatever
//! was decoded before the input ran out is returned with `truncated` set.
//!
//! [`ChunkFormat`]: crate::chunk::ChunkFormat

pub mod aiff;
pub mod apev2;
pub mod asf;
pub mod dsd;
pub mod flac;
pub mod id3v2;
pub mod mp4;
pub mod ogg;
pub mod riff;
mod vorbis;
pub mod wavpack;

pub use self::vorbis::VorbisComments;

use crate::{
    error::{recover_eof, Error, Result, StructureError},
    token::{window, BufferToken, FourCc, FromNumber, Num, Token, FOURCC},
    tokenizer::{Tokenizer, TokenizerExt},
};
use serde::Serialize;
use tracing::warn;

/// A byte range within the source, e.g. the audio payload of a file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Region {
    /// Absolute position of the first byte.
    pub offset: u64,
    /// Length in bytes, if bounded.
    pub len: Option<u64>,
}

impl Region {
    pub(crate) fn of(header: &crate::chunk::ChunkHeader) -> Self {
        Self {
            offset: header.payload_offset(),
            len: header.size,
        }
    }
}

/// Swallows a trailing [`Error::EndOfStream`], logging it.
///
/// Returns whether the input was truncated.
pub(crate) fn tolerate_eof<T>(res: Result<T>, format: &str) -> Result<bool> {
    let truncated = recover_eof(res)?.is_none();
    if truncated {
        warn!("{} input ended early, keeping the structure read so far.", format);
    }
    Ok(truncated)
}

/// Reads a whole chunk payload into memory.
pub(crate) async fn read_payload(
    tok: &mut dyn Tokenizer,
    header: &crate::chunk::ChunkHeader,
) -> Result<Vec<u8>> {
    let len = usize::try_from(header.require_size()?)
        .map_err(|_| Error::Unsupported("chunk payload larger than addressable memory"))?;
    tok.read_token(&BufferToken(len)).await
}

/// Returns `buf[offset..offset + len]` or a structural error naming `field`.
pub(crate) fn field<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    name: &'static str,
) -> Result<&'a [u8]> {
    window(buf, offset, len).map_err(|_| {
        Error::structure(StructureError::LengthOutOfBounds {
            field: name,
            length: len as u64,
            available: buf.len().saturating_sub(offset) as u64,
        })
    })
}

/// Rejects a signature which is not `expected`.
pub(crate) fn expect_magic(found: &[u8], expected: &'static [u8], name: &'static str) -> Result<()> {
    if found == expected {
        Ok(())
    } else {
        Err(Error::structure(StructureError::BadMagic {
            expected: name,
            found: found.to_vec(),
        }))
    }
}

/// Sequential field access over an in-memory payload.
///
/// Running off the end is reported as a structural error naming the payload.
#[derive(Clone, Debug)]
pub(crate) struct Fields<'a> {
    buf: &'a [u8],
    at: usize,
    name: &'static str,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(buf: &'a [u8], name: &'static str) -> Self {
        Self { buf, at: 0, name }
    }

    pub(crate) fn position(&self) -> usize {
        self.at
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.at)
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let out = field(self.buf, self.at, len, self.name)?;
        self.at += len;
        Ok(out)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(|_| ())
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = self.buf.get(self.at..).unwrap_or_default();
        self.at = self.buf.len();
        out
    }

    /// Takes bytes up to a NUL terminator, consuming the terminator too.
    pub(crate) fn cstr(&mut self) -> Result<&'a [u8]> {
        let rest = self.buf.get(self.at..).unwrap_or_default();
        let len = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            Error::structure(StructureError::LengthOutOfBounds {
                field: self.name,
                length: rest.len() as u64 + 1,
                available: rest.len() as u64,
            })
        })?;
        let out = self.take(len)?;
        self.at += 1;
        Ok(out)
    }

    pub(crate) fn number<T: FromNumber>(&mut self, token: Num<T>) -> Result<T> {
        let raw = self.take(token.len())?;
        token.decode(raw, 0)
    }

    pub(crate) fn fourcc(&mut self) -> Result<FourCc> {
        let raw = self.take(4)?;
        FOURCC.decode(raw, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{U16_BE, U32_LE};

    #[test]
    fn fields_read_in_sequence() {
        let buf = b"\x01\x02abcdname\0\x05\0\0\0tail";
        let mut f = Fields::new(buf, "test");

        assert_eq!(f.number(U16_BE).unwrap(), 0x0102);
        assert_eq!(f.fourcc().unwrap(), *b"abcd");
        assert_eq!(f.cstr().unwrap(), b"name");
        assert_eq!(f.number(U32_LE).unwrap(), 5);
        assert_eq!(f.position(), 15);
        assert_eq!(f.remaining(), 4);
        assert_eq!(f.rest(), b"tail");
        assert_eq!(f.remaining(), 0);
    }

    #[test]
    fn running_off_the_end_names_the_payload() {
        let mut f = Fields::new(b"abc", "short payload");

        match f.take(4) {
            Err(Error::Structure(StructureError::LengthOutOfBounds {
                field,
                length,
                available,
            })) => {
                assert_eq!(field, "short payload");
                assert_eq!(length, 4);
                assert_eq!(available, 3);
            },
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(f.cstr().is_err());
        assert_eq!(f.position(), 0);
    }
}
