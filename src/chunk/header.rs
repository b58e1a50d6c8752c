use crate::{
    constants::*,
    error::{Error, Result, StructureError},
    token::{bits, FourCc, Token, FOURCC, GUID, U32_BE, U32_LE, U64_BE, U64_LE},
    tokenizer::{Tokenizer, TokenizerExt},
};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Identifier of a chunk, atom, object, or metadata block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChunkId {
    /// A four-character code (RIFF, IFF, MP4, DSD).
    FourCc(FourCc),
    /// A 16-byte GUID (ASF).
    Guid(Uuid),
    /// A numeric block type (FLAC).
    Block(u8),
}

impl ChunkId {
    /// Returns the four-character code, if this id is one.
    pub fn fourcc(&self) -> Option<FourCc> {
        match self {
            ChunkId::FourCc(cc) => Some(*cc),
            _ => None,
        }
    }

    /// Returns the GUID, if this id is one.
    pub fn guid(&self) -> Option<Uuid> {
        match self {
            ChunkId::Guid(g) => Some(*g),
            _ => None,
        }
    }
}

impl PartialEq<[u8; 4]> for ChunkId {
    fn eq(&self, other: &[u8; 4]) -> bool {
        matches!(self, ChunkId::FourCc(cc) if cc == other)
    }
}

impl PartialEq<&[u8; 4]> for ChunkId {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        self == *other
    }
}

impl PartialEq<Uuid> for ChunkId {
    fn eq(&self, other: &Uuid) -> bool {
        matches!(self, ChunkId::Guid(g) if g == other)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkId::FourCc(cc) => cc.fmt(f),
            ChunkId::Guid(g) => write!(f, "{}", g.hyphenated().to_string().to_uppercase()),
            ChunkId::Block(t) => write!(f, "block {}", t),
        }
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

/// A decoded chunk header.
///
/// `size` always counts payload bytes only, whatever the on-disk convention of
/// the format, and is widened to 64 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkHeader {
    /// The chunk's identifier.
    pub id: ChunkId,
    /// Absolute position of the first header byte.
    pub offset: u64,
    /// Bytes occupied by the header, including any extended size field.
    pub header_len: u64,
    /// Declared payload length.
    ///
    /// `None` marks a chunk running to the end of its parent, or of the source
    /// when the parent is unbounded. The walker resolves this against the
    /// parent budget before handing the header to a visitor, so visitors only
    /// see `None` for chunks extending to the end of a source of unknown length.
    pub size: Option<u64>,
    /// Pad bytes following an odd-length payload.
    pub padding: u64,
    /// Set on a FLAC metadata block flagged as the final one.
    pub last: bool,
}

impl ChunkHeader {
    /// Absolute position of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header_len
    }

    /// Returns the declared payload length, failing for chunks of unbounded length.
    pub fn require_size(&self) -> Result<u64> {
        self.size.ok_or_else(|| {
            Error::structure(StructureError::InvalidValue {
                field: "chunk size",
                value: 0,
            })
        })
    }

    /// Bytes spanned by header, payload and padding.
    pub fn total_len(&self) -> Option<u64> {
        self.size
            .map(|size| self.header_len.saturating_add(size).saturating_add(self.padding))
    }
}

/// The fixed-width fields of a chunk header, before size conventions are applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawHeader {
    /// The chunk's identifier.
    pub id: ChunkId,
    /// The size field exactly as stored.
    pub size: u64,
    /// Flag bits carried alongside the id, if any.
    pub last: bool,
}

/// Header layouts of the supported chunked formats.
///
/// Each variant is also a [`Token`] decoding the fixed part of its header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkFormat {
    /// RIFF: four-cc, u32 LE payload size, odd payloads padded.
    Riff,
    /// IFF and AIFF: four-cc, u32 BE payload size, odd payloads padded.
    Iff,
    /// ISO base media (MP4, M4A, MOV): u32 BE size including the header, then
    /// four-cc. A size of 1 escapes to a following u64 BE size; 0 runs to the end.
    Mp4,
    /// ASF: GUID, u64 LE size including the header.
    Asf,
    /// FLAC metadata block: last flag bit, 7-bit type, u24 BE payload size.
    FlacBlock,
    /// DSDIFF: four-cc, u64 BE payload size, odd payloads padded.
    Dsdiff,
    /// DSF: four-cc, u64 LE size including the header.
    Dsf,
}

impl ChunkFormat {
    /// Human readable name, used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            ChunkFormat::Riff => "RIFF",
            ChunkFormat::Iff => "IFF",
            ChunkFormat::Mp4 => "MP4",
            ChunkFormat::Asf => "ASF",
            ChunkFormat::FlacBlock => "FLAC",
            ChunkFormat::Dsdiff => "DSDIFF",
            ChunkFormat::Dsf => "DSF",
        }
    }

    /// Length of the fixed part of the header.
    pub fn fixed_len(self) -> u64 {
        match self {
            ChunkFormat::Riff | ChunkFormat::Iff | ChunkFormat::Mp4 => FOURCC_HEADER_LEN,
            ChunkFormat::Asf => ASF_HEADER_LEN,
            ChunkFormat::FlacBlock => FLAC_BLOCK_HEADER_LEN,
            ChunkFormat::Dsdiff | ChunkFormat::Dsf => DSD_HEADER_LEN,
        }
    }

    fn pads_odd_payloads(self) -> bool {
        matches!(
            self,
            ChunkFormat::Riff | ChunkFormat::Iff | ChunkFormat::Dsdiff
        )
    }

    /// Reads one header at the tokenizer's position.
    ///
    /// Sizes which include the header are converted to payload sizes here. MP4's
    /// "to the end" size is reported as `size: None`.
    pub async fn read_header(self, tok: &mut dyn Tokenizer) -> Result<ChunkHeader> {
        let offset = tok.position();
        let raw = tok.read_token(&self).await?;
        let mut header_len = self.fixed_len();

        let size = match self {
            ChunkFormat::Riff
            | ChunkFormat::Iff
            | ChunkFormat::FlacBlock
            | ChunkFormat::Dsdiff => Some(raw.size),
            ChunkFormat::Mp4 => match raw.size {
                0 => None,
                1 => {
                    let extended = tok.read_number(U64_BE).await?;
                    header_len = MP4_EXTENDED_HEADER_LEN;
                    Some(inclusive_payload(raw.id, extended, header_len)?)
                },
                n => Some(inclusive_payload(raw.id, n, header_len)?),
            },
            ChunkFormat::Asf | ChunkFormat::Dsf =>
                Some(inclusive_payload(raw.id, raw.size, header_len)?),
        };

        let padding = match size {
            Some(n) if self.pads_odd_payloads() && n % 2 == 1 => 1,
            _ => 0,
        };

        Ok(ChunkHeader {
            id: raw.id,
            offset,
            header_len,
            size,
            padding,
            last: raw.last,
        })
    }
}

/// Converts a size which counts its own header into a payload size.
fn inclusive_payload(id: ChunkId, declared: u64, header_len: u64) -> Result<u64> {
    declared.checked_sub(header_len).ok_or_else(|| {
        Error::structure(StructureError::SizeTooSmall {
            id: id.to_string(),
            declared,
        })
    })
}

impl Token for ChunkFormat {
    type Output = RawHeader;

    fn len(&self) -> usize {
        self.fixed_len() as usize
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<RawHeader> {
        let fourcc = |at: usize| FOURCC.decode(buf, offset + at).map(ChunkId::FourCc);

        let raw = match self {
            ChunkFormat::Riff => RawHeader {
                id: fourcc(0)?,
                size: u64::from(U32_LE.decode(buf, offset + 4)?),
                last: false,
            },
            ChunkFormat::Iff => RawHeader {
                id: fourcc(0)?,
                size: u64::from(U32_BE.decode(buf, offset + 4)?),
                last: false,
            },
            ChunkFormat::Mp4 => RawHeader {
                id: fourcc(4)?,
                size: u64::from(U32_BE.decode(buf, offset)?),
                last: false,
            },
            ChunkFormat::Asf => RawHeader {
                id: ChunkId::Guid(GUID.decode(buf, offset)?),
                size: U64_LE.decode(buf, offset + 16)?,
                last: false,
            },
            ChunkFormat::FlacBlock => RawHeader {
                id: ChunkId::Block(bits::read_bits(buf, offset, 1, 7)? as u8),
                size: u64::from(bits::read_bits(buf, offset + 1, 0, 24)?),
                last: bits::read_bit(buf, offset, 0)?,
            },
            ChunkFormat::Dsdiff => RawHeader {
                id: fourcc(0)?,
                size: U64_BE.decode(buf, offset + 4)?,
                last: false,
            },
            ChunkFormat::Dsf => RawHeader {
                id: fourcc(0)?,
                size: U64_LE.decode(buf, offset + 4)?,
                last: false,
            },
        };

        Ok(raw)
    }
}
