//! ID3v2 tag headers.
//!
//! Only the 10-byte header is decoded, which is enough to locate or skip a
//! tag. Frames are left to tag readers.

use crate::{
    constants::{ID3V2_HEADER_LEN, ID3V2_MAGIC},
    error::{Error, Result, StructureError},
    token::{bits, window, Token, U8},
    tokenizer::{ReadOptions, Tokenizer, TokenizerExt},
};
use serde::Serialize;
use tracing::debug;

const FLAG_UNSYNCHRONISATION: u8 = 0x80;
const FLAG_EXTENDED_HEADER: u8 = 0x40;
const FLAG_EXPERIMENTAL: u8 = 0x20;
const FLAG_FOOTER: u8 = 0x10;

/// A decoded ID3v2 header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Id3v2Header {
    /// Major version, e.g. 3 for ID3v2.3.
    pub major: u8,
    /// Revision number.
    pub revision: u8,
    /// Raw flag byte.
    pub flags: u8,
    /// Tag size after the header, excluding any footer.
    pub size: u32,
}

impl Id3v2Header {
    /// The tag uses unsynchronisation.
    pub fn unsynchronised(&self) -> bool {
        self.flags & FLAG_UNSYNCHRONISATION != 0
    }

    /// An extended header follows this one.
    pub fn has_extended_header(&self) -> bool {
        self.flags & FLAG_EXTENDED_HEADER != 0
    }

    /// The tag is flagged experimental.
    pub fn experimental(&self) -> bool {
        self.flags & FLAG_EXPERIMENTAL != 0
    }

    /// A 10-byte footer follows the tag body (ID3v2.4 only).
    pub fn has_footer(&self) -> bool {
        self.major >= 4 && self.flags & FLAG_FOOTER != 0
    }

    /// Bytes spanned by the whole tag, header and footer included.
    pub fn total_len(&self) -> u64 {
        let footer = if self.has_footer() { ID3V2_HEADER_LEN } else { 0 };
        ID3V2_HEADER_LEN + u64::from(self.size) + footer
    }
}

/// Decodes an [`Id3v2Header`], checking the `ID3` identifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct Id3v2HeaderToken;

impl Token for Id3v2HeaderToken {
    type Output = Id3v2Header;

    fn len(&self) -> usize {
        ID3V2_HEADER_LEN as usize
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<Id3v2Header> {
        let magic = window(buf, offset, 3)?;
        if magic != ID3V2_MAGIC {
            return Err(Error::structure(StructureError::BadMagic {
                expected: "ID3",
                found: magic.to_vec(),
            }));
        }

        let size_bytes = window(buf, offset + 6, 4)?;
        if size_bytes.iter().any(|b| b & 0x80 != 0) {
            return Err(Error::structure(StructureError::InvalidValue {
                field: "id3v2 size",
                value: u64::from(u32::from_be_bytes([
                    size_bytes[0],
                    size_bytes[1],
                    size_bytes[2],
                    size_bytes[3],
                ])),
            }));
        }

        Ok(Id3v2Header {
            major: U8.decode(buf, offset + 3)?,
            revision: U8.decode(buf, offset + 4)?,
            flags: U8.decode(buf, offset + 5)?,
            size: bits::syncsafe_u32(buf, offset + 6)?,
        })
    }
}

/// Token for an ID3v2 header.
pub const ID3V2_HEADER: Id3v2HeaderToken = Id3v2HeaderToken;

/// Peeks an ID3v2 header at the tokenizer's position, if one is there.
pub async fn peek_header(tok: &mut dyn Tokenizer) -> Result<Option<Id3v2Header>> {
    let mut magic = [0u8; 3];
    let n = tok
        .peek_buffer(&mut magic, ReadOptions::default().may_be_less(true))
        .await?;
    if n < magic.len() || &magic != ID3V2_MAGIC {
        return Ok(None);
    }

    tok.peek_token(&ID3V2_HEADER).await.map(Some)
}

/// Skips every ID3v2 tag at the tokenizer's position.
///
/// Some encoders prepend several tags. Returns the headers skipped, in order.
pub async fn skip(tok: &mut dyn Tokenizer) -> Result<Vec<Id3v2Header>> {
    let mut skipped = vec![];

    while let Some(header) = peek_header(tok).await? {
        debug!(
            "Skipping ID3v2.{} tag of {} bytes at {}.",
            header.major,
            header.total_len(),
            tok.position()
        );

        if tok.ignore(header.total_len()).await? < header.total_len() {
            return Err(Error::EndOfStream);
        }
        skipped.push(header);
    }

    Ok(skipped)
}
