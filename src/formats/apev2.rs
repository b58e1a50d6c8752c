//! APEv2 tags.
//!
//! A tag is a run of items framed by an optional 32-byte header and a 32-byte
//! footer. Both frames carry the same fields; the footer is the one normally
//! found, at the end of the file or just ahead of an ID3v1 tag.

use super::Fields;
use crate::{
    constants::{APE_FOOTER_LEN, APE_PREAMBLE},
    error::{Error, Result, StructureError},
    token::{window, BufferToken, TextEncoding, Token, U32_LE},
    tokenizer::{ReadOptions, Tokenizer, TokenizerExt},
};
use serde::Serialize;
use tracing::{debug, instrument};

const FLAG_HAS_HEADER: u32 = 1 << 31;
const FLAG_NO_FOOTER: u32 = 1 << 30;
const FLAG_IS_HEADER: u32 = 1 << 29;
const FLAG_READ_ONLY: u32 = 1;

const ID3V1_LEN: u64 = 128;

/// An APEv2 header or footer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApeFrame {
    /// 1000 for APEv1, 2000 for APEv2.
    pub version: u32,
    /// Bytes of items plus footer, header excluded.
    pub size: u32,
    /// Number of items.
    pub item_count: u32,
    /// Tag flags.
    pub flags: u32,
}

impl ApeFrame {
    /// The tag starts with a header.
    pub fn has_header(&self) -> bool {
        self.flags & FLAG_HAS_HEADER != 0
    }

    /// The tag ends with a footer.
    pub fn has_footer(&self) -> bool {
        self.flags & FLAG_NO_FOOTER == 0
    }

    /// This frame is the header rather than the footer.
    pub fn is_header(&self) -> bool {
        self.flags & FLAG_IS_HEADER != 0
    }

    /// Items must not be modified.
    pub fn read_only(&self) -> bool {
        self.flags & FLAG_READ_ONLY != 0
    }

    fn items_len(&self) -> u64 {
        let footer = if self.has_footer() { APE_FOOTER_LEN } else { 0 };
        u64::from(self.size).saturating_sub(footer)
    }

    fn total_len(&self) -> u64 {
        let header = if self.has_header() { APE_FOOTER_LEN } else { 0 };
        u64::from(self.size) + header
    }
}

/// Decodes an [`ApeFrame`], checking the `APETAGEX` preamble.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApeFrameToken;

impl Token for ApeFrameToken {
    type Output = ApeFrame;

    fn len(&self) -> usize {
        APE_FOOTER_LEN as usize
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<ApeFrame> {
        let preamble = window(buf, offset, 8)?;
        if preamble != APE_PREAMBLE {
            return Err(Error::structure(StructureError::BadMagic {
                expected: "APETAGEX",
                found: preamble.to_vec(),
            }));
        }

        Ok(ApeFrame {
            version: U32_LE.decode(buf, offset + 8)?,
            size: U32_LE.decode(buf, offset + 12)?,
            item_count: U32_LE.decode(buf, offset + 16)?,
            flags: U32_LE.decode(buf, offset + 20)?,
        })
    }
}

/// Token for an APEv2 header or footer.
pub const APE_FRAME: ApeFrameToken = ApeFrameToken;

/// How an item's value is to be read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ItemKind {
    /// UTF-8 text, possibly several NUL-separated values.
    Text,
    /// Opaque bytes.
    Binary,
    /// A UTF-8 link to external data.
    Locator,
    /// Reserved.
    Reserved,
}

/// One tag item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApeItem {
    /// Case-insensitive ASCII key.
    pub key: String,
    /// Item flags.
    pub flags: u32,
    /// Raw value bytes.
    pub value: Vec<u8>,
}

impl ApeItem {
    /// How the value is encoded.
    pub fn kind(&self) -> ItemKind {
        match (self.flags >> 1) & 0b11 {
            0 => ItemKind::Text,
            1 => ItemKind::Binary,
            2 => ItemKind::Locator,
            _ => ItemKind::Reserved,
        }
    }

    /// The value as text, for text and locator items.
    pub fn text(&self) -> Option<String> {
        matches!(self.kind(), ItemKind::Text | ItemKind::Locator)
            .then(|| TextEncoding::Utf8.decode(&self.value))
    }
}

/// A whole APEv2 tag.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApeTag {
    /// Position of the first byte of the tag, header included.
    pub offset: u64,
    /// The footer, or the header of a footerless tag.
    pub frame: ApeFrame,
    /// Items in stored order.
    pub items: Vec<ApeItem>,
}

impl ApeTag {
    /// The first item whose key matches `key`, ignoring ASCII case.
    pub fn get(&self, key: &str) -> Option<&ApeItem> {
        self.items.iter().find(|i| i.key.eq_ignore_ascii_case(key))
    }

    /// Bytes spanned by the tag.
    pub fn len(&self) -> u64 {
        self.frame.total_len()
    }

    /// Whether the tag holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn decode_items(buf: &[u8], count: u32) -> Result<Vec<ApeItem>> {
    let mut f = Fields::new(buf, "ape item");
    // Each item needs at least its two length words and a terminator.
    let mut items = Vec::with_capacity((count as usize).min(buf.len() / 9));

    for _ in 0..count {
        let value_len = f.number(U32_LE)? as usize;
        let flags = f.number(U32_LE)?;
        let key = TextEncoding::Ascii.decode(f.cstr()?);
        let value = f.take(value_len)?.to_vec();
        items.push(ApeItem { key, flags, value });
    }

    if f.remaining() > 0 {
        debug!("{} bytes follow the last APE item.", f.remaining());
    }

    Ok(items)
}

async fn read_items(tok: &mut dyn Tokenizer, frame: &ApeFrame) -> Result<Vec<ApeItem>> {
    let len = usize::try_from(frame.items_len())
        .map_err(|_| Error::Unsupported("APE tag larger than addressable memory"))?;
    let buf = tok.read_token(&BufferToken(len)).await?;
    decode_items(&buf, frame.item_count)
}

/// Reads a tag which starts, with its header, at the tokenizer's position.
///
/// The tokenizer is left after the tag's footer.
#[instrument(skip(tok))]
pub async fn parse_at(tok: &mut dyn Tokenizer) -> Result<ApeTag> {
    let offset = tok.position();
    let header = tok.read_token(&APE_FRAME).await?;
    if !header.is_header() {
        return Err(Error::structure(StructureError::InvalidValue {
            field: "ape header flags",
            value: u64::from(header.flags),
        }));
    }

    let items = read_items(tok, &header).await?;
    let frame = if header.has_footer() {
        tok.read_token(&APE_FRAME).await?
    } else {
        header
    };

    Ok(ApeTag {
        offset,
        frame,
        items,
    })
}

async fn peek_at(tok: &mut dyn Tokenizer, position: u64, dst: &mut [u8]) -> Result<usize> {
    tok.set_position(position).await?;
    tok.peek_buffer(dst, ReadOptions::default().may_be_less(true))
        .await
}

/// Looks for a tag at the end of a random-access source, or just ahead of a
/// trailing ID3v1 tag.
///
/// Returns `None` when no footer is found. The tokenizer is left after the
/// tag's footer when one is found, at the searched footer position otherwise.
#[instrument(skip(tok))]
pub async fn find_at_end(tok: &mut dyn Tokenizer) -> Result<Option<ApeTag>> {
    if !tok.supports_random_access() {
        return Err(Error::Unsupported("finding an APE tag on a sequential source"));
    }
    let size = tok
        .file_info()
        .size
        .ok_or(Error::Unsupported("finding an APE tag in a source of unknown size"))?;

    let mut end = size;
    if size >= ID3V1_LEN {
        let mut magic = [0u8; 3];
        let n = peek_at(tok, size - ID3V1_LEN, &mut magic).await?;
        if n == magic.len() && &magic == b"TAG" {
            debug!("Skipping ID3v1 tag at {}.", size - ID3V1_LEN);
            end -= ID3V1_LEN;
        }
    }

    let footer_at = match end.checked_sub(APE_FOOTER_LEN) {
        Some(footer_at) => footer_at,
        None => return Ok(None),
    };
    let mut raw = [0u8; APE_FOOTER_LEN as usize];
    if peek_at(tok, footer_at, &mut raw).await? < raw.len() || !raw.starts_with(APE_PREAMBLE) {
        return Ok(None);
    }

    let footer = APE_FRAME.decode(&raw, 0)?;
    if footer.is_header() {
        return Ok(None);
    }

    let items_at = end.checked_sub(u64::from(footer.size)).ok_or_else(|| {
        Error::structure(StructureError::LengthOutOfBounds {
            field: "ape tag",
            length: u64::from(footer.size),
            available: end,
        })
    })?;
    let offset = if footer.has_header() {
        items_at.saturating_sub(APE_FOOTER_LEN)
    } else {
        items_at
    };

    tok.set_position(items_at).await?;
    let items = read_items(tok, &footer).await?;
    tok.ignore(APE_FOOTER_LEN).await?;

    Ok(Some(ApeTag {
        offset,
        frame: footer,
        items,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        tokenizer::{from_buffer, FileInfo, StreamTokenizer},
        Config,
    };
    use std::io::Cursor;
    use utils::ape_tag;

    fn items() -> Vec<(&'static str, &'static [u8])> {
        vec![("Title", b"Song"), ("Artist", b"One\0Two"), ("Cover Art (Front)", b"x\0\xFF\xD8")]
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn reads_tag_from_its_header() {
        let mut bytes = ape_tag(&items(), true);
        let len = bytes.len() as u64;
        bytes.extend_from_slice(b"trailing");

        let mut tok = from_buffer(bytes);
        let tag = parse_at(&mut tok).await.unwrap();

        assert_eq!(tag.items.len(), 3);
        assert_eq!(tag.frame.version, 2000);
        assert!(!tag.frame.is_header());
        assert_eq!(tag.len(), len);
        assert_eq!(tag.get("title").unwrap().text().as_deref(), Some("Song"));
        assert_eq!(tag.get("ARTIST").unwrap().value, b"One\0Two");
        assert_eq!(tok.position(), len);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn footer_is_found_ahead_of_id3v1() {
        let mut bytes = vec![0xAAu8; 300];
        bytes.extend(ape_tag(&items(), true));
        let mut id3v1 = b"TAG".to_vec();
        id3v1.resize(128, 0);
        bytes.extend(id3v1);

        let mut tok = from_buffer(bytes.clone());
        let tag = find_at_end(&mut tok).await.unwrap().unwrap();

        assert_eq!(tag.offset, 300);
        assert!(tag.frame.has_header());
        assert_eq!(tag.items[2].key, "Cover Art (Front)");
        assert_eq!(tok.position(), bytes.len() as u64 - 128);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn footer_only_tag_is_found() {
        let mut bytes = vec![0u8; 64];
        bytes.extend(ape_tag(&items(), false));

        let mut tok = from_buffer(bytes);
        let tag = find_at_end(&mut tok).await.unwrap().unwrap();
        assert_eq!(tag.offset, 64);
        assert!(!tag.frame.has_header());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn untagged_source_has_no_tag() {
        let mut tok = from_buffer(vec![0u8; 500]);
        assert_eq!(find_at_end(&mut tok).await.unwrap(), None);

        let mut tiny = from_buffer(vec![0u8; 5]);
        assert_eq!(find_at_end(&mut tiny).await.unwrap(), None);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn streams_cannot_search_backwards() {
        let bytes = ape_tag(&items(), false);
        let mut tok = StreamTokenizer::new(
            Cursor::new(bytes.clone()),
            FileInfo::with_size(bytes.len() as u64),
            &Config::default(),
        );
        assert!(matches!(
            find_at_end(&mut tok).await,
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn item_kinds_come_from_flag_bits() {
        let mut item = ApeItem::default();
        assert_eq!(item.kind(), ItemKind::Text);
        item.flags = 0b010;
        assert_eq!(item.kind(), ItemKind::Binary);
        assert_eq!(item.text(), None);
        item.flags = 0b100;
        assert_eq!(item.kind(), ItemKind::Locator);
    }
}
