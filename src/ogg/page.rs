use crate::{
    constants::{OGG_MAGIC, OGG_PAGE_HEADER_LEN},
    error::{Error, Result, StructureError},
    token::{window, BufferToken, Token, U32_LE, U64_LE, U8},
    tokenizer::{Tokenizer, TokenizerExt},
};
use serde::Serialize;

const FLAG_CONTINUED: u8 = 0x01;
const FLAG_FIRST_PAGE: u8 = 0x02;
const FLAG_LAST_PAGE: u8 = 0x04;

/// The fixed 27-byte header of an Ogg page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PageHeader {
    /// Stream structure version, always 0.
    pub version: u8,
    /// Header type flags.
    pub flags: u8,
    /// Codec-defined position of the last packet completed on this page.
    ///
    /// All ones when no packet completes here.
    pub granule_position: u64,
    /// Logical stream serial number.
    pub serial: u32,
    /// Page counter within the logical stream.
    pub sequence: u32,
    /// CRC-32 of the page, not verified.
    pub checksum: u32,
    /// Number of entries in the lacing table which follows.
    pub segment_count: u8,
}

impl PageHeader {
    /// The page's first segment continues a packet from the previous page.
    pub fn continued(&self) -> bool {
        self.flags & FLAG_CONTINUED != 0
    }

    /// Beginning of a logical stream.
    pub fn first_page(&self) -> bool {
        self.flags & FLAG_FIRST_PAGE != 0
    }

    /// End of a logical stream.
    pub fn last_page(&self) -> bool {
        self.flags & FLAG_LAST_PAGE != 0
    }

    /// Whether any packet completes on this page.
    pub fn has_granule(&self) -> bool {
        self.granule_position != u64::MAX
    }
}

/// Decodes a [`PageHeader`], checking the capture pattern.
#[derive(Clone, Copy, Debug, Default)]
pub struct PageHeaderToken;

impl Token for PageHeaderToken {
    type Output = PageHeader;

    fn len(&self) -> usize {
        OGG_PAGE_HEADER_LEN
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<PageHeader> {
        let magic = window(buf, offset, OGG_MAGIC.len())?;
        if magic != OGG_MAGIC {
            return Err(Error::structure(StructureError::BadMagic {
                expected: "OggS",
                found: magic.to_vec(),
            }));
        }

        Ok(PageHeader {
            version: U8.decode(buf, offset + 4)?,
            flags: U8.decode(buf, offset + 5)?,
            granule_position: U64_LE.decode(buf, offset + 6)?,
            serial: U32_LE.decode(buf, offset + 14)?,
            sequence: U32_LE.decode(buf, offset + 18)?,
            checksum: U32_LE.decode(buf, offset + 22)?,
            segment_count: U8.decode(buf, offset + 26)?,
        })
    }
}

/// Token for an Ogg page header.
pub const PAGE_HEADER: PageHeaderToken = PageHeaderToken;

/// One physical Ogg page: header, lacing table and payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    /// Absolute position of the capture pattern.
    pub offset: u64,
    /// The fixed header.
    pub header: PageHeader,
    /// Segment lengths. A value below 255 ends a packet.
    pub lacing: Vec<u8>,
    /// Concatenated segment data.
    pub payload: Vec<u8>,
}

impl Page {
    /// Reads one whole page at the tokenizer's position.
    pub async fn read(tok: &mut dyn Tokenizer) -> Result<Page> {
        let offset = tok.position();
        let header = tok.read_token(&PAGE_HEADER).await?;
        let lacing = tok
            .read_token(&BufferToken(usize::from(header.segment_count)))
            .await?;
        let payload_len = lacing.iter().map(|&l| usize::from(l)).sum();
        let payload = tok.read_token(&BufferToken(payload_len)).await?;

        Ok(Page {
            offset,
            header,
            lacing,
            payload,
        })
    }

    /// Bytes spanned by the page on disk.
    pub fn len(&self) -> u64 {
        (OGG_PAGE_HEADER_LEN + self.lacing.len() + self.payload.len()) as u64
    }

    /// Whether the page carries no segment data.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Whether the final segment runs on into the next page.
    pub fn ends_mid_packet(&self) -> bool {
        self.lacing.last() == Some(&255)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::test_data::OGG_SERIAL, tokenizer::from_buffer};
    use utils::ogg_page;

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn page_fields_and_lacing() {
        let bytes = ogg_page(0x02 | 0x04, 960, OGG_SERIAL, 3, &[&[1u8; 300], &[2u8; 4]]);
        let mut tok = from_buffer(bytes.clone());

        let page = Page::read(&mut tok).await.unwrap();
        assert!(page.header.first_page());
        assert!(page.header.last_page());
        assert!(!page.header.continued());
        assert_eq!(page.header.granule_position, 960);
        assert_eq!(page.header.serial, OGG_SERIAL);
        assert_eq!(page.header.sequence, 3);
        assert_eq!(page.lacing, vec![255, 45, 4]);
        assert_eq!(page.payload.len(), 304);
        assert_eq!(page.len(), bytes.len() as u64);
        assert!(!page.ends_mid_packet());
    }

    #[test]
    fn bad_capture_pattern_is_structural() {
        let mut bytes = ogg_page(0, 0, OGG_SERIAL, 0, &[]);
        bytes[0] = b'X';
        let err = PAGE_HEADER.decode(&bytes, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::Structure(StructureError::BadMagic { expected: "OggS", .. })
        ));
    }
}
