//! Native FLAC metadata blocks.

use super::{
    expect_magic,
    id3v2::{self, Id3v2Header},
    read_payload,
    tolerate_eof,
    Fields,
    Region,
    VorbisComments,
};
use crate::{
    chunk::{walk, Action, ChunkFormat, ChunkHeader, ChunkId, ChunkVisitor},
    constants::FLAC_MAGIC,
    error::Result,
    token::{bits, TextEncoding, FOURCC, U16_BE, U24_BE, U32_BE},
    tokenizer::{Tokenizer, TokenizerExt},
    Config,
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

/// `STREAMINFO` block type.
pub const STREAMINFO: u8 = 0;
/// `PADDING` block type.
pub const PADDING: u8 = 1;
/// `APPLICATION` block type.
pub const APPLICATION: u8 = 2;
/// `SEEKTABLE` block type.
pub const SEEKTABLE: u8 = 3;
/// `VORBIS_COMMENT` block type.
pub const VORBIS_COMMENT: u8 = 4;
/// `CUESHEET` block type.
pub const CUESHEET: u8 = 5;
/// `PICTURE` block type.
pub const PICTURE: u8 = 6;

const STREAMINFO_LEN: usize = 34;

/// The mandatory `STREAMINFO` block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    /// Smallest block size in samples.
    pub min_block_size: u16,
    /// Largest block size in samples.
    pub max_block_size: u16,
    /// Smallest frame in bytes, 0 if unknown.
    pub min_frame_size: u32,
    /// Largest frame in bytes, 0 if unknown.
    pub max_frame_size: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of channels.
    pub channels: u8,
    /// Bits per sample.
    pub bits_per_sample: u8,
    /// Total samples per channel, 0 if unknown.
    pub total_samples: u64,
    /// MD5 of the unencoded audio.
    pub md5: [u8; 16],
}

impl StreamInfo {
    /// Decodes the 34-byte block body.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut f = Fields::new(buf, "flac streaminfo");
        let min_block_size = f.number(U16_BE)?;
        let max_block_size = f.number(U16_BE)?;
        let min_frame_size = f.number(U24_BE)?;
        let max_frame_size = f.number(U24_BE)?;
        f.take(STREAMINFO_LEN - 10)?;

        let mut md5 = [0u8; 16];
        md5.copy_from_slice(&buf[18..STREAMINFO_LEN]);

        Ok(Self {
            min_block_size,
            max_block_size,
            min_frame_size,
            max_frame_size,
            sample_rate: bits::read_bits(buf, 10, 0, 20)?,
            channels: bits::read_bits(buf, 12, 4, 3)? as u8 + 1,
            bits_per_sample: bits::read_bits(buf, 12, 7, 5)? as u8 + 1,
            total_samples: bits::read_bits_u64(buf, 13, 4, 36)?,
            md5,
        })
    }

    /// Duration in seconds, if the sample count is known.
    pub fn duration(&self) -> Option<f64> {
        (self.sample_rate > 0 && self.total_samples > 0)
            .then(|| self.total_samples as f64 / f64::from(self.sample_rate))
    }
}

/// A `PICTURE` block. The image itself is left in place.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Picture {
    /// ID3v2 APIC picture type.
    pub kind: u32,
    /// MIME type of the image.
    pub mime_type: String,
    /// UTF-8 description.
    pub description: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Colour depth in bits per pixel.
    pub depth: u32,
    /// Palette size for indexed images.
    pub colors: u32,
    /// Location of the image data.
    pub data: Region,
}

impl Picture {
    fn decode(buf: &[u8], payload_offset: u64) -> Result<Self> {
        let mut f = Fields::new(buf, "flac picture");
        let kind = f.number(U32_BE)?;
        let mime_len = f.number(U32_BE)? as usize;
        let mime_type = TextEncoding::Ascii.decode(f.take(mime_len)?);
        let desc_len = f.number(U32_BE)? as usize;
        let description = TextEncoding::Utf8.decode(f.take(desc_len)?);
        let width = f.number(U32_BE)?;
        let height = f.number(U32_BE)?;
        let depth = f.number(U32_BE)?;
        let colors = f.number(U32_BE)?;
        let data_len = f.number(U32_BE)?;
        let data_offset = payload_offset + f.position() as u64;
        f.take(data_len as usize)?;

        Ok(Self {
            kind,
            mime_type,
            description,
            width,
            height,
            depth,
            colors,
            data: Region {
                offset: data_offset,
                len: Some(u64::from(data_len)),
            },
        })
    }
}

/// A metadata block header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Block type.
    pub kind: u8,
    /// Location of the block body.
    pub body: Region,
}

/// Structure of a native FLAC stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FlacInfo {
    /// ID3v2 tags skipped ahead of the `fLaC` marker.
    pub id3v2: Vec<Id3v2Header>,
    /// Decoded `STREAMINFO`.
    pub stream_info: Option<StreamInfo>,
    /// Decoded `VORBIS_COMMENT`.
    pub comments: Option<VorbisComments>,
    /// Decoded `PICTURE` blocks.
    pub pictures: Vec<Picture>,
    /// Every metadata block, in stream order.
    pub blocks: Vec<BlockInfo>,
    /// Position of the first audio frame, once the last block was seen.
    pub audio_offset: Option<u64>,
    /// Whether the input ended before the declared structure did.
    pub truncated: bool,
}

impl FlacInfo {
    /// Duration in seconds.
    pub fn duration(&self) -> Option<f64> {
        self.stream_info.as_ref()?.duration()
    }
}

#[derive(Default)]
struct FlacVisitor {
    info: FlacInfo,
    saw_last: bool,
}

#[async_trait]
impl ChunkVisitor for FlacVisitor {
    fn action(&mut self, path: &[ChunkId], header: &ChunkHeader) -> Action {
        let kind = match path {
            [ChunkId::Block(kind)] => *kind,
            _ => return Action::Skip,
        };

        self.info.blocks.push(BlockInfo {
            kind,
            body: Region::of(header),
        });
        self.saw_last |= header.last;

        match kind {
            STREAMINFO | VORBIS_COMMENT | PICTURE => Action::Leaf,
            _ => Action::Skip,
        }
    }

    async fn leaf(
        &mut self,
        tok: &mut dyn Tokenizer,
        path: &[ChunkId],
        header: &ChunkHeader,
    ) -> Result<()> {
        let buf = read_payload(tok, header).await?;

        match path {
            [ChunkId::Block(STREAMINFO)] => self.info.stream_info = Some(StreamInfo::decode(&buf)?),
            [ChunkId::Block(VORBIS_COMMENT)] => {
                let (comments, _) = VorbisComments::decode(&buf)?;
                self.info.comments = Some(comments);
            },
            [ChunkId::Block(PICTURE)] => self
                .info
                .pictures
                .push(Picture::decode(&buf, header.payload_offset())?),
            _ => {},
        }

        Ok(())
    }
}

/// Walks the metadata of a native FLAC stream, skipping any leading ID3v2 tags.
///
/// The tokenizer is left at the first audio frame.
#[instrument(skip(tok, config))]
pub async fn parse(tok: &mut dyn Tokenizer, config: &Config) -> Result<FlacInfo> {
    let id3v2 = id3v2::skip(tok).await?;

    let magic = tok.read_token(&FOURCC).await?;
    expect_magic(magic.as_bytes(), FLAC_MAGIC, "fLaC")?;

    let mut visitor = FlacVisitor::default();
    visitor.info.id3v2 = id3v2;

    let res = walk(tok, ChunkFormat::FlacBlock, &mut visitor, config, None).await;
    visitor.info.truncated = tolerate_eof(res, "FLAC")?;

    if visitor.saw_last && !visitor.info.truncated {
        visitor.info.audio_offset = Some(tok.position());
        debug!("FLAC audio frames start at {}.", tok.position());
    }

    Ok(visitor.info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        formats::vorbis::test_data::block,
        tokenizer::{from_buffer, test_sources::every_source},
    };
    use utils::{flac_block, id3v2_tag};

    fn streaminfo() -> Vec<u8> {
        let mut out = vec![];
        out.extend_from_slice(&4_096u16.to_be_bytes());
        out.extend_from_slice(&4_096u16.to_be_bytes());
        out.extend_from_slice(&[0, 0, 14, 0, 0x30, 0]);
        let packed = (44_100u64 << 44) | (1 << 41) | (15 << 36) | 441_000;
        out.extend_from_slice(&packed.to_be_bytes());
        out.extend_from_slice(&[0xAB; 16]);
        out
    }

    fn picture() -> Vec<u8> {
        let mut out = 3u32.to_be_bytes().to_vec();
        out.extend_from_slice(&10u32.to_be_bytes());
        out.extend_from_slice(b"image/jpeg");
        out.extend_from_slice(&5u32.to_be_bytes());
        out.extend_from_slice(b"Cover");
        for v in [500u32, 400, 24, 0, 6] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]);
        out
    }

    fn sample() -> Vec<u8> {
        let mut out = id3v2_tag(3, 0, 20);
        out.extend_from_slice(b"fLaC");
        out.extend(flac_block(STREAMINFO, false, &streaminfo()));
        out.extend(flac_block(SEEKTABLE, false, &[0u8; 18]));
        out.extend(flac_block(VORBIS_COMMENT, false, &block("ref", &["TITLE=Song"])));
        out.extend(flac_block(PICTURE, false, &picture()));
        out.extend(flac_block(PADDING, true, &[0u8; 100]));
        out.extend_from_slice(&[0xFF, 0xF8, 0x69, 0x08]);
        out
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn reads_metadata_blocks() {
        let bytes = sample();
        let mut srcs = every_source(&bytes, &Config::default()).await;

        for tok in srcs.all() {
            let info = parse(tok, &Config::default()).await.unwrap();

            assert_eq!(info.id3v2.len(), 1);
            let si = info.stream_info.unwrap();
            assert_eq!((si.sample_rate, si.channels, si.bits_per_sample), (44_100, 2, 16));
            assert_eq!(si.total_samples, 441_000);
            assert_eq!(si.min_frame_size, 14);
            assert_eq!(si.md5, [0xAB; 16]);
            assert_eq!(info.duration(), Some(10.0));

            let comments = info.comments.clone().unwrap();
            assert_eq!(comments.get("title").collect::<Vec<_>>(), ["Song"]);

            let pic = &info.pictures[0];
            assert_eq!((pic.kind, pic.width, pic.height), (3, 500, 400));
            assert_eq!(pic.mime_type, "image/jpeg");
            assert_eq!(pic.data.len, Some(6));

            let kinds: Vec<u8> = info.blocks.iter().map(|b| b.kind).collect();
            assert_eq!(kinds, [STREAMINFO, SEEKTABLE, VORBIS_COMMENT, PICTURE, PADDING]);
            assert_eq!(info.blocks[0].body.offset, 30 + 4 + 4);

            assert_eq!(info.audio_offset, Some(bytes.len() as u64 - 4));
            assert_eq!(tok.position(), bytes.len() as u64 - 4);
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn missing_marker_is_structural() {
        let mut tok = from_buffer(b"OggS\0\0\0\0".to_vec());
        assert!(parse(&mut tok, &Config::default()).await.unwrap_err().is_structural());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn truncated_metadata_keeps_streaminfo() {
        let mut bytes = b"fLaC".to_vec();
        bytes.extend(flac_block(STREAMINFO, false, &streaminfo()));
        bytes.extend(flac_block(PADDING, true, &[0u8; 100]));
        bytes.truncate(bytes.len() - 50);

        let mut tok = from_buffer(bytes);
        let info = parse(&mut tok, &Config::default()).await.unwrap();
        assert!(info.truncated);
        assert!(info.stream_info.is_some());
        assert_eq!(info.audio_offset, None);
    }
}
