//! RIFF/WAVE structure.

use super::{read_payload, tolerate_eof, Region};
use crate::{
    chunk::{walk, Action, ChunkFormat, ChunkHeader, ChunkId, ChunkVisitor},
    error::{Error, Result, StructureError},
    token::{trim_nul, FourCc, TextEncoding, Token, FOURCC, GUID, U16_LE, U32_LE},
    tokenizer::{Tokenizer, TokenizerExt},
    Config,
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

/// `WAVE_FORMAT_EXTENSIBLE`: the real format tag is the sub-format GUID.
pub const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// The `fmt ` chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WaveFormat {
    /// Format tag, e.g. 1 for PCM.
    pub format_tag: u16,
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample frames per second.
    pub sample_rate: u32,
    /// Average bytes per second.
    pub byte_rate: u32,
    /// Bytes per sample frame.
    pub block_align: u16,
    /// Bits per sample.
    pub bits_per_sample: u16,
    /// Present for [`FORMAT_EXTENSIBLE`] streams.
    pub extensible: Option<WaveExtensible>,
}

/// The `WAVEFORMATEXTENSIBLE` tail of a `fmt ` chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WaveExtensible {
    /// Bits of precision actually used.
    pub valid_bits_per_sample: u16,
    /// Speaker position bit mask.
    pub channel_mask: u32,
    /// Sub-format GUID. Its first two bytes hold the effective format tag.
    pub sub_format: Uuid,
}

impl WaveExtensible {
    /// The format tag embedded in the sub-format GUID.
    pub fn sub_format_tag(&self) -> u16 {
        let (d1, ..) = self.sub_format.as_fields();
        d1 as u16
    }
}

/// Decodes the 16-byte core of a `fmt ` chunk.
#[derive(Clone, Copy, Debug, Default)]
pub struct WaveFormatToken;

impl Token for WaveFormatToken {
    type Output = WaveFormat;

    fn len(&self) -> usize {
        16
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<WaveFormat> {
        Ok(WaveFormat {
            format_tag: U16_LE.decode(buf, offset)?,
            channels: U16_LE.decode(buf, offset + 2)?,
            sample_rate: U32_LE.decode(buf, offset + 4)?,
            byte_rate: U32_LE.decode(buf, offset + 8)?,
            block_align: U16_LE.decode(buf, offset + 12)?,
            bits_per_sample: U16_LE.decode(buf, offset + 14)?,
            extensible: None,
        })
    }
}

/// Structure of a RIFF file.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RiffInfo {
    /// Form type of the outer chunk, usually `WAVE`.
    pub form: Option<FourCc>,
    /// Decoded `fmt ` chunk.
    pub format: Option<WaveFormat>,
    /// Sample frame count from the `fact` chunk.
    pub sample_count: Option<u32>,
    /// Location of the `data` payload.
    pub data: Option<Region>,
    /// `LIST`/`INFO` text items, in file order.
    pub info: Vec<(FourCc, String)>,
    /// Location of an embedded ID3 tag chunk.
    pub id3: Option<Region>,
    /// Ids of every chunk inside the form, in file order.
    pub chunks: Vec<FourCc>,
    /// Whether the input ended before the declared structure did.
    pub truncated: bool,
}

impl RiffInfo {
    /// Duration in seconds, from the data length or the `fact` count.
    pub fn duration(&self) -> Option<f64> {
        let fmt = self.format?;
        if fmt.sample_rate == 0 {
            return None;
        }

        let frames = match (self.sample_count, self.data.and_then(|d| d.len)) {
            (Some(count), _) if fmt.format_tag != 1 => u64::from(count),
            (_, Some(len)) if fmt.block_align > 0 => len / u64::from(fmt.block_align),
            (Some(count), _) => u64::from(count),
            _ => return None,
        };

        Some(frames as f64 / f64::from(fmt.sample_rate))
    }
}

#[derive(Default)]
struct WaveVisitor {
    info: RiffInfo,
    list_type: Option<FourCc>,
}

#[async_trait]
impl ChunkVisitor for WaveVisitor {
    fn action(&mut self, path: &[ChunkId], header: &ChunkHeader) -> Action {
        match path {
            [riff] if *riff == *b"RIFF" => Action::Recurse,
            [_] => Action::Skip,
            [_, id] => {
                if let Some(cc) = id.fourcc() {
                    self.info.chunks.push(cc);
                }

                match id.fourcc().as_ref().map(FourCc::as_bytes) {
                    Some(b"fmt " | b"fact") => Action::Leaf,
                    Some(b"LIST") => Action::Recurse,
                    Some(b"data") => {
                        self.info.data = Some(Region::of(header));
                        Action::Skip
                    },
                    Some(cc) if cc.eq_ignore_ascii_case(b"id3 ") => {
                        self.info.id3 = Some(Region::of(header));
                        Action::Skip
                    },
                    _ => Action::Skip,
                }
            },
            [_, list, _] if *list == *b"LIST" && self.list_type == Some(FourCc::new(b"INFO")) =>
                Action::Leaf,
            _ => Action::Skip,
        }
    }

    async fn enter(
        &mut self,
        tok: &mut dyn Tokenizer,
        path: &[ChunkId],
        _header: &ChunkHeader,
    ) -> Result<()> {
        let kind = tok.read_token(&FOURCC).await?;
        if path.len() == 1 {
            self.info.form = Some(kind);
        } else {
            self.list_type = Some(kind);
        }
        Ok(())
    }

    async fn leaf(
        &mut self,
        tok: &mut dyn Tokenizer,
        path: &[ChunkId],
        header: &ChunkHeader,
    ) -> Result<()> {
        match path {
            [_, id] if *id == *b"fmt " => {
                let size = header.require_size()?;
                let mut format = tok.read_token(&WaveFormatToken).await?;

                if format.format_tag == FORMAT_EXTENSIBLE && size >= 40 {
                    let _cb_size = tok.read_number(U16_LE).await?;
                    format.extensible = Some(WaveExtensible {
                        valid_bits_per_sample: tok.read_number(U16_LE).await?,
                        channel_mask: tok.read_number(U32_LE).await?,
                        sub_format: tok.read_token(&GUID).await?,
                    });
                }

                self.info.format = Some(format);
            },
            [_, id] if *id == *b"fact" => {
                self.info.sample_count = Some(tok.read_number(U32_LE).await?);
            },
            [_, _, item] => {
                let raw = read_payload(tok, header).await?;
                if let Some(cc) = item.fourcc() {
                    let text = trim_nul(TextEncoding::Windows1252.decode(&raw));
                    self.info.info.push((cc, text));
                }
            },
            _ => {},
        }
        Ok(())
    }

    fn exit(&mut self, path: &[ChunkId], _header: &ChunkHeader) {
        if path.len() == 2 && path[1] == *b"LIST" {
            self.list_type = None;
        }
    }
}

/// Walks a RIFF file from the tokenizer's position.
#[instrument(skip(tok, config))]
pub async fn parse(tok: &mut dyn Tokenizer, config: &Config) -> Result<RiffInfo> {
    let magic = tok.peek_token(&FOURCC).await?;
    if magic != *b"RIFF" {
        return Err(Error::structure(StructureError::BadMagic {
            expected: "RIFF",
            found: magic.as_bytes().to_vec(),
        }));
    }

    let mut visitor = WaveVisitor::default();
    let res = walk(tok, ChunkFormat::Riff, &mut visitor, config, None).await;
    visitor.info.truncated = tolerate_eof(res, "RIFF")?;

    Ok(visitor.info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{from_buffer, test_sources::every_source};
    use utils::riff_chunk;

    fn pcm_fmt() -> Vec<u8> {
        let mut fmt = vec![];
        fmt.extend_from_slice(&1u16.to_le_bytes());
        fmt.extend_from_slice(&2u16.to_le_bytes());
        fmt.extend_from_slice(&44_100u32.to_le_bytes());
        fmt.extend_from_slice(&176_400u32.to_le_bytes());
        fmt.extend_from_slice(&4u16.to_le_bytes());
        fmt.extend_from_slice(&16u16.to_le_bytes());
        fmt
    }

    fn wave(body: &[u8]) -> Vec<u8> {
        let mut form = b"WAVE".to_vec();
        form.extend_from_slice(body);
        riff_chunk(b"RIFF", &form)
    }

    fn sample() -> Vec<u8> {
        let mut info = b"INFO".to_vec();
        info.extend(riff_chunk(b"INAM", b"Caf\xe9\0"));
        info.extend(riff_chunk(b"IART", b"Band\0\0"));

        let mut body = riff_chunk(b"fmt ", &pcm_fmt());
        body.extend(riff_chunk(b"LIST", &info));
        body.extend(riff_chunk(b"data", &[0u8; 441 * 4]));
        body.extend(riff_chunk(b"id3 ", &[0u8; 7]));
        wave(&body)
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn walks_wave_structure() {
        let bytes = sample();
        let mut srcs = every_source(&bytes, &Config::default()).await;

        for tok in srcs.all() {
            let info = parse(tok, &Config::default()).await.unwrap();

            assert_eq!(info.form, Some(FourCc::new(b"WAVE")));
            let fmt = info.format.unwrap();
            assert_eq!((fmt.channels, fmt.sample_rate, fmt.bits_per_sample), (2, 44_100, 16));
            assert_eq!(info.data, Some(Region {
                offset: 12 + 24 + 8 + 4 + 14 + 14 + 8,
                len: Some(1764),
            }));
            assert_eq!(info.info, vec![
                (FourCc::new(b"INAM"), "Café".to_string()),
                (FourCc::new(b"IART"), "Band".to_string()),
            ]);
            assert_eq!(info.id3.unwrap().len, Some(7));
            assert_eq!(info.duration(), Some(0.01));
            assert!(!info.truncated);
            assert_eq!(tok.position(), bytes.len() as u64);
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn info_serializes_with_readable_codes() {
        let mut tok = from_buffer(sample());
        let info = parse(&mut tok, &Config::default()).await.unwrap();

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["form"], "WAVE");
        assert_eq!(json["format"]["channels"], 2);
        assert_eq!(json["info"][0][0], "INAM");
        assert_eq!(json["truncated"], false);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn extensible_format_reads_sub_format() {
        let mut fmt = pcm_fmt();
        fmt[..2].copy_from_slice(&FORMAT_EXTENSIBLE.to_le_bytes());
        fmt.extend_from_slice(&22u16.to_le_bytes());
        fmt.extend_from_slice(&24u16.to_le_bytes());
        fmt.extend_from_slice(&3u32.to_le_bytes());
        let pcm = Uuid::parse_str("00000001-0000-0010-8000-00AA00389B71").unwrap();
        fmt.extend_from_slice(&pcm.to_bytes_le());

        let mut tok = from_buffer(wave(&riff_chunk(b"fmt ", &fmt)));
        let info = parse(&mut tok, &Config::default()).await.unwrap();

        let ext = info.format.unwrap().extensible.unwrap();
        assert_eq!(ext.valid_bits_per_sample, 24);
        assert_eq!(ext.channel_mask, 3);
        assert_eq!(ext.sub_format_tag(), 1);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn truncated_data_keeps_header_fields() {
        let mut bytes = sample();
        bytes.truncate(80);

        let mut tok = from_buffer(bytes);
        let info = parse(&mut tok, &Config::default()).await.unwrap();
        assert!(info.truncated);
        assert_eq!(info.format.unwrap().sample_rate, 44_100);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn other_forms_are_rejected() {
        let mut tok = from_buffer(b"FORM\0\0\0\x04AIFF".to_vec());
        let err = parse(&mut tok, &Config::default()).await.unwrap_err();
        assert!(err.is_structural());
    }
}
