//! AIFF and AIFF-C structure.

use super::{expect_magic, read_payload, tolerate_eof, Region};
use crate::{
    chunk::{walk, Action, ChunkFormat, ChunkHeader, ChunkId, ChunkVisitor},
    error::Result,
    token::{trim_nul, FourCc, TextEncoding, F80_BE, FOURCC, U16_BE, U32_BE, U8},
    tokenizer::{Tokenizer, TokenizerExt},
    Config,
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

const COMM_LEN: u64 = 18;

/// The `COMM` chunk.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CommonChunk {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Number of sample frames.
    pub frames: u32,
    /// Bits per sample.
    pub sample_size: u16,
    /// Sample frames per second.
    pub sample_rate: f64,
    /// AIFF-C compression type.
    pub compression: Option<FourCc>,
    /// AIFF-C human-readable compression name.
    pub compression_name: Option<String>,
}

/// The `SSND` chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SoundData {
    /// Offset of the first sample frame past the 8-byte `SSND` prelude.
    pub offset: u32,
    /// Alignment block size.
    pub block_size: u32,
    /// Location of the sample frames.
    pub data: Region,
}

/// Structure of an AIFF or AIFF-C file.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AiffInfo {
    /// `AIFF` or `AIFC`.
    pub form: Option<FourCc>,
    /// Decoded `COMM` chunk.
    pub common: Option<CommonChunk>,
    /// Decoded `SSND` chunk.
    pub sound: Option<SoundData>,
    /// `NAME`, `AUTH`, `(c) ` and `ANNO` chunks, in file order.
    pub text: Vec<(FourCc, String)>,
    /// Location of an embedded `ID3 ` chunk.
    pub id3: Option<Region>,
    /// Ids of every chunk inside the form, in file order.
    pub chunks: Vec<FourCc>,
    /// Whether the input ended before the declared structure did.
    pub truncated: bool,
}

impl AiffInfo {
    /// Returns whether this is an AIFF-C file.
    pub fn is_aifc(&self) -> bool {
        self.form == Some(FourCc::new(b"AIFC"))
    }

    /// Duration in seconds.
    pub fn duration(&self) -> Option<f64> {
        let comm = self.common.as_ref()?;
        (comm.sample_rate > 0.0).then(|| f64::from(comm.frames) / comm.sample_rate)
    }
}

#[derive(Default)]
struct AiffVisitor {
    info: AiffInfo,
}

impl AiffVisitor {
    async fn read_common(&self, tok: &mut dyn Tokenizer, size: u64) -> Result<CommonChunk> {
        let mut comm = CommonChunk {
            channels: tok.read_number(U16_BE).await?,
            frames: tok.read_number(U32_BE).await?,
            sample_size: tok.read_number(U16_BE).await?,
            sample_rate: tok.read_number(F80_BE).await?,
            ..Default::default()
        };

        if self.info.is_aifc() && size >= COMM_LEN + 4 {
            comm.compression = Some(tok.read_token(&FOURCC).await?);

            // The pad byte after an odd name is chunk padding, not payload.
            let room = size - COMM_LEN - 4;
            if room > 0 {
                let len = u64::from(tok.read_number(U8).await?).min(room - 1);
                let name = tok.read_string(len as usize, TextEncoding::Latin1).await?;
                comm.compression_name = Some(name);
            }
        }

        Ok(comm)
    }
}

#[async_trait]
impl ChunkVisitor for AiffVisitor {
    fn action(&mut self, path: &[ChunkId], header: &ChunkHeader) -> Action {
        match path {
            [form] if *form == *b"FORM" => Action::Recurse,
            [_, id] => {
                let cc = match id.fourcc() {
                    Some(cc) => cc,
                    None => return Action::Skip,
                };
                self.info.chunks.push(cc);

                match cc.as_bytes() {
                    b"COMM" | b"SSND" | b"NAME" | b"AUTH" | b"(c) " | b"ANNO" => Action::Leaf,
                    b"ID3 " | b"id3 " => {
                        self.info.id3 = Some(Region::of(header));
                        Action::Skip
                    },
                    _ => Action::Skip,
                }
            },
            _ => Action::Skip,
        }
    }

    async fn enter(
        &mut self,
        tok: &mut dyn Tokenizer,
        _path: &[ChunkId],
        _header: &ChunkHeader,
    ) -> Result<()> {
        let form = tok.read_token(&FOURCC).await?;
        if form != *b"AIFF" && form != *b"AIFC" {
            expect_magic(form.as_bytes(), b"AIFF", "AIFF or AIFC")?;
        }
        self.info.form = Some(form);
        Ok(())
    }

    async fn leaf(
        &mut self,
        tok: &mut dyn Tokenizer,
        path: &[ChunkId],
        header: &ChunkHeader,
    ) -> Result<()> {
        let cc = match path.last().and_then(ChunkId::fourcc) {
            Some(cc) => cc,
            None => return Ok(()),
        };
        let size = header.require_size()?;

        match cc.as_bytes() {
            b"COMM" => {
                self.info.common = Some(self.read_common(tok, size).await?);
            },
            b"SSND" => {
                let offset = tok.read_number(U32_BE).await?;
                let block_size = tok.read_number(U32_BE).await?;
                let start = header.payload_offset() + 8;

                self.info.sound = Some(SoundData {
                    offset,
                    block_size,
                    data: Region {
                        offset: start + u64::from(offset),
                        len: Some(size.saturating_sub(8 + u64::from(offset))),
                    },
                });

                // Sample data is never decoded here.
                tok.ignore(size.saturating_sub(8)).await?;
            },
            _ => {
                let raw = read_payload(tok, header).await?;
                let text = trim_nul(TextEncoding::Latin1.decode(&raw));
                self.info.text.push((cc, text));
            },
        }

        Ok(())
    }
}

/// Walks an AIFF or AIFF-C file from the tokenizer's position.
#[instrument(skip(tok, config))]
pub async fn parse(tok: &mut dyn Tokenizer, config: &Config) -> Result<AiffInfo> {
    let magic = tok.peek_token(&FOURCC).await?;
    expect_magic(magic.as_bytes(), b"FORM", "FORM")?;

    let mut visitor = AiffVisitor::default();
    let res = walk(tok, ChunkFormat::Iff, &mut visitor, config, None).await;
    visitor.info.truncated = tolerate_eof(res, "AIFF")?;

    Ok(visitor.info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{from_buffer, test_sources::every_source};
    use utils::{f80_be, iff_chunk};

    fn comm(frames: u32, rate: u32, extra: &[u8]) -> Vec<u8> {
        let mut out = 2u16.to_be_bytes().to_vec();
        out.extend_from_slice(&frames.to_be_bytes());
        out.extend_from_slice(&16u16.to_be_bytes());
        out.extend_from_slice(&f80_be(rate));
        out.extend_from_slice(extra);
        out
    }

    fn form(kind: &[u8; 4], chunks: &[Vec<u8>]) -> Vec<u8> {
        let mut body = kind.to_vec();
        for chunk in chunks {
            body.extend_from_slice(chunk);
        }
        iff_chunk(b"FORM", &body)
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn walks_aiff_structure() {
        let mut ssnd = 4u32.to_be_bytes().to_vec();
        ssnd.extend_from_slice(&0u32.to_be_bytes());
        ssnd.extend_from_slice(&[0u8; 4 + 48_000 * 4]);

        let bytes = form(b"AIFF", &[
            iff_chunk(b"COMM", &comm(48_000, 48_000, &[])),
            iff_chunk(b"NAME", b"Track"),
            iff_chunk(b"SSND", &ssnd),
            iff_chunk(b"ID3 ", &[0u8; 10]),
        ]);
        let mut srcs = every_source(&bytes, &Config::default()).await;

        for tok in srcs.all() {
            let info = parse(tok, &Config::default()).await.unwrap();

            assert!(!info.is_aifc());
            let comm = info.common.clone().unwrap();
            assert_eq!((comm.channels, comm.sample_size), (2, 16));
            assert_eq!(comm.sample_rate, 48_000.0);
            assert_eq!(info.duration(), Some(1.0));
            assert_eq!(info.text, vec![(FourCc::new(b"NAME"), "Track".to_string())]);

            let sound = info.sound.unwrap();
            assert_eq!(sound.offset, 4);
            let ssnd_payload = 12 + (8 + 18) + (8 + 6) + 8;
            assert_eq!(sound.data, Region {
                offset: ssnd_payload + 8 + 4,
                len: Some(48_000 * 4),
            });
            assert_eq!(info.id3.unwrap().len, Some(10));
            assert_eq!(info.chunks.len(), 4);
            assert!(!info.truncated);
            assert_eq!(tok.position(), bytes.len() as u64);
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn aifc_reads_compression() {
        let mut extra = b"sowt".to_vec();
        extra.push(13);
        extra.extend_from_slice(b"little-endian");

        let bytes = form(b"AIFC", &[
            iff_chunk(b"FVER", &0xA280_5140u32.to_be_bytes()),
            iff_chunk(b"COMM", &comm(10, 44_100, &extra)),
        ]);

        let mut tok = from_buffer(bytes);
        let info = parse(&mut tok, &Config::default()).await.unwrap();

        assert!(info.is_aifc());
        let comm = info.common.unwrap();
        assert_eq!(comm.compression, Some(FourCc::new(b"sowt")));
        assert_eq!(comm.compression_name.as_deref(), Some("little-endian"));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn unknown_form_is_rejected() {
        let mut tok = from_buffer(form(b"8SVX", &[]));
        let err = parse(&mut tok, &Config::default()).await.unwrap_err();
        assert!(err.is_structural());
    }
}
