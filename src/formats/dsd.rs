//! Sony DSF and Philips DSDIFF structure.
//!
//! Both walkers stop at the start of the sample data, which is recorded by
//! location only.

use super::{expect_magic, read_payload, tolerate_eof, Fields, Region};
use crate::{
    chunk::{walk, Action, ChunkFormat, ChunkHeader, ChunkId, ChunkVisitor},
    error::{Error, Result, StructureError},
    token::{FourCc, TextEncoding, FOURCC, U16_BE, U32_BE, U32_LE, U64_LE, U8},
    tokenizer::{Tokenizer, TokenizerExt},
    Config,
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;

/// The DSF `fmt ` chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DsfFormat {
    /// Format version, 1.
    pub format_version: u32,
    /// 0 for raw DSD.
    pub format_id: u32,
    /// Speaker layout, 1 (mono) to 7 (5.1).
    pub channel_type: u32,
    /// Number of channels.
    pub channels: u32,
    /// Sampling frequency in Hz.
    pub sample_rate: u32,
    /// 1 or 8, giving the bit order within each byte.
    pub bits_per_sample: u32,
    /// Samples per channel.
    pub sample_count: u64,
    /// Bytes per channel block, 4096.
    pub block_size: u32,
}

/// Structure of a DSF file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DsfInfo {
    /// Total file size declared by the `DSD ` chunk.
    pub file_size: u64,
    /// Position of the trailing ID3v2 tag, if any.
    pub metadata_offset: Option<u64>,
    /// Decoded `fmt ` chunk.
    pub format: Option<DsfFormat>,
    /// Location of the sample data.
    pub data: Option<Region>,
    /// Whether the input ended before the declared structure did.
    pub truncated: bool,
}

impl DsfInfo {
    /// Duration in seconds.
    pub fn duration(&self) -> Option<f64> {
        let fmt = self.format?;
        (fmt.sample_rate > 0).then(|| fmt.sample_count as f64 / f64::from(fmt.sample_rate))
    }
}

/// The DSDIFF `ABSS` chunk: start time of the first sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AbsoluteStart {
    /// Hours.
    pub hours: u16,
    /// Minutes.
    pub minutes: u8,
    /// Seconds.
    pub seconds: u8,
    /// Samples into the second.
    pub samples: u32,
}

/// Structure of a DSDIFF file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DsdiffInfo {
    /// `FVER` format version.
    pub version: Option<u32>,
    /// `FS  ` sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// `CHNL` channel count.
    pub channels: Option<u16>,
    /// `CHNL` channel ids, e.g. `SLFT`.
    pub channel_ids: Vec<FourCc>,
    /// `CMPR` compression type, `DSD ` or `DST `.
    pub compression: Option<FourCc>,
    /// `CMPR` human-readable compression name.
    pub compression_name: Option<String>,
    /// `ABSS` start time.
    pub start: Option<AbsoluteStart>,
    /// Location of the `DSD ` or `DST ` sound data.
    pub data: Option<Region>,
    /// Whether the sound data is DST compressed.
    pub compressed: bool,
    /// Location of an `ID3 ` chunk seen before the sound data.
    pub id3: Option<Region>,
    /// Whether the input ended before the declared structure did.
    pub truncated: bool,
}

impl DsdiffInfo {
    /// Duration in seconds of uncompressed sound data.
    pub fn duration(&self) -> Option<f64> {
        if self.compressed {
            return None;
        }
        let bits = self.data?.len?.checked_mul(8)?;
        let per_second = u64::from(self.sample_rate?) * u64::from(self.channels?);
        (per_second > 0).then(|| bits as f64 / per_second as f64)
    }
}

/// Either DSD container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DsdInfo {
    /// A `.dsf` file.
    Dsf(DsfInfo),
    /// A `.dff` file.
    Dsdiff(DsdiffInfo),
}

#[derive(Default)]
struct DsfVisitor {
    info: DsfInfo,
    done: bool,
}

#[async_trait]
impl ChunkVisitor for DsfVisitor {
    fn action(&mut self, path: &[ChunkId], header: &ChunkHeader) -> Action {
        match path {
            [id] if *id == *b"DSD " || *id == *b"fmt " => Action::Leaf,
            [id] if *id == *b"data" => {
                self.info.data = Some(Region::of(header));
                self.done = true;
                Action::Skip
            },
            _ => Action::Skip,
        }
    }

    async fn leaf(
        &mut self,
        tok: &mut dyn Tokenizer,
        path: &[ChunkId],
        header: &ChunkHeader,
    ) -> Result<()> {
        if path[0] == *b"DSD " {
            self.info.file_size = tok.read_number(U64_LE).await?;
            let pointer = tok.read_number(U64_LE).await?;
            self.info.metadata_offset = (pointer != 0).then_some(pointer);
            return Ok(());
        }

        let buf = read_payload(tok, header).await?;
        let mut f = Fields::new(&buf, "dsf fmt");
        let format = DsfFormat {
            format_version: f.number(U32_LE)?,
            format_id: f.number(U32_LE)?,
            channel_type: f.number(U32_LE)?,
            channels: f.number(U32_LE)?,
            sample_rate: f.number(U32_LE)?,
            bits_per_sample: f.number(U32_LE)?,
            sample_count: f.number(U64_LE)?,
            block_size: f.number(U32_LE)?,
        };
        self.info.format = Some(format);

        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.done
    }
}

#[derive(Default)]
struct DsdiffVisitor {
    info: DsdiffInfo,
    done: bool,
}

impl DsdiffVisitor {
    fn decode(&mut self, cc: FourCc, buf: &[u8]) -> Result<()> {
        let mut f = Fields::new(buf, "dsdiff chunk");

        match cc.as_bytes() {
            b"FVER" => self.info.version = Some(f.number(U32_BE)?),
            b"FS  " => self.info.sample_rate = Some(f.number(U32_BE)?),
            b"CHNL" => {
                let count = f.number(U16_BE)?;
                self.info.channels = Some(count);
                for _ in 0..count {
                    self.info.channel_ids.push(f.fourcc()?);
                }
            },
            b"CMPR" => {
                self.info.compression = Some(f.fourcc()?);
                let len = usize::from(f.number(U8)?).min(f.remaining());
                self.info.compression_name = Some(TextEncoding::Latin1.decode(f.take(len)?));
            },
            b"ABSS" =>
                self.info.start = Some(AbsoluteStart {
                    hours: f.number(U16_BE)?,
                    minutes: f.number(U8)?,
                    seconds: f.number(U8)?,
                    samples: f.number(U32_BE)?,
                }),
            _ => {},
        }

        Ok(())
    }
}

#[async_trait]
impl ChunkVisitor for DsdiffVisitor {
    fn action(&mut self, path: &[ChunkId], header: &ChunkHeader) -> Action {
        let cc = path.last().and_then(ChunkId::fourcc).unwrap_or_default();

        match (path.len(), cc.as_bytes()) {
            (1, b"FRM8") => Action::Recurse,
            (2, b"FVER") => Action::Leaf,
            (2, b"PROP") => Action::Recurse,
            (2, b"DSD " | b"DST ") => {
                self.info.data = Some(Region::of(header));
                self.info.compressed = cc == *b"DST ";
                self.done = true;
                Action::Skip
            },
            (2, b"ID3 ") => {
                self.info.id3 = Some(Region::of(header));
                Action::Skip
            },
            (3, b"FS  " | b"CHNL" | b"CMPR" | b"ABSS") => Action::Leaf,
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
        match path.len() {
            1 => expect_magic(kind.as_bytes(), b"DSD ", "DSD form"),
            _ => expect_magic(kind.as_bytes(), b"SND ", "SND property"),
        }
    }

    async fn leaf(
        &mut self,
        tok: &mut dyn Tokenizer,
        _path: &[ChunkId],
        header: &ChunkHeader,
    ) -> Result<()> {
        let buf = read_payload(tok, header).await?;
        self.decode(header.id.fourcc().unwrap_or_default(), &buf)
    }

    fn should_stop(&self) -> bool {
        self.done
    }
}

/// Walks a DSF file up to its sample data.
#[instrument(skip(tok, config))]
pub async fn parse_dsf(tok: &mut dyn Tokenizer, config: &Config) -> Result<DsfInfo> {
    let magic = tok.peek_token(&FOURCC).await?;
    expect_magic(magic.as_bytes(), b"DSD ", "DSD ")?;

    let mut visitor = DsfVisitor::default();
    let res = walk(tok, ChunkFormat::Dsf, &mut visitor, config, None).await;
    visitor.info.truncated = tolerate_eof(res, "DSF")?;

    Ok(visitor.info)
}

/// Walks a DSDIFF file up to its sound data.
#[instrument(skip(tok, config))]
pub async fn parse_dsdiff(tok: &mut dyn Tokenizer, config: &Config) -> Result<DsdiffInfo> {
    let magic = tok.peek_token(&FOURCC).await?;
    expect_magic(magic.as_bytes(), b"FRM8", "FRM8")?;

    let mut visitor = DsdiffVisitor::default();
    let res = walk(tok, ChunkFormat::Dsdiff, &mut visitor, config, None).await;
    visitor.info.truncated = tolerate_eof(res, "DSDIFF")?;

    Ok(visitor.info)
}

/// Walks either DSD container, chosen by its leading magic.
pub async fn parse(tok: &mut dyn Tokenizer, config: &Config) -> Result<DsdInfo> {
    let magic = tok.peek_token(&FOURCC).await?;

    match magic.as_bytes() {
        b"DSD " => parse_dsf(tok, config).await.map(DsdInfo::Dsf),
        b"FRM8" => parse_dsdiff(tok, config).await.map(DsdInfo::Dsdiff),
        other => Err(Error::structure(StructureError::BadMagic {
            expected: "DSD or FRM8",
            found: other.to_vec(),
        })),
    }
}
