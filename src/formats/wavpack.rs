//! WavPack block headers and metadata sub-blocks.

use super::{expect_magic, tolerate_eof, Fields, Region};
use crate::{
    constants::{WAVPACK_HEADER_LEN, WAVPACK_MAGIC},
    error::{Error, Result},
    token::{window, BufferToken, Token, U16_LE, U24_LE, U32_LE, U8},
    tokenizer::{ReadOptions, Tokenizer, TokenizerExt},
    Config,
};
use serde::Serialize;
use tracing::{debug, instrument, trace};

const FLAG_MONO: u32 = 1 << 2;
const FLAG_HYBRID: u32 = 1 << 3;
const FLAG_FLOAT: u32 = 1 << 7;
const FLAG_INITIAL_BLOCK: u32 = 1 << 11;
const FLAG_FINAL_BLOCK: u32 = 1 << 12;
const FLAG_DSD: u32 = 1 << 31;
const RATE_SHIFT: u32 = 23;
const RATE_MASK: u32 = 0xF;

const SAMPLE_RATES: [u32; 15] = [
    6_000, 8_000, 9_600, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000, 64_000,
    88_200, 96_000, 192_000,
];

const ID_FUNCTION: u8 = 0x3F;
const ID_ODD_SIZE: u8 = 0x40;
const ID_LARGE: u8 = 0x80;

/// Sub-block carrying channel count and mask.
pub const ID_CHANNEL_INFO: u8 = 0x0D;
/// Sub-block carrying a sample rate missing from the rate table.
pub const ID_SAMPLE_RATE: u8 = 0x27;

/// A decoded `wvpk` block header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    /// Block size excluding the first 8 bytes.
    pub block_size: u32,
    /// Stream version, 0x402 to 0x410.
    pub version: u16,
    /// Samples in the whole file, if known.
    pub total_samples: Option<u64>,
    /// Index of this block's first sample.
    pub block_index: u64,
    /// Samples in this block; 0 for metadata-only blocks.
    pub block_samples: u32,
    /// Flag word.
    pub flags: u32,
    /// CRC of the decoded samples.
    pub crc: u32,
}

impl BlockHeader {
    /// Bytes per stored sample, 1 to 4.
    pub fn bytes_per_sample(&self) -> u8 {
        (self.flags & 0b11) as u8 + 1
    }

    /// The block holds one channel.
    pub fn mono(&self) -> bool {
        self.flags & FLAG_MONO != 0
    }

    /// The block uses hybrid (lossy plus correction) mode.
    pub fn hybrid(&self) -> bool {
        self.flags & FLAG_HYBRID != 0
    }

    /// Samples are IEEE floats.
    pub fn float(&self) -> bool {
        self.flags & FLAG_FLOAT != 0
    }

    /// First block of a multichannel sequence.
    pub fn initial_block(&self) -> bool {
        self.flags & FLAG_INITIAL_BLOCK != 0
    }

    /// Last block of a multichannel sequence.
    pub fn final_block(&self) -> bool {
        self.flags & FLAG_FINAL_BLOCK != 0
    }

    /// Samples are DSD bits rather than PCM.
    pub fn dsd(&self) -> bool {
        self.flags & FLAG_DSD != 0
    }

    /// Index into the standard sample rate table; 15 means custom.
    pub fn rate_index(&self) -> u8 {
        ((self.flags >> RATE_SHIFT) & RATE_MASK) as u8
    }

    /// Sample rate from the table, if not custom.
    pub fn table_sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(usize::from(self.rate_index())).copied()
    }

    /// Bytes of sub-block data following the header.
    pub fn body_len(&self) -> u64 {
        (u64::from(self.block_size) + 8).saturating_sub(WAVPACK_HEADER_LEN)
    }
}

/// Decodes a [`BlockHeader`], checking the `wvpk` identifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockHeaderToken;

impl Token for BlockHeaderToken {
    type Output = BlockHeader;

    fn len(&self) -> usize {
        WAVPACK_HEADER_LEN as usize
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<BlockHeader> {
        expect_magic(window(buf, offset, 4)?, WAVPACK_MAGIC, "wvpk")?;

        let total_low = U32_LE.decode(buf, offset + 12)?;
        let total_high = U8.decode(buf, offset + 11)?;
        let total_samples = (total_low != u32::MAX)
            .then(|| (u64::from(total_high) << 32) | u64::from(total_low));
        let index_high = U8.decode(buf, offset + 10)?;

        Ok(BlockHeader {
            block_size: U32_LE.decode(buf, offset + 4)?,
            version: U16_LE.decode(buf, offset + 8)?,
            total_samples,
            block_index: (u64::from(index_high) << 32) | u64::from(U32_LE.decode(buf, offset + 16)?),
            block_samples: U32_LE.decode(buf, offset + 20)?,
            flags: U32_LE.decode(buf, offset + 24)?,
            crc: U32_LE.decode(buf, offset + 28)?,
        })
    }
}

/// Token for a WavPack block header.
pub const BLOCK_HEADER: BlockHeaderToken = BlockHeaderToken;

/// A metadata sub-block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubBlock {
    /// Function id, flag bits removed.
    pub function: u8,
    /// Location of the data, odd-size padding excluded.
    pub data: Region,
}

/// Structure of a WavPack file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WavPackInfo {
    /// Header of the first block.
    pub first_block: Option<BlockHeader>,
    /// Sub-blocks of the first block.
    pub sub_blocks: Vec<SubBlock>,
    /// Sample rate from the table or a sample rate sub-block.
    pub sample_rate: Option<u32>,
    /// Channel count from a channel info sub-block, or the mono flag.
    pub channels: Option<u32>,
    /// Number of blocks walked.
    pub blocks: u64,
    /// Sum of the per-block sample counts of initial blocks.
    pub block_samples: u64,
    /// Position after the last block, e.g. where an APE tag starts.
    pub end_offset: u64,
    /// Whether the input ended inside a block.
    pub truncated: bool,
}

impl WavPackInfo {
    /// Duration in seconds.
    pub fn duration(&self) -> Option<f64> {
        let rate = self.sample_rate.filter(|r| *r > 0)?;
        let samples = self
            .first_block
            .and_then(|b| b.total_samples)
            .unwrap_or(self.block_samples);
        Some(samples as f64 / f64::from(rate))
    }
}

/// Walks the metadata sub-blocks of one block body.
pub fn sub_blocks(body: &[u8], body_offset: u64) -> Result<Vec<(SubBlock, &[u8])>> {
    let mut f = Fields::new(body, "wavpack sub-block");
    let mut out = vec![];

    while f.remaining() > 0 {
        let id = f.number(U8)?;
        let words = if id & ID_LARGE != 0 {
            f.number(U24_LE)?
        } else {
            u32::from(f.number(U8)?)
        };

        let stored = words as usize * 2;
        let len = if id & ID_ODD_SIZE != 0 {
            stored.saturating_sub(1)
        } else {
            stored
        };
        let at = f.position();
        let data = f.take(stored)?;

        out.push((
            SubBlock {
                function: id & ID_FUNCTION,
                data: Region {
                    offset: body_offset + at as u64,
                    len: Some(len as u64),
                },
            },
            &data[..len],
        ));
    }

    Ok(out)
}

impl WavPackInfo {
    fn first(&mut self, header: BlockHeader, body: &[u8], body_offset: u64) -> Result<()> {
        self.sample_rate = header.table_sample_rate();
        self.channels = header.mono().then_some(1);

        for (sub, data) in sub_blocks(body, body_offset)? {
            trace!("WavPack sub-block {:#04x}, {:?} bytes.", sub.function, sub.data.len);
            match sub.function {
                ID_SAMPLE_RATE if data.len() >= 3 =>
                    self.sample_rate = Some(U24_LE.decode(data, 0)?),
                ID_CHANNEL_INFO if !data.is_empty() => self.channels = Some(u32::from(data[0])),
                _ => {},
            }
            self.sub_blocks.push(sub);
        }

        if header.dsd() {
            // The rate word counts DSD bytes; each carries eight 1-bit samples.
            self.sample_rate = self.sample_rate.map(|r| r * 8);
        }
        self.first_block = Some(header);

        Ok(())
    }

    async fn walk_blocks(&mut self, tok: &mut dyn Tokenizer) -> Result<()> {
        loop {
            let mut magic = [0u8; 4];
            let n = tok
                .peek_buffer(&mut magic, ReadOptions::default().may_be_less(true))
                .await?;
            if n < magic.len() || &magic != WAVPACK_MAGIC {
                break;
            }

            let header = tok.read_token(&BLOCK_HEADER).await?;
            self.blocks += 1;
            if header.initial_block() {
                self.block_samples += u64::from(header.block_samples);
            }

            if self.first_block.is_none() {
                let body_offset = tok.position();
                let len = usize::try_from(header.body_len())
                    .map_err(|_| Error::Unsupported("WavPack block larger than addressable memory"))?;
                let body = tok.read_token(&BufferToken(len)).await?;
                self.first(header, &body, body_offset)?;
            } else if tok.ignore(header.body_len()).await? < header.body_len() {
                return Err(Error::EndOfStream);
            }

            self.end_offset = tok.position();
        }

        Ok(())
    }
}

/// Walks every WavPack block from the tokenizer's position.
///
/// Stops at the first position not holding a block header, which is where
/// trailing tags begin.
#[instrument(skip(tok, _config))]
pub async fn parse(tok: &mut dyn Tokenizer, _config: &Config) -> Result<WavPackInfo> {
    let magic = tok.peek_token(&BufferToken(4)).await?;
    expect_magic(&magic, WAVPACK_MAGIC, "wvpk")?;

    let mut info = WavPackInfo {
        end_offset: tok.position(),
        ..Default::default()
    };
    let res = info.walk_blocks(tok).await;
    info.truncated = tolerate_eof(res, "WavPack")?;

    debug!("Walked {} WavPack blocks.", info.blocks);

    Ok(info)
}
