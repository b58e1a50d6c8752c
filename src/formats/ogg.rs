//! Ogg logical streams and their codec headers.
//!
//! Every page is read so that the final granule position of each stream is
//! known. Audio packets are counted and dropped.

use super::{expect_magic, flac::StreamInfo, tolerate_eof, Fields, VorbisComments};
use crate::{
    constants::OGG_MAGIC,
    error::Result,
    ogg::{Packet, PacketReader},
    token::{FOURCC, I16_LE, I32_LE, U16_LE, U32_LE, U8},
    tokenizer::{Tokenizer, TokenizerExt},
    Config,
};
use serde::Serialize;
use tracing::{debug, instrument};

const VORBIS_IDENT: &[u8] = b"\x01vorbis";
const VORBIS_COMMENT: &[u8] = b"\x03vorbis";
const OPUS_HEAD: &[u8] = b"OpusHead";
const OPUS_TAGS: &[u8] = b"OpusTags";
const FLAC_MAPPING: &[u8] = b"\x7FFLAC";
const SPEEX_HEADER: &[u8] = b"Speex   ";

/// Opus always runs its granule clock at 48kHz.
pub const OPUS_GRANULE_RATE: u32 = 48_000;

/// Codec carried by a logical stream, from its first packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Codec {
    /// Xiph Vorbis.
    Vorbis,
    /// Opus.
    Opus,
    /// FLAC in its Ogg mapping.
    Flac,
    /// Speex.
    Speex,
    /// Anything else.
    #[default]
    Unknown,
}

/// A Vorbis identification header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VorbisIdent {
    /// Vorbis version, always 0.
    pub version: u32,
    /// Channel count.
    pub channels: u8,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Maximum bitrate hint.
    pub bitrate_max: i32,
    /// Nominal bitrate hint.
    pub bitrate_nominal: i32,
    /// Minimum bitrate hint.
    pub bitrate_min: i32,
}

/// An `OpusHead` packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OpusHead {
    /// Encapsulation version.
    pub version: u8,
    /// Output channel count.
    pub channels: u8,
    /// Samples at 48kHz to discard from the decoder output.
    pub pre_skip: u16,
    /// Sample rate of the original input, informational.
    pub input_sample_rate: u32,
    /// Output gain in Q7.8 dB.
    pub output_gain: i16,
    /// Channel mapping family.
    pub mapping_family: u8,
}

/// The fields of a Speex header needed for timing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SpeexHeader {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
}

/// One logical stream of an Ogg file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OggStream {
    /// Stream serial number.
    pub serial: u32,
    /// Detected codec.
    pub codec: Codec,
    /// Vorbis identification header.
    pub vorbis: Option<VorbisIdent>,
    /// Opus identification header.
    pub opus: Option<OpusHead>,
    /// `STREAMINFO` of an Ogg FLAC stream.
    pub flac: Option<StreamInfo>,
    /// Speex header.
    pub speex: Option<SpeexHeader>,
    /// Comment header.
    pub comments: Option<VorbisComments>,
    /// Granule position of the last page which completed a packet.
    pub last_granule: Option<u64>,
    /// Packets read.
    pub packets: u64,
    /// Whether the stream's last page was seen.
    pub ended: bool,
}

impl OggStream {
    /// Rate of this stream's granule clock.
    pub fn granule_rate(&self) -> Option<u32> {
        match self.codec {
            Codec::Vorbis => self.vorbis.map(|v| v.sample_rate),
            Codec::Opus => Some(OPUS_GRANULE_RATE),
            Codec::Flac => self.flac.map(|f| f.sample_rate),
            Codec::Speex => self.speex.map(|s| s.sample_rate),
            Codec::Unknown => None,
        }
    }

    /// Duration in seconds, from the last granule position.
    pub fn duration(&self) -> Option<f64> {
        let rate = self.granule_rate().filter(|r| *r > 0)?;
        let mut granule = self.last_granule?;
        if let Some(opus) = self.opus {
            granule = granule.saturating_sub(u64::from(opus.pre_skip));
        }
        Some(granule as f64 / f64::from(rate))
    }

    fn ingest(&mut self, packet: &Packet) -> Result<()> {
        self.packets += 1;
        self.ended |= packet.last;
        if packet.granule_position != u64::MAX {
            self.last_granule = Some(packet.granule_position);
        }

        let data = &packet.data[..];
        if self.packets == 1 {
            return self.identify(data);
        }

        match self.codec {
            Codec::Vorbis if data.starts_with(VORBIS_COMMENT) =>
                self.comments = Some(VorbisComments::decode(&data[VORBIS_COMMENT.len()..])?.0),
            Codec::Opus if data.starts_with(OPUS_TAGS) =>
                self.comments = Some(VorbisComments::decode(&data[OPUS_TAGS.len()..])?.0),
            Codec::Flac if data.first().map(|b| b & 0x7F) == Some(super::flac::VORBIS_COMMENT) =>
                self.comments = Some(VorbisComments::decode(data.get(4..).unwrap_or_default())?.0),
            Codec::Speex if self.packets == 2 =>
                self.comments = Some(VorbisComments::decode(data)?.0),
            _ => {},
        }

        Ok(())
    }

    fn identify(&mut self, data: &[u8]) -> Result<()> {
        if let Some(rest) = data.strip_prefix(VORBIS_IDENT) {
            let mut f = Fields::new(rest, "vorbis identification header");
            self.codec = Codec::Vorbis;
            self.vorbis = Some(VorbisIdent {
                version: f.number(U32_LE)?,
                channels: f.number(U8)?,
                sample_rate: f.number(U32_LE)?,
                bitrate_max: f.number(I32_LE)?,
                bitrate_nominal: f.number(I32_LE)?,
                bitrate_min: f.number(I32_LE)?,
            });
        } else if let Some(rest) = data.strip_prefix(OPUS_HEAD) {
            let mut f = Fields::new(rest, "opus header");
            self.codec = Codec::Opus;
            self.opus = Some(OpusHead {
                version: f.number(U8)?,
                channels: f.number(U8)?,
                pre_skip: f.number(U16_LE)?,
                input_sample_rate: f.number(U32_LE)?,
                output_gain: f.number(I16_LE)?,
                mapping_family: f.number(U8)?,
            });
        } else if let Some(rest) = data.strip_prefix(FLAC_MAPPING) {
            let mut f = Fields::new(rest, "ogg flac header");
            // Mapping version, header packet count, `fLaC`, block header.
            f.skip(2 + 2)?;
            expect_magic(f.take(4)?, b"fLaC", "fLaC")?;
            f.skip(4)?;
            self.codec = Codec::Flac;
            self.flac = Some(StreamInfo::decode(f.rest())?);
        } else if data.starts_with(SPEEX_HEADER) {
            let mut f = Fields::new(data, "speex header");
            f.skip(36)?;
            let sample_rate = f.number(U32_LE)?;
            f.skip(8)?;
            self.codec = Codec::Speex;
            self.speex = Some(SpeexHeader {
                sample_rate,
                channels: f.number(U32_LE)?,
            });
        } else {
            debug!("Ogg stream {:#010x} carries an unknown codec.", self.serial);
        }

        Ok(())
    }
}

/// Structure of an Ogg file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OggInfo {
    /// Logical streams, in order of first appearance.
    pub streams: Vec<OggStream>,
    /// Pages read.
    pub pages: u64,
    /// Whether the input ended mid-page.
    pub truncated: bool,
}

impl OggInfo {
    /// The stream with serial number `serial`.
    pub fn stream(&self, serial: u32) -> Option<&OggStream> {
        self.streams.iter().find(|s| s.serial == serial)
    }

    /// Duration of the first stream with a known clock.
    pub fn duration(&self) -> Option<f64> {
        self.streams.iter().find_map(OggStream::duration)
    }

    fn ingest(&mut self, packet: &Packet) -> Result<()> {
        let index = match self.streams.iter().position(|s| s.serial == packet.serial) {
            Some(index) => index,
            None => {
                self.streams.push(OggStream {
                    serial: packet.serial,
                    ..Default::default()
                });
                self.streams.len() - 1
            },
        };

        self.streams[index].ingest(packet)
    }
}

async fn collect(reader: &mut PacketReader<'_>, info: &mut OggInfo) -> Result<()> {
    while let Some(packet) = reader.next_packet().await? {
        info.ingest(&packet)?;
    }
    Ok(())
}

/// Reads every page of an Ogg file from the tokenizer's position.
#[instrument(skip(tok, config))]
pub async fn parse(tok: &mut dyn Tokenizer, config: &Config) -> Result<OggInfo> {
    let magic = tok.peek_token(&FOURCC).await?;
    expect_magic(magic.as_bytes(), OGG_MAGIC, "OggS")?;

    let mut info = OggInfo::default();
    let mut reader = PacketReader::new(tok, config);
    let res = collect(&mut reader, &mut info).await;
    info.truncated = tolerate_eof(res, "Ogg")?;
    info.pages = reader.pages();

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        formats::vorbis::test_data::block,
        tokenizer::{from_buffer, test_sources::every_source},
    };
    use utils::ogg_page;

    const VORBIS_SERIAL: u32 = 0x0102_0304;
    const OPUS_SERIAL: u32 = 0x0A0B_0C0D;

    fn vorbis_ident() -> Vec<u8> {
        let mut out = VORBIS_IDENT.to_vec();
        out.extend_from_slice(&0u32.to_le_bytes());
        out.push(2);
        out.extend_from_slice(&44_100u32.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&128_000i32.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&[0xB8, 1]);
        out
    }

    fn opus_head() -> Vec<u8> {
        let mut out = OPUS_HEAD.to_vec();
        out.extend_from_slice(&[1, 2]);
        out.extend_from_slice(&312u16.to_le_bytes());
        out.extend_from_slice(&44_100u32.to_le_bytes());
        out.extend_from_slice(&0i16.to_le_bytes());
        out.push(0);
        out
    }

    fn tags(prefix: &[u8], title: &str) -> Vec<u8> {
        let mut out = prefix.to_vec();
        out.extend(block("enc", &[title]));
        out
    }

    fn sample() -> Vec<u8> {
        let mut out = vec![];
        out.extend(ogg_page(0x02, 0, VORBIS_SERIAL, 0, &[&vorbis_ident()]));
        out.extend(ogg_page(0x02, 0, OPUS_SERIAL, 0, &[&opus_head()]));
        out.extend(ogg_page(0, 0, VORBIS_SERIAL, 1, &[
            &tags(VORBIS_COMMENT, "TITLE=Vorbis"),
            &[5u8; 40],
        ]));
        out.extend(ogg_page(0, 0, OPUS_SERIAL, 1, &[&tags(OPUS_TAGS, "TITLE=Opus")]));
        out.extend(ogg_page(0, 44_100, VORBIS_SERIAL, 2, &[&[0u8; 300], &[0u8; 10]]));
        out.extend(ogg_page(0x04, 88_200, VORBIS_SERIAL, 3, &[&[0u8; 20]]));
        out.extend(ogg_page(0x04, 3 * 48_000 + 312, OPUS_SERIAL, 2, &[&[0u8; 60]]));
        out
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn identifies_multiplexed_streams() {
        let bytes = sample();
        let mut srcs = every_source(&bytes, &Config::default()).await;

        for tok in srcs.all() {
            let info = parse(tok, &Config::default()).await.unwrap();

            assert_eq!(info.pages, 7);
            assert_eq!(info.streams.len(), 2);
            assert!(!info.truncated);

            let vorbis = info.stream(VORBIS_SERIAL).unwrap();
            assert_eq!(vorbis.codec, Codec::Vorbis);
            assert_eq!(vorbis.vorbis.unwrap().bitrate_nominal, 128_000);
            assert_eq!(vorbis.packets, 6);
            assert!(vorbis.ended);
            let comments = vorbis.comments.as_ref().unwrap();
            assert_eq!(comments.get("title").collect::<Vec<_>>(), ["Vorbis"]);
            assert_eq!(vorbis.duration(), Some(2.0));

            let opus = info.stream(OPUS_SERIAL).unwrap();
            assert_eq!(opus.codec, Codec::Opus);
            assert_eq!(opus.opus.unwrap().pre_skip, 312);
            assert_eq!(opus.duration(), Some(3.0));
            assert_eq!(info.duration(), Some(2.0));

            assert_eq!(tok.position(), bytes.len() as u64);
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn truncated_page_keeps_headers() {
        let mut bytes = sample();
        bytes.truncate(bytes.len() - 30);

        let mut tok = from_buffer(bytes);
        let info = parse(&mut tok, &Config::default()).await.unwrap();

        assert!(info.truncated);
        let opus = info.stream(OPUS_SERIAL).unwrap();
        assert!(!opus.ended);
        assert!(opus.comments.is_some());
        assert_eq!(opus.last_granule, Some(0));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn unknown_codec_is_kept() {
        let bytes = ogg_page(0x06, 0, 7, 0, &[b"\x80theora"]);
        let mut tok = from_buffer(bytes);
        let info = parse(&mut tok, &Config::default()).await.unwrap();

        assert_eq!(info.streams[0].codec, Codec::Unknown);
        assert_eq!(info.duration(), None);
    }
}
