//! ASF (WMA, WMV) header objects.
//!
//! The walk ends once the Data object's header has been read: everything
//! describing the file lives in the Header object in front of it.

use super::{read_payload, tolerate_eof, Fields, Region};
use crate::{
    chunk::{walk, Action, ChunkFormat, ChunkHeader, ChunkId, ChunkVisitor},
    error::{Error, Result, StructureError},
    token::{trim_nul, TextEncoding, Token, GUID, U16_LE, U32_LE, U64_LE},
    tokenizer::{Tokenizer, TokenizerExt},
    Config,
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{instrument, trace};
use uuid::Uuid;

/// Top-level object holding every other header object.
pub const HEADER_OBJECT: Uuid = Uuid::from_u128(0x75B2_2630_668E_11CF_A6D9_00AA_0062_CE6C);
/// Object holding the packetised media.
pub const DATA_OBJECT: Uuid = Uuid::from_u128(0x75B2_2636_668E_11CF_A6D9_00AA_0062_CE6C);
/// Global file attributes.
pub const FILE_PROPERTIES: Uuid = Uuid::from_u128(0x8CAB_DCA1_A947_11CF_8EE4_00C0_0C20_5365);
/// One media stream.
pub const STREAM_PROPERTIES: Uuid = Uuid::from_u128(0xB7DC_0791_A9B7_11CF_8EE6_00C0_0C20_5365);
/// Title, author, copyright, description and rating.
pub const CONTENT_DESCRIPTION: Uuid = Uuid::from_u128(0x75B2_2633_668E_11CF_A6D9_00AA_0062_CE6C);
/// Arbitrary named attributes.
pub const EXTENDED_CONTENT_DESCRIPTION: Uuid =
    Uuid::from_u128(0xD2D0_A440_E307_11D2_97F0_00A0_C95E_A850);
/// Stream type of audio streams.
pub const AUDIO_MEDIA: Uuid = Uuid::from_u128(0xF869_9E40_5B4D_11CF_A8FD_0080_5F5C_442B);

/// The File Properties object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FileProperties {
    /// Unique id of the file.
    pub file_id: Uuid,
    /// Size of the whole file in bytes.
    pub file_size: u64,
    /// Creation time, in 100ns units since 1601-01-01.
    pub creation_date: u64,
    /// Number of data packets.
    pub data_packets: u64,
    /// Playback duration in 100ns units, preroll included.
    pub play_duration: u64,
    /// Send duration in 100ns units.
    pub send_duration: u64,
    /// Buffering time in milliseconds.
    pub preroll: u64,
    /// Broadcast and seekable flags.
    pub flags: u32,
    /// Minimum data packet size.
    pub min_packet_size: u32,
    /// Maximum data packet size.
    pub max_packet_size: u32,
    /// Maximum instantaneous bit rate.
    pub max_bitrate: u32,
}

/// `WAVEFORMATEX` carried by audio streams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AudioFormat {
    /// Codec id.
    pub format_tag: u16,
    /// Number of channels.
    pub channels: u16,
    /// Samples per second.
    pub sample_rate: u32,
    /// Average bytes per second.
    pub byte_rate: u32,
    /// Block alignment.
    pub block_align: u16,
    /// Bits per sample.
    pub bits_per_sample: u16,
}

/// A Stream Properties object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamProperties {
    /// Stream type, e.g. [`AUDIO_MEDIA`].
    pub stream_type: Uuid,
    /// Error correction type.
    pub error_correction: Uuid,
    /// Presentation time offset in 100ns units.
    pub time_offset: u64,
    /// Stream number, 1 to 127.
    pub stream_number: u8,
    /// Stream is encrypted.
    pub encrypted: bool,
    /// Decoded type-specific data for audio streams.
    pub audio: Option<AudioFormat>,
    /// Raw type-specific data.
    pub type_specific: Vec<u8>,
}

/// The Content Description object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ContentDescription {
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Copyright notice.
    pub copyright: String,
    /// Free-form description.
    pub description: String,
    /// Rating.
    pub rating: String,
}

/// One attribute of the Extended Content Description object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExtendedDescriptor {
    /// Attribute name.
    pub name: String,
    /// Value type: 0 string, 1 bytes, 2 bool, 3 dword, 4 qword, 5 word.
    pub value_type: u16,
    /// Raw value bytes.
    pub value: Vec<u8>,
}

/// Header structure of an ASF file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AsfInfo {
    /// Child count declared by the Header object.
    pub header_objects: u32,
    /// Decoded File Properties object.
    pub file: Option<FileProperties>,
    /// Stream Properties objects, in file order.
    pub streams: Vec<StreamProperties>,
    /// Decoded Content Description object.
    pub content: Option<ContentDescription>,
    /// Extended Content Description attributes, in stored order.
    pub extended: Vec<ExtendedDescriptor>,
    /// Location of the Data object's payload.
    pub data: Option<Region>,
    /// Ids of every object inside the Header object, in file order.
    pub objects: Vec<Uuid>,
    /// Whether the input ended before the declared structure did.
    pub truncated: bool,
}

impl AsfInfo {
    /// Playback duration in seconds, preroll excluded.
    pub fn duration(&self) -> Option<f64> {
        let file = self.file?;
        let secs = file.play_duration as f64 / 10_000_000.0 - file.preroll as f64 / 1_000.0;
        (secs > 0.0).then_some(secs)
    }
}

fn utf16(raw: &[u8]) -> String {
    trim_nul(TextEncoding::Utf16Le.decode(raw))
}

fn file_properties(f: &mut Fields<'_>) -> Result<FileProperties> {
    let mut file_id = [0u8; 16];
    file_id.copy_from_slice(f.take(16)?);

    Ok(FileProperties {
        file_id: Uuid::from_bytes_le(file_id),
        file_size: f.number(U64_LE)?,
        creation_date: f.number(U64_LE)?,
        data_packets: f.number(U64_LE)?,
        play_duration: f.number(U64_LE)?,
        send_duration: f.number(U64_LE)?,
        preroll: f.number(U64_LE)?,
        flags: f.number(U32_LE)?,
        min_packet_size: f.number(U32_LE)?,
        max_packet_size: f.number(U32_LE)?,
        max_bitrate: f.number(U32_LE)?,
    })
}

fn guid(f: &mut Fields<'_>) -> Result<Uuid> {
    let raw = f.take(16)?;
    GUID.decode(raw, 0)
}

fn stream_properties(f: &mut Fields<'_>) -> Result<StreamProperties> {
    let stream_type = guid(f)?;
    let error_correction = guid(f)?;
    let time_offset = f.number(U64_LE)?;
    let type_len = f.number(U32_LE)? as usize;
    let _error_len = f.number(U32_LE)?;
    let flags = f.number(U16_LE)?;
    f.skip(4)?;
    let type_specific = f.take(type_len)?.to_vec();

    let audio = if stream_type == AUDIO_MEDIA && type_specific.len() >= 16 {
        let mut w = Fields::new(&type_specific, "asf waveformatex");
        Some(AudioFormat {
            format_tag: w.number(U16_LE)?,
            channels: w.number(U16_LE)?,
            sample_rate: w.number(U32_LE)?,
            byte_rate: w.number(U32_LE)?,
            block_align: w.number(U16_LE)?,
            bits_per_sample: w.number(U16_LE)?,
        })
    } else {
        None
    };

    Ok(StreamProperties {
        stream_type,
        error_correction,
        time_offset,
        stream_number: (flags & 0x7F) as u8,
        encrypted: flags & 0x8000 != 0,
        audio,
        type_specific,
    })
}

fn content_description(f: &mut Fields<'_>) -> Result<ContentDescription> {
    let mut lens = [0usize; 5];
    for len in &mut lens {
        *len = usize::from(f.number(U16_LE)?);
    }

    let [title, author, copyright, description, rating] = lens;
    Ok(ContentDescription {
        title: utf16(f.take(title)?),
        author: utf16(f.take(author)?),
        copyright: utf16(f.take(copyright)?),
        description: utf16(f.take(description)?),
        rating: utf16(f.take(rating)?),
    })
}

fn extended_content(f: &mut Fields<'_>) -> Result<Vec<ExtendedDescriptor>> {
    let count = f.number(U16_LE)?;
    let mut out = Vec::with_capacity(usize::from(count));

    for _ in 0..count {
        let name_len = usize::from(f.number(U16_LE)?);
        let name = utf16(f.take(name_len)?);
        let value_type = f.number(U16_LE)?;
        let value_len = usize::from(f.number(U16_LE)?);
        let value = f.take(value_len)?.to_vec();

        out.push(ExtendedDescriptor {
            name,
            value_type,
            value,
        });
    }

    Ok(out)
}

#[derive(Default)]
struct AsfVisitor {
    info: AsfInfo,
    done: bool,
}

#[async_trait]
impl ChunkVisitor for AsfVisitor {
    fn action(&mut self, path: &[ChunkId], header: &ChunkHeader) -> Action {
        let id = match path.last().and_then(ChunkId::guid) {
            Some(id) => id,
            None => return Action::Skip,
        };

        match path.len() {
            1 if id == HEADER_OBJECT => Action::Recurse,
            1 if id == DATA_OBJECT => {
                self.info.data = Some(Region {
                    // File id, packet count and two reserved bytes precede the packets.
                    offset: header.payload_offset() + 26,
                    len: header.size.map(|s| s.saturating_sub(26)),
                });
                self.done = true;
                Action::Skip
            },
            2 => {
                self.info.objects.push(id);
                if [
                    FILE_PROPERTIES,
                    STREAM_PROPERTIES,
                    CONTENT_DESCRIPTION,
                    EXTENDED_CONTENT_DESCRIPTION,
                ]
                .contains(&id)
                {
                    Action::Leaf
                } else {
                    trace!("Skipping ASF object {}.", id);
                    Action::Skip
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
        self.info.header_objects = tok.read_number(U32_LE).await?;
        tok.ignore(2).await?;
        Ok(())
    }

    async fn leaf(
        &mut self,
        tok: &mut dyn Tokenizer,
        _path: &[ChunkId],
        header: &ChunkHeader,
    ) -> Result<()> {
        let buf = read_payload(tok, header).await?;
        let mut f = Fields::new(&buf, "asf object");

        match header.id.guid() {
            Some(id) if id == FILE_PROPERTIES => self.info.file = Some(file_properties(&mut f)?),
            Some(id) if id == STREAM_PROPERTIES =>
                self.info.streams.push(stream_properties(&mut f)?),
            Some(id) if id == CONTENT_DESCRIPTION =>
                self.info.content = Some(content_description(&mut f)?),
            Some(id) if id == EXTENDED_CONTENT_DESCRIPTION =>
                self.info.extended = extended_content(&mut f)?,
            _ => {},
        }

        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.done
    }
}

/// Walks the header of an ASF file, stopping at the Data object.
#[instrument(skip(tok, config))]
pub async fn parse(tok: &mut dyn Tokenizer, config: &Config) -> Result<AsfInfo> {
    let id = tok.peek_token(&GUID).await?;
    if id != HEADER_OBJECT {
        return Err(Error::structure(StructureError::BadMagic {
            expected: "ASF header object",
            found: id.to_bytes_le().to_vec(),
        }));
    }

    let mut visitor = AsfVisitor::default();
    let res = walk(tok, ChunkFormat::Asf, &mut visitor, config, None).await;
    visitor.info.truncated = tolerate_eof(res, "ASF")?;

    Ok(visitor.info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{from_buffer, test_sources::every_source};
    use utils::{asf_object, utf16le};

    fn object(id: Uuid, payload: &[u8]) -> Vec<u8> {
        asf_object(&id.to_bytes_le(), payload)
    }

    fn file_props() -> Vec<u8> {
        let mut body = vec![0u8; 16];
        for v in [4_096u64, 0, 10, 40_000_000, 40_000_000, 3_000] {
            body.extend_from_slice(&v.to_le_bytes());
        }
        for v in [2u32, 3_200, 3_200, 128_000] {
            body.extend_from_slice(&v.to_le_bytes());
        }
        object(FILE_PROPERTIES, &body)
    }

    fn audio_stream() -> Vec<u8> {
        let mut wfx = vec![];
        wfx.extend_from_slice(&0x161u16.to_le_bytes());
        wfx.extend_from_slice(&2u16.to_le_bytes());
        wfx.extend_from_slice(&44_100u32.to_le_bytes());
        wfx.extend_from_slice(&16_000u32.to_le_bytes());
        wfx.extend_from_slice(&0x2E5u16.to_le_bytes());
        wfx.extend_from_slice(&16u16.to_le_bytes());
        wfx.extend_from_slice(&0u16.to_le_bytes());

        let mut body = AUDIO_MEDIA.to_bytes_le().to_vec();
        body.extend_from_slice(&[0u8; 16]);
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&(wfx.len() as u32).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0x0001u16.to_le_bytes());
        body.extend_from_slice(&[0u8; 4]);
        body.extend_from_slice(&wfx);
        object(STREAM_PROPERTIES, &body)
    }

    fn content() -> Vec<u8> {
        let fields = ["Song\0", "Artist\0", "", "", ""];
        let mut body = vec![];
        for text in fields {
            body.extend_from_slice(&(utf16le(text).len() as u16).to_le_bytes());
        }
        for text in fields {
            body.extend(utf16le(text));
        }
        object(CONTENT_DESCRIPTION, &body)
    }

    fn extended() -> Vec<u8> {
        let name = utf16le("WM/AlbumTitle\0");
        let value = utf16le("Album\0");
        let mut body = 1u16.to_le_bytes().to_vec();
        body.extend_from_slice(&(name.len() as u16).to_le_bytes());
        body.extend(name);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&(value.len() as u16).to_le_bytes());
        body.extend(value);
        object(EXTENDED_CONTENT_DESCRIPTION, &body)
    }

    fn sample() -> Vec<u8> {
        let children = [file_props(), audio_stream(), content(), extended()];
        let mut header = (children.len() as u32).to_le_bytes().to_vec();
        header.extend_from_slice(&[1, 2]);
        for child in &children {
            header.extend_from_slice(child);
        }

        let mut out = object(HEADER_OBJECT, &header);
        out.extend(object(DATA_OBJECT, &[0u8; 26 + 100]));
        out
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn decodes_header_objects() {
        let bytes = sample();
        let mut srcs = every_source(&bytes, &Config::default()).await;

        for tok in srcs.all() {
            let info = parse(tok, &Config::default()).await.unwrap();

            assert_eq!(info.header_objects, 4);
            assert_eq!(info.objects.len(), 4);
            assert_eq!(info.file.unwrap().max_bitrate, 128_000);
            assert_eq!(info.duration(), Some(1.0));

            let audio = info.streams[0].audio.unwrap();
            assert_eq!(info.streams[0].stream_number, 1);
            assert_eq!((audio.channels, audio.sample_rate), (2, 44_100));

            let content = info.content.clone().unwrap();
            assert_eq!(content.title, "Song");
            assert_eq!(content.author, "Artist");
            assert_eq!(info.extended[0].name, "WM/AlbumTitle");
            assert_eq!(info.extended[0].value, utf16le("Album\0"));

            assert_eq!(info.data, Some(Region {
                offset: bytes.len() as u64 - 100,
                len: Some(100),
            }));
            assert_eq!(tok.position(), bytes.len() as u64 - 126);
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn overlong_string_is_structural() {
        let mut body = 200u16.to_le_bytes().to_vec();
        body.extend_from_slice(&[0u8; 8]);
        body.extend(utf16le("x"));
        let child = object(CONTENT_DESCRIPTION, &body);

        let mut header = 1u32.to_le_bytes().to_vec();
        header.extend_from_slice(&[1, 2]);
        header.extend(child);

        let mut tok = from_buffer(object(HEADER_OBJECT, &header));
        let err = parse(&mut tok, &Config::default()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Structure(StructureError::LengthOutOfBounds { length: 200, .. })
        ));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn non_asf_input_is_rejected() {
        let mut tok = from_buffer(vec![0u8; 30]);
        assert!(parse(&mut tok, &Config::default()).await.unwrap_err().is_structural());
    }
}
