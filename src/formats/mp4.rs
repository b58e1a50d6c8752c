//! ISO base media (MP4, M4A, QuickTime) structure.
//!
//! Only the atoms needed to summarise tracks and iTunes-style metadata are
//! decoded. Everything else is skipped by its declared size, and `mdat` is
//! recorded by location only.

use super::{read_payload, tolerate_eof, Fields, Region};
use crate::{
    chunk::{walk, Action, ChunkFormat, ChunkHeader, ChunkId, ChunkTree, ChunkVisitor, TreeBuilder},
    error::Result,
    token::{FourCc, TextEncoding, U16_BE, U32_BE, U64_BE, U8},
    tokenizer::{ReadOptions, Tokenizer},
    Config,
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

const CONTAINERS: [&[u8; 4]; 8] = [
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"udta", b"edts", b"dinf",
];

/// The `ftyp` atom.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FileType {
    /// Preferred brand.
    pub major_brand: FourCc,
    /// Version of the major brand.
    pub minor_version: u32,
    /// Other brands the file conforms to.
    pub compatible_brands: Vec<FourCc>,
}

/// The `mvhd` atom.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MovieHeader {
    /// Full-box version; 1 widens times to 64 bits.
    pub version: u8,
    /// Seconds since 1904-01-01.
    pub creation_time: u64,
    /// Seconds since 1904-01-01.
    pub modification_time: u64,
    /// Time units per second.
    pub timescale: u32,
    /// Duration in `timescale` units.
    pub duration: u64,
}

/// One entry of an `stsd` atom.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SampleEntry {
    /// Coding name, e.g. `mp4a` or `alac`.
    pub format: FourCc,
    /// Channel count, for sound tracks.
    pub channels: Option<u16>,
    /// Bits per sample, for sound tracks.
    pub sample_size: Option<u16>,
    /// Integer part of the 16.16 sample rate, for sound tracks.
    pub sample_rate: Option<u32>,
}

/// Per-track summary gathered from `trak`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Track {
    /// `tkhd` track id.
    pub id: Option<u32>,
    /// `hdlr` handler type, e.g. `soun` or `vide`.
    pub handler: Option<FourCc>,
    /// `mdhd` time units per second.
    pub timescale: Option<u32>,
    /// `mdhd` duration in `timescale` units.
    pub duration: Option<u64>,
    /// `mdhd` ISO-639-2 language code.
    pub language: Option<String>,
    /// `stsd` entries.
    pub sample_entries: Vec<SampleEntry>,
}

impl Track {
    /// Returns whether this is a sound track.
    pub fn is_audio(&self) -> bool {
        self.handler == Some(FourCc::new(b"soun"))
    }
}

/// A `data` atom inside an `ilst` item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DataValue {
    /// Well-known type indicator, e.g. 1 for UTF-8 text.
    pub type_indicator: u32,
    /// Locale indicator.
    pub locale: u32,
    /// Raw value bytes.
    pub data: Vec<u8>,
}

/// An `ilst` item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetaItem {
    /// Item atom id, e.g. `©nam` or `----`.
    pub key: FourCc,
    /// Reverse-DNS namespace of a `----` item.
    pub mean: Option<String>,
    /// Name of a `----` item.
    pub name: Option<String>,
    /// Values in stored order.
    pub values: Vec<DataValue>,
}

/// Structure of an MP4 file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Mp4Info {
    /// Decoded `ftyp` atom.
    pub file_type: Option<FileType>,
    /// Decoded `mvhd` atom.
    pub movie: Option<MovieHeader>,
    /// Tracks, in file order.
    pub tracks: Vec<Track>,
    /// `ilst` items, in file order.
    pub items: Vec<MetaItem>,
    /// Locations of every `mdat` atom.
    pub media_data: Vec<Region>,
    /// Top-level atom ids, in file order.
    pub atoms: Vec<FourCc>,
    /// Whether the input ended before the declared structure did.
    pub truncated: bool,
}

impl Mp4Info {
    /// Movie duration in seconds.
    pub fn duration(&self) -> Option<f64> {
        let mvhd = self.movie?;
        (mvhd.timescale > 0).then(|| mvhd.duration as f64 / f64::from(mvhd.timescale))
    }

    /// The first sound track.
    pub fn audio_track(&self) -> Option<&Track> {
        self.tracks.iter().find(|t| t.is_audio())
    }
}

fn is_container(id: &ChunkId) -> bool {
    CONTAINERS.iter().any(|cc| *id == **cc)
}

fn in_ilst(path: &[ChunkId]) -> bool {
    path.len() >= 2 && path[path.len() - 2] == *b"ilst"
}

fn unpack_language(packed: u16) -> Option<String> {
    if packed == 0 || packed == 0x7FFF {
        return None;
    }

    Some(
        [10u16, 5, 0]
            .iter()
            .map(|shift| char::from((((packed >> shift) & 0x1F) as u8) + 0x60))
            .collect(),
    )
}

#[derive(Default)]
struct Mp4Visitor {
    info: Mp4Info,
    header_only: bool,
    moov_done: bool,
}

impl Mp4Visitor {
    fn track(&mut self) -> Option<&mut Track> {
        self.info.tracks.last_mut()
    }

    fn item(&mut self) -> Option<&mut MetaItem> {
        self.info.items.last_mut()
    }

    fn decode(&mut self, path: &[ChunkId], cc: FourCc, buf: &[u8]) -> Result<()> {
        let mut f = Fields::new(buf, "mp4 atom");

        match cc.as_bytes() {
            b"ftyp" => {
                let major_brand = f.fourcc()?;
                let minor_version = f.number(U32_BE)?;
                let mut compatible_brands = vec![];
                while f.remaining() >= 4 {
                    compatible_brands.push(f.fourcc()?);
                }
                self.info.file_type = Some(FileType {
                    major_brand,
                    minor_version,
                    compatible_brands,
                });
            },
            b"mvhd" => {
                let version = f.number(U8)?;
                f.skip(3)?;
                let mut mvhd = MovieHeader {
                    version,
                    ..Default::default()
                };
                if version == 1 {
                    mvhd.creation_time = f.number(U64_BE)?;
                    mvhd.modification_time = f.number(U64_BE)?;
                    mvhd.timescale = f.number(U32_BE)?;
                    mvhd.duration = f.number(U64_BE)?;
                } else {
                    mvhd.creation_time = u64::from(f.number(U32_BE)?);
                    mvhd.modification_time = u64::from(f.number(U32_BE)?);
                    mvhd.timescale = f.number(U32_BE)?;
                    mvhd.duration = u64::from(f.number(U32_BE)?);
                }
                self.info.movie = Some(mvhd);
            },
            b"tkhd" => {
                let version = f.number(U8)?;
                f.skip(3 + if version == 1 { 16 } else { 8 })?;
                let id = f.number(U32_BE)?;
                if let Some(track) = self.track() {
                    track.id = Some(id);
                }
            },
            b"mdhd" => {
                let version = f.number(U8)?;
                f.skip(3)?;
                let (timescale, duration) = if version == 1 {
                    f.skip(16)?;
                    (f.number(U32_BE)?, f.number(U64_BE)?)
                } else {
                    f.skip(8)?;
                    (f.number(U32_BE)?, u64::from(f.number(U32_BE)?))
                };
                let language = unpack_language(f.number(U16_BE)?);
                if let Some(track) = self.track() {
                    track.timescale = Some(timescale);
                    track.duration = Some(duration);
                    track.language = language;
                }
            },
            b"hdlr" => {
                f.skip(8)?;
                let handler = f.fourcc()?;
                if let Some(track) = self.track() {
                    track.handler = Some(handler);
                }
            },
            b"stsd" => {
                f.skip(4)?;
                let count = f.number(U32_BE)?;
                let audio = self.track().map_or(false, |t| t.is_audio());
                let mut entries = vec![];

                for _ in 0..count {
                    if f.remaining() < 8 {
                        break;
                    }
                    let size = f.number(U32_BE)? as usize;
                    let format = f.fourcc()?;
                    let body = f.take(size.saturating_sub(8))?;
                    entries.push(sample_entry(format, body, audio)?);
                }

                if let Some(track) = self.track() {
                    track.sample_entries = entries;
                }
            },
            b"data" if in_ilst(&path[..path.len() - 1]) => {
                let value = DataValue {
                    type_indicator: f.number(U32_BE)? & 0x00FF_FFFF,
                    locale: f.number(U32_BE)?,
                    data: f.rest().to_vec(),
                };
                if let Some(item) = self.item() {
                    item.values.push(value);
                }
            },
            b"mean" | b"name" => {
                f.skip(4)?;
                let text = TextEncoding::Utf8.decode(f.rest());
                if let Some(item) = self.item() {
                    if cc == *b"mean" {
                        item.mean = Some(text);
                    } else {
                        item.name = Some(text);
                    }
                }
            },
            _ => {},
        }

        Ok(())
    }
}

fn sample_entry(format: FourCc, body: &[u8], audio: bool) -> Result<SampleEntry> {
    let mut entry = SampleEntry {
        format,
        ..Default::default()
    };

    if audio {
        let mut f = Fields::new(body, "mp4 sample entry");
        // Reserved, data reference index, version, revision, vendor.
        f.skip(6 + 2 + 2 + 2 + 4)?;
        entry.channels = Some(f.number(U16_BE)?);
        entry.sample_size = Some(f.number(U16_BE)?);
        f.skip(4)?;
        entry.sample_rate = Some(f.number(U32_BE)? >> 16);
    }

    Ok(entry)
}

#[async_trait]
impl ChunkVisitor for Mp4Visitor {
    fn action(&mut self, path: &[ChunkId], header: &ChunkHeader) -> Action {
        let id = match path.last() {
            Some(id) => id,
            None => return Action::Skip,
        };

        if path.len() == 1 {
            if let Some(cc) = id.fourcc() {
                self.info.atoms.push(cc);
            }
            if *id == *b"mdat" {
                self.info.media_data.push(Region::of(header));
                return Action::Skip;
            }
        }

        if in_ilst(path) {
            self.info.items.push(MetaItem {
                key: id.fourcc().unwrap_or_default(),
                ..Default::default()
            });
            return Action::Recurse;
        }

        if *id == *b"trak" {
            self.info.tracks.push(Track::default());
        }

        let parent = path.len().checked_sub(2).map(|i| path[i]);
        let parent = parent.as_ref().and_then(ChunkId::fourcc);

        match (parent.as_ref().map(FourCc::as_bytes), id.fourcc().as_ref().map(FourCc::as_bytes)) {
            _ if is_container(id) => Action::Recurse,
            (_, Some(b"meta" | b"ilst")) => Action::Recurse,
            (None | Some(b"moov"), Some(b"ftyp" | b"mvhd")) => Action::Leaf,
            (Some(b"trak"), Some(b"tkhd"))
            | (Some(b"mdia"), Some(b"mdhd" | b"hdlr"))
            | (Some(b"stbl"), Some(b"stsd")) => Action::Leaf,
            (_, Some(b"data" | b"mean" | b"name")) if in_ilst(&path[..path.len() - 1]) =>
                Action::Leaf,
            _ => Action::Skip,
        }
    }

    async fn enter(
        &mut self,
        tok: &mut dyn Tokenizer,
        _path: &[ChunkId],
        header: &ChunkHeader,
    ) -> Result<()> {
        if header.id != *b"meta" {
            return Ok(());
        }

        // ISO `meta` is a full box; QuickTime's starts straight with `hdlr`.
        let mut peeked = [0u8; 8];
        let n = tok
            .peek_buffer(&mut peeked, ReadOptions::default().may_be_less(true))
            .await?;
        if n == peeked.len() && &peeked[4..] == b"hdlr" {
            debug!("QuickTime-style meta atom at {}.", header.offset);
        } else {
            tok.ignore(4).await?;
        }

        Ok(())
    }

    async fn leaf(
        &mut self,
        tok: &mut dyn Tokenizer,
        path: &[ChunkId],
        header: &ChunkHeader,
    ) -> Result<()> {
        let cc = match header.id.fourcc() {
            Some(cc) => cc,
            None => return Ok(()),
        };
        let buf = read_payload(tok, header).await?;
        self.decode(path, cc, &buf)
    }

    fn exit(&mut self, path: &[ChunkId], _header: &ChunkHeader) {
        if path.len() == 1 && path[0] == *b"moov" {
            self.moov_done = true;
        }
    }

    fn should_stop(&self) -> bool {
        self.header_only && self.moov_done
    }
}

async fn run(tok: &mut dyn Tokenizer, config: &Config, header_only: bool) -> Result<Mp4Info> {
    let mut visitor = Mp4Visitor {
        header_only,
        ..Default::default()
    };
    let res = walk(tok, ChunkFormat::Mp4, &mut visitor, config, None).await;
    visitor.info.truncated = tolerate_eof(res, "MP4")?;

    Ok(visitor.info)
}

/// Walks an MP4 file from the tokenizer's position to its end.
#[instrument(skip(tok, config))]
pub async fn parse(tok: &mut dyn Tokenizer, config: &Config) -> Result<Mp4Info> {
    run(tok, config, false).await
}

/// Walks an MP4 file up to the end of its `moov` atom.
///
/// Useful on streams where `moov` precedes `mdat`, to avoid reading the media.
#[instrument(skip(tok, config))]
pub async fn parse_header_only(tok: &mut dyn Tokenizer, config: &Config) -> Result<Mp4Info> {
    run(tok, config, true).await
}

/// Records the full atom tree of an MP4 file.
#[instrument(skip(tok, config))]
pub async fn atom_tree(tok: &mut dyn Tokenizer, config: &Config) -> Result<ChunkTree> {
    let mut builder = TreeBuilder::new(|path: &[ChunkId], _header: &ChunkHeader| {
        let id = match path.last() {
            Some(id) => id,
            None => return Action::Skip,
        };
        if is_container(id) || *id == *b"meta" || *id == *b"ilst" || in_ilst(path) {
            Action::Recurse
        } else {
            Action::Skip
        }
    })
    .prelude(ChunkId::FourCc(FourCc::new(b"meta")), 4);

    let res = walk(tok, ChunkFormat::Mp4, &mut builder, config, None).await;
    tolerate_eof(res, "MP4")?;

    Ok(builder.into_tree())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{from_buffer, test_sources::every_source};
    use utils::{mp4_atom, mp4_full_atom};

    fn ftyp() -> Vec<u8> {
        let mut body = b"M4A ".to_vec();
        body.extend_from_slice(&0x200u32.to_be_bytes());
        body.extend_from_slice(b"isomM4A mp42");
        mp4_atom(b"ftyp", &body)
    }

    fn mvhd_v1() -> Vec<u8> {
        let mut body = vec![0u8; 16];
        body.extend_from_slice(&1_000u32.to_be_bytes());
        body.extend_from_slice(&90_500u64.to_be_bytes());
        body.extend_from_slice(&[0u8; 80]);
        mp4_full_atom(b"mvhd", 1, 0, &body)
    }

    fn sound_trak() -> Vec<u8> {
        let mut tkhd = vec![0u8; 8];
        tkhd.extend_from_slice(&7u32.to_be_bytes());
        tkhd.extend_from_slice(&[0u8; 68]);

        let mut mdhd = vec![0u8; 8];
        mdhd.extend_from_slice(&44_100u32.to_be_bytes());
        mdhd.extend_from_slice(&88_200u32.to_be_bytes());
        // "eng"
        mdhd.extend_from_slice(&0x15C7u16.to_be_bytes());
        mdhd.extend_from_slice(&[0u8; 2]);

        let mut hdlr = vec![0u8; 4];
        hdlr.extend_from_slice(b"soun");
        hdlr.extend_from_slice(&[0u8; 13]);

        let mut entry = vec![0u8; 6];
        entry.extend_from_slice(&1u16.to_be_bytes());
        entry.extend_from_slice(&[0u8; 8]);
        entry.extend_from_slice(&2u16.to_be_bytes());
        entry.extend_from_slice(&16u16.to_be_bytes());
        entry.extend_from_slice(&[0u8; 4]);
        entry.extend_from_slice(&(44_100u32 << 16).to_be_bytes());
        entry.extend(mp4_atom(b"esds", &[0u8; 20]));
        let mut stsd = 1u32.to_be_bytes().to_vec();
        stsd.extend(mp4_atom(b"mp4a", &entry));

        let stbl = mp4_atom(b"stbl", &mp4_full_atom(b"stsd", 0, 0, &stsd));
        let minf = mp4_atom(b"minf", &stbl);

        let mut mdia = mp4_full_atom(b"mdhd", 0, 0, &mdhd);
        mdia.extend(mp4_full_atom(b"hdlr", 0, 0, &hdlr));
        mdia.extend(minf);

        let mut trak = mp4_full_atom(b"tkhd", 0, 7, &tkhd);
        trak.extend(mp4_atom(b"mdia", &mdia));
        mp4_atom(b"trak", &trak)
    }

    fn data(kind: u32, value: &[u8]) -> Vec<u8> {
        let mut body = kind.to_be_bytes().to_vec();
        body.extend_from_slice(&[0u8; 4]);
        body.extend_from_slice(value);
        mp4_atom(b"data", &body)
    }

    fn udta() -> Vec<u8> {
        let mut freeform = mp4_full_atom(b"mean", 0, 0, b"com.apple.iTunes");
        freeform.extend(mp4_full_atom(b"name", 0, 0, b"iTunSMPB"));
        freeform.extend(data(1, b" 00000000"));

        let mut ilst = mp4_atom(b"\xa9nam", &data(1, b"Title"));
        ilst.extend(mp4_atom(b"----", &freeform));

        let mut meta = mp4_full_atom(b"hdlr", 0, 0, &[0u8; 20]);
        meta.extend(mp4_atom(b"ilst", &ilst));
        mp4_atom(b"udta", &mp4_full_atom(b"meta", 0, 0, &meta))
    }

    fn sample() -> Vec<u8> {
        let mut moov = mvhd_v1();
        moov.extend(sound_trak());
        moov.extend(udta());

        let mut out = ftyp();
        out.extend(mp4_atom(b"moov", &moov));
        out.extend(mp4_atom(b"mdat", &[0u8; 64]));
        out
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn summarises_tracks_and_items() {
        let bytes = sample();
        let mut srcs = every_source(&bytes, &Config::default()).await;

        for tok in srcs.all() {
            let info = parse(tok, &Config::default()).await.unwrap();

            let ftyp = info.file_type.clone().unwrap();
            assert_eq!(ftyp.major_brand, FourCc::new(b"M4A "));
            assert_eq!(ftyp.compatible_brands.len(), 3);

            assert_eq!(info.movie.unwrap().version, 1);
            assert_eq!(info.duration(), Some(90.5));

            let track = info.audio_track().unwrap();
            assert_eq!(track.id, Some(7));
            assert_eq!(track.timescale, Some(44_100));
            assert_eq!(track.language.as_deref(), Some("eng"));
            assert_eq!(track.sample_entries, vec![SampleEntry {
                format: FourCc::new(b"mp4a"),
                channels: Some(2),
                sample_size: Some(16),
                sample_rate: Some(44_100),
            }]);

            assert_eq!(info.items.len(), 2);
            assert_eq!(info.items[0].key, FourCc::new(b"\xa9nam"));
            assert_eq!(info.items[0].values[0].data, b"Title");
            assert_eq!(info.items[0].values[0].type_indicator, 1);
            assert_eq!(info.items[1].mean.as_deref(), Some("com.apple.iTunes"));
            assert_eq!(info.items[1].name.as_deref(), Some("iTunSMPB"));

            assert_eq!(info.media_data, vec![Region {
                offset: bytes.len() as u64 - 64,
                len: Some(64),
            }]);
            assert!(!info.truncated);
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn quicktime_meta_has_no_version_word() {
        let mut meta = mp4_atom(b"hdlr", &[0u8; 24]);
        meta.extend(mp4_atom(b"ilst", &mp4_atom(b"\xa9ART", &data(1, b"Artist"))));
        let moov = mp4_atom(b"moov", &mp4_atom(b"udta", &mp4_atom(b"meta", &meta)));

        let mut tok = from_buffer(moov);
        let info = parse(&mut tok, &Config::default()).await.unwrap();
        assert_eq!(info.items[0].values[0].data, b"Artist");
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn header_only_stops_after_moov() {
        let bytes = sample();
        let mut tok = from_buffer(bytes.clone());
        let info = parse_header_only(&mut tok, &Config::default()).await.unwrap();

        assert!(info.movie.is_some());
        assert!(info.media_data.is_empty());
        assert_eq!(tok.position(), bytes.len() as u64 - 72);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn truncated_mdat_is_reported() {
        let mut bytes = sample();
        bytes.truncate(bytes.len() - 10);

        let mut tok = from_buffer(bytes);
        let info = parse(&mut tok, &Config::default()).await.unwrap();
        assert!(info.truncated);
        assert_eq!(info.tracks.len(), 1);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn tree_indexes_item_atoms() {
        let mut tok = from_buffer(sample());
        let tree = atom_tree(&mut tok, &Config::default()).await.unwrap();

        let stsd = tree.find(&[b"moov", b"trak", b"mdia", b"minf", b"stbl", b"stsd"]);
        assert!(stsd.is_some());
        let name = tree.find(&[b"moov", b"udta", b"meta", b"ilst", b"----", b"name"]);
        assert_eq!(tree.get(name.unwrap()).unwrap().depth, 5);
    }
}
