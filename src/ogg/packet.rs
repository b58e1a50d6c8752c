use super::Page;
use crate::{
    constants::OGG_MAX_SEGMENT_LEN,
    error::{Error, Result, StructureError},
    tokenizer::{ReadOptions, Tokenizer},
    Config,
};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// A logical packet reassembled from one or more page segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Serial number of the logical stream.
    pub serial: u32,
    /// The packet's bytes.
    pub data: Vec<u8>,
    /// Granule position of the page on which the packet completed.
    pub granule_position: u64,
    /// Sequence number of the page on which the packet completed.
    pub page_sequence: u32,
    /// Whether this is the first packet of its logical stream.
    pub first: bool,
    /// Whether this is the final packet of its logical stream.
    pub last: bool,
    /// Whether the stream ended before the packet was terminated.
    pub truncated: bool,
}

#[derive(Debug, Default)]
struct Pending {
    data: Vec<u8>,
    /// Drop segments until the next packet boundary.
    skip_tail: bool,
    next_sequence: Option<u32>,
    emitted: bool,
}

/// Reassembles logical packets from physical pages, per logical stream.
///
/// A packet's segments are held until a segment shorter than 255 bytes
/// terminates it, which may be several pages later. Each pending packet is
/// released exactly once: at its terminating segment, or at the last page of
/// its stream.
#[derive(Debug)]
pub struct PacketAssembler {
    streams: HashMap<u32, Pending>,
    strict: bool,
}

impl PacketAssembler {
    /// Creates an assembler honouring [`Config::strict_ogg_continuity`].
    pub fn new(config: &Config) -> Self {
        Self {
            streams: HashMap::new(),
            strict: config.strict_ogg_continuity,
        }
    }

    /// Returns whether no partial packet is held for `serial`.
    pub fn is_empty(&self, serial: u32) -> bool {
        self.pending_len(serial) == 0
    }

    /// Number of bytes held for an unfinished packet of `serial`.
    pub fn pending_len(&self, serial: u32) -> usize {
        self.streams.get(&serial).map_or(0, |p| p.data.len())
    }

    /// Feeds one page, returning every packet it completes in order.
    pub fn push(&mut self, page: &Page) -> Result<Vec<Packet>> {
        let header = &page.header;
        let serial = header.serial;
        let mut pending = self.streams.remove(&serial).unwrap_or_default();

        if let Some(expected) = pending.next_sequence {
            if expected != header.sequence {
                warn!(
                    "Ogg stream {:#010x} jumped from page {} to {}, dropping {} pending bytes.",
                    serial,
                    expected,
                    header.sequence,
                    pending.data.len()
                );
                pending.data.clear();
                pending.skip_tail = header.continued();
            }
        }
        pending.next_sequence = Some(header.sequence.wrapping_add(1));

        if header.continued() {
            if pending.data.is_empty() && !pending.emitted {
                debug!(
                    "Ogg stream {:#010x} starts mid-packet, skipping to the next boundary.",
                    serial
                );
                pending.skip_tail = true;
            }
        } else {
            if !pending.data.is_empty() {
                if self.strict {
                    return Err(Error::structure(StructureError::OggContinuity {
                        serial,
                        sequence: header.sequence,
                    }));
                }

                warn!(
                    "Ogg stream {:#010x} page {} starts a new packet, dropping {} bytes of an unfinished one.",
                    serial,
                    header.sequence,
                    pending.data.len()
                );
                pending.data.clear();
            }
            // A fresh page always starts on a packet boundary.
            pending.skip_tail = false;
        }

        let mut out = vec![];
        let mut offset = 0usize;
        for &lace in &page.lacing {
            let end = offset + usize::from(lace);
            let segment = page.payload.get(offset..end).ok_or_else(|| {
                Error::structure(StructureError::LengthOutOfBounds {
                    field: "ogg segment",
                    length: end as u64,
                    available: page.payload.len() as u64,
                })
            })?;
            offset = end;

            if !pending.skip_tail {
                pending.data.extend_from_slice(segment);
            }

            if lace < OGG_MAX_SEGMENT_LEN {
                if pending.skip_tail {
                    pending.skip_tail = false;
                } else {
                    out.push(Packet {
                        serial,
                        data: std::mem::take(&mut pending.data),
                        granule_position: header.granule_position,
                        page_sequence: header.sequence,
                        first: !pending.emitted,
                        last: false,
                        truncated: false,
                    });
                    pending.emitted = true;
                }
            }
        }

        if header.last_page() {
            if !pending.data.is_empty() {
                warn!(
                    "Ogg stream {:#010x} ended inside a packet, flushing {} bytes.",
                    serial,
                    pending.data.len()
                );
                out.push(Packet {
                    serial,
                    data: std::mem::take(&mut pending.data),
                    granule_position: header.granule_position,
                    page_sequence: header.sequence,
                    first: !pending.emitted,
                    last: false,
                    truncated: true,
                });
            }

            if let Some(packet) = out.last_mut() {
                packet.last = true;
            }
        } else {
            self.streams.insert(serial, pending);
        }

        Ok(out)
    }

    /// Releases every unfinished packet, for input which ended without
    /// last-page flags.
    pub fn finish(&mut self) -> Vec<Packet> {
        let mut serials: Vec<u32> = self.streams.keys().copied().collect();
        serials.sort_unstable();

        let mut out = vec![];
        for serial in serials {
            if let Some(mut pending) = self.streams.remove(&serial) {
                if !pending.data.is_empty() {
                    out.push(Packet {
                        serial,
                        data: std::mem::take(&mut pending.data),
                        granule_position: u64::MAX,
                        page_sequence: pending.next_sequence.unwrap_or(1).wrapping_sub(1),
                        first: !pending.emitted,
                        last: true,
                        truncated: true,
                    });
                }
            }
        }
        out
    }
}

/// Reads pages from a tokenizer and yields reassembled packets.
pub struct PacketReader<'t> {
    tok: &'t mut dyn Tokenizer,
    assembler: PacketAssembler,
    ready: VecDeque<Packet>,
    last_page: Option<super::PageHeader>,
    pages: u64,
    done: bool,
}

impl<'t> PacketReader<'t> {
    /// Reads pages starting at the tokenizer's position.
    pub fn new(tok: &'t mut dyn Tokenizer, config: &Config) -> Self {
        Self {
            tok,
            assembler: PacketAssembler::new(config),
            ready: VecDeque::new(),
            last_page: None,
            pages: 0,
            done: false,
        }
    }

    /// Returns the next packet of any logical stream, or `None` once the input
    /// ends cleanly on a page boundary.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Ok(Some(packet));
            }

            if self.done {
                return Ok(None);
            }

            let mut next = [0u8; 1];
            let n = self
                .tok
                .peek_buffer(&mut next, ReadOptions::default().may_be_less(true))
                .await?;
            if n == 0 {
                self.done = true;
                self.ready.extend(self.assembler.finish());
                continue;
            }

            let page = Page::read(&mut *self.tok).await?;
            self.pages += 1;
            self.last_page = Some(page.header);
            self.ready.extend(self.assembler.push(&page)?);
        }
    }

    /// Header of the most recently read page.
    pub fn last_page(&self) -> Option<&super::PageHeader> {
        self.last_page.as_ref()
    }

    /// Number of pages read so far.
    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// The page reassembler, for pending-state queries.
    pub fn assembler(&self) -> &PacketAssembler {
        &self.assembler
    }
}

impl std::fmt::Debug for PacketReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketReader")
            .field("position", &self.tok.position())
            .field("assembler", &self.assembler)
            .field("ready", &self.ready.len())
            .field("pages", &self.pages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{constants::test_data::OGG_SERIAL, tokenizer::test_sources::every_source};
    use utils::{ogg_page, ogg_page_raw};

    const CONTINUED: u8 = 0x01;
    const FIRST: u8 = 0x02;
    const LAST: u8 = 0x04;

    fn split_packet() -> (Vec<u8>, Vec<u8>) {
        let packet: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let mut bytes = ogg_page_raw(FIRST, u64::MAX, OGG_SERIAL, 0, &[255], &packet[..255]);
        bytes.extend(ogg_page_raw(
            CONTINUED,
            u64::MAX,
            OGG_SERIAL,
            1,
            &[255],
            &packet[255..510],
        ));
        bytes.extend(ogg_page_raw(
            CONTINUED | LAST,
            4800,
            OGG_SERIAL,
            2,
            &[90],
            &packet[510..],
        ));
        (packet, bytes)
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn packet_split_across_three_pages() {
        let (packet, bytes) = split_packet();
        let config = Config::default();
        let mut srcs = every_source(&bytes, &config).await;

        for tok in srcs.all() {
            let mut assembler = PacketAssembler::new(&config);
            let mut out = vec![];
            for _ in 0..3 {
                let page = Page::read(tok).await.unwrap();
                out.extend(assembler.push(&page).unwrap());
                if out.is_empty() {
                    assert!(!assembler.is_empty(OGG_SERIAL));
                }
            }

            assert_eq!(out.len(), 1);
            assert_eq!(out[0].data, packet);
            assert_eq!(out[0].granule_position, 4800);
            assert!(out[0].first && out[0].last && !out[0].truncated);
            assert!(assembler.is_empty(OGG_SERIAL));
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn lax_continuity_drops_partial_packet() {
        let mut bytes = ogg_page_raw(FIRST, u64::MAX, OGG_SERIAL, 0, &[255], &[1u8; 255]);
        bytes.extend(ogg_page(0, 10, OGG_SERIAL, 1, &[&[2u8; 3]]));

        let mut tok = crate::tokenizer::from_buffer(bytes);
        let mut reader = PacketReader::new(&mut tok, &Config::default());

        let packet = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(packet.data, vec![2u8; 3]);
        assert!(reader.next_packet().await.unwrap().is_none());
        assert_eq!(reader.pages(), 2);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn strict_continuity_is_an_error() {
        let mut bytes = ogg_page_raw(FIRST, u64::MAX, OGG_SERIAL, 0, &[255], &[1u8; 255]);
        bytes.extend(ogg_page(0, 10, OGG_SERIAL, 1, &[&[2u8; 3]]));

        let mut tok = crate::tokenizer::from_buffer(bytes);
        let config = Config::default().strict_ogg_continuity(true);
        let mut reader = PacketReader::new(&mut tok, &config);

        let err = reader.next_packet().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Structure(StructureError::OggContinuity { sequence: 1, .. })
        ));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn interleaved_streams_keep_separate_accumulators() {
        let mut bytes = ogg_page_raw(FIRST, u64::MAX, 1, 0, &[255], &[1u8; 255]);
        bytes.extend(ogg_page(FIRST, 0, 2, 0, &[b"two"]));
        bytes.extend(ogg_page_raw(CONTINUED | LAST, 7, 1, 1, &[1], &[9]));

        let mut tok = crate::tokenizer::from_buffer(bytes);
        let mut reader = PacketReader::new(&mut tok, &Config::default());

        let a = reader.next_packet().await.unwrap().unwrap();
        assert_eq!((a.serial, a.data.as_slice()), (2, &b"two"[..]));
        assert!(!reader.assembler().is_empty(1));

        let b = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(b.serial, 1);
        assert_eq!(b.data.len(), 256);
        assert!(b.last);
        assert!(reader.next_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn unterminated_stream_is_flushed_at_end() {
        let bytes = ogg_page_raw(FIRST, u64::MAX, OGG_SERIAL, 0, &[255], &[5u8; 255]);

        let mut tok = crate::tokenizer::from_buffer(bytes);
        let mut reader = PacketReader::new(&mut tok, &Config::default());

        let packet = reader.next_packet().await.unwrap().unwrap();
        assert!(packet.truncated);
        assert_eq!(packet.data.len(), 255);
        assert!(reader.next_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn joining_mid_packet_skips_the_tail() {
        let mut bytes = ogg_page_raw(CONTINUED, 5, OGG_SERIAL, 7, &[20, 3], &[0u8; 23]);
        bytes.extend(ogg_page(LAST, 9, OGG_SERIAL, 8, &[&[4u8; 2]]));

        let mut tok = crate::tokenizer::from_buffer(bytes);
        let mut reader = PacketReader::new(&mut tok, &Config::default());

        let a = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(a.data.len(), 3);
        let b = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(b.data, vec![4u8; 2]);
        assert!(b.last);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn unterminated_tail_does_not_swallow_next_packet() {
        let mut bytes = ogg_page_raw(CONTINUED, u64::MAX, OGG_SERIAL, 7, &[255], &[0u8; 255]);
        bytes.extend(ogg_page(LAST, 9, OGG_SERIAL, 8, &[&[4u8; 3]]));

        let mut tok = crate::tokenizer::from_buffer(bytes);
        let mut reader = PacketReader::new(&mut tok, &Config::default());

        let packet = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(packet.data, vec![4u8; 3]);
        assert!(packet.last && !packet.truncated);
        assert!(reader.next_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn sequence_gap_drops_pending_bytes() {
        let mut bytes = ogg_page_raw(FIRST, u64::MAX, OGG_SERIAL, 0, &[255], &[1u8; 255]);
        bytes.extend(ogg_page_raw(CONTINUED, 20, OGG_SERIAL, 5, &[10, 3], &[2u8; 13]));
        bytes.extend(ogg_page(LAST, 30, OGG_SERIAL, 9, &[&[3u8; 4]]));

        let mut tok = crate::tokenizer::from_buffer(bytes);
        let mut reader = PacketReader::new(&mut tok, &Config::default());

        let a = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(a.data, vec![2u8; 3]);
        assert_eq!(a.page_sequence, 5);
        assert!(reader.assembler().is_empty(OGG_SERIAL));

        let b = reader.next_packet().await.unwrap().unwrap();
        assert_eq!(b.data, vec![3u8; 4]);
        assert!(b.last);
        assert!(reader.next_packet().await.unwrap().is_none());
    }
}
