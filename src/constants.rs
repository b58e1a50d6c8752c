//! Constants affecting tokenizer buffering and container layouts.

/// Default number of bytes drained per read when ignoring data on a stream source.
///
/// Streams cannot seek, so skipped regions must be read and discarded.
pub const DEFAULT_IGNORE_CHUNK_LEN: usize = 64 * 1024;

/// Default number of bytes pulled from a stream source when the peek buffer needs more data.
pub const DEFAULT_STREAM_READ_LEN: usize = 4 * 1024;

/// Size of the stack scratch buffer used by `read_number`/`peek_number`.
///
/// Large enough for the widest primitive (an 80-bit extended float).
pub const NUMBER_SCRATCH_LEN: usize = 16;

/// Length of a four-character-code chunk header with a 32-bit size (RIFF, IFF, MP4).
pub const FOURCC_HEADER_LEN: u64 = 8;

/// Length of an MP4 atom header carrying the 64-bit extended size.
pub const MP4_EXTENDED_HEADER_LEN: u64 = 16;

/// Length of an ASF object header: a 16-byte GUID and a 64-bit size.
pub const ASF_HEADER_LEN: u64 = 24;

/// Length of a FLAC metadata block header.
pub const FLAC_BLOCK_HEADER_LEN: u64 = 4;

/// Length of a DSDIFF/DSF chunk header: a four-cc and a 64-bit size.
pub const DSD_HEADER_LEN: u64 = 12;

/// Length of the fixed part of an Ogg page header, before the segment table.
pub const OGG_PAGE_HEADER_LEN: usize = 27;

/// Largest lacing value of an Ogg segment; shorter segments terminate a packet.
pub const OGG_MAX_SEGMENT_LEN: u8 = 255;

/// Ogg capture pattern.
pub const OGG_MAGIC: &[u8; 4] = b"OggS";

/// FLAC stream marker.
pub const FLAC_MAGIC: &[u8; 4] = b"fLaC";

/// ID3v2 header identifier.
pub const ID3V2_MAGIC: &[u8; 3] = b"ID3";

/// Length of an ID3v2 header (and footer).
pub const ID3V2_HEADER_LEN: u64 = 10;

/// APEv2 preamble, shared by headers and footers.
pub const APE_PREAMBLE: &[u8; 8] = b"APETAGEX";

/// Length of an APEv2 header or footer.
pub const APE_FOOTER_LEN: u64 = 32;

/// WavPack block identifier.
pub const WAVPACK_MAGIC: &[u8; 4] = b"wvpk";

/// Length of a WavPack block header.
pub const WAVPACK_HEADER_LEN: u64 = 32;

#[cfg(test)]
#[allow(missing_docs)]
pub mod test_data {
    /// Serial number used by synthetic Ogg streams in tests.
    pub const OGG_SERIAL: u32 = 0x1234_5678;
}
