//! Extraction of fields which do not start or end on byte boundaries.
//!
//! Bits are numbered from the most significant bit of each byte: bit 0 of
//! `0b1000_0000` is set.

use crate::error::{Error, Result, StructureError};
use bitstream_io::{BigEndian, BitRead, BitReader};
use std::io::Cursor;

fn reader_at(
    buf: &[u8],
    byte_offset: usize,
    bit_offset: u8,
    len: u32,
    max_len: u32,
) -> Result<BitReader<Cursor<&[u8]>, BigEndian>> {
    if bit_offset > 7 {
        return Err(Error::structure(StructureError::InvalidValue {
            field: "bit offset",
            value: u64::from(bit_offset),
        }));
    }

    if len == 0 || len > max_len {
        return Err(Error::structure(StructureError::InvalidValue {
            field: "bit length",
            value: u64::from(len),
        }));
    }

    let start = (byte_offset as u64) * 8 + u64::from(bit_offset);
    if start + u64::from(len) > (buf.len() as u64) * 8 {
        return Err(Error::EndOfStream);
    }

    let mut reader = BitReader::endian(Cursor::new(&buf[byte_offset..]), BigEndian);
    reader.skip(u32::from(bit_offset))?;
    Ok(reader)
}

/// Reads `len` (1 to 32) bits starting `bit_offset` bits into `buf[byte_offset]`.
///
/// The field may span several bytes.
pub fn read_bits(buf: &[u8], byte_offset: usize, bit_offset: u8, len: u32) -> Result<u32> {
    let mut reader = reader_at(buf, byte_offset, bit_offset, len, 32)?;
    Ok(reader.read::<u32>(len)?)
}

/// Reads `len` (1 to 64) bits starting `bit_offset` bits into `buf[byte_offset]`.
pub fn read_bits_u64(buf: &[u8], byte_offset: usize, bit_offset: u8, len: u32) -> Result<u64> {
    let mut reader = reader_at(buf, byte_offset, bit_offset, len, 64)?;
    Ok(reader.read::<u64>(len)?)
}

/// Reads the single bit `bit_offset` of `buf[byte_offset]`.
pub fn read_bit(buf: &[u8], byte_offset: usize, bit_offset: u8) -> Result<bool> {
    read_bits(buf, byte_offset, bit_offset, 1).map(|v| v == 1)
}

/// Decodes a 28-bit "syncsafe" integer (four bytes, seven significant bits each),
/// as used by ID3v2 tag sizes.
pub fn syncsafe_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let raw = super::window(buf, offset, 4)?;
    Ok(raw
        .iter()
        .fold(0u32, |acc, b| (acc << 7) | u32::from(b & 0x7f)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_bits(buf: &mut [u8], start_bit: usize, len: u32, value: u64) {
        for i in 0..len as usize {
            let bit = (value >> (len as usize - 1 - i)) & 1;
            let pos = start_bit + i;
            if bit == 1 {
                buf[pos / 8] |= 0x80 >> (pos % 8);
            }
        }
    }

    #[test]
    fn round_trips_every_alignment() {
        const SCRATCH: usize = 8;

        for byte_offset in 0..4usize {
            for bit_offset in 0..8u8 {
                for len in 1..=32u32 {
                    let start = byte_offset * 8 + bit_offset as usize;
                    if start + len as usize > SCRATCH * 8 {
                        continue;
                    }

                    // Alternating pattern touching both ends of the field.
                    let value = (0xA5A5_A5A5u64 | 1 | (1 << (len - 1))) & ((1u64 << len) - 1);

                    let mut buf = [0u8; SCRATCH];
                    write_bits(&mut buf, start, len, value);

                    let out = read_bits(&buf, byte_offset, bit_offset, len).unwrap();
                    assert_eq!(
                        u64::from(out),
                        value,
                        "byte {} bit {} len {}",
                        byte_offset,
                        bit_offset,
                        len
                    );
                }
            }
        }
    }

    #[test]
    fn flac_streaminfo_packing() {
        // 44100 Hz, 2 channels, 16 bits per sample, 0x1_2345_6789 samples.
        let mut buf = [0u8; 8];
        write_bits(&mut buf, 0, 20, 44_100);
        write_bits(&mut buf, 20, 3, 1);
        write_bits(&mut buf, 23, 5, 15);
        write_bits(&mut buf, 28, 36, 0x1_2345_6789);

        assert_eq!(read_bits(&buf, 0, 0, 20).unwrap(), 44_100);
        assert_eq!(read_bits(&buf, 2, 4, 3).unwrap() + 1, 2);
        assert_eq!(read_bits(&buf, 2, 7, 5).unwrap() + 1, 16);
        assert_eq!(read_bits_u64(&buf, 3, 4, 36).unwrap(), 0x1_2345_6789);
    }

    #[test]
    fn out_of_range_fields() {
        let buf = [0xffu8; 2];
        assert!(read_bits(&buf, 1, 1, 8).unwrap_err().is_end_of_stream());
        assert!(read_bits(&buf, 0, 8, 1).unwrap_err().is_structural());
        assert!(read_bits(&buf, 0, 0, 0).unwrap_err().is_structural());
        assert!(read_bits(&buf, 0, 0, 33).unwrap_err().is_structural());
        assert!(read_bit(&buf, 1, 7).unwrap());
    }

    #[test]
    fn syncsafe_sizes() {
        assert_eq!(syncsafe_u32(&[0x00, 0x00, 0x02, 0x01], 0).unwrap(), 257);
        assert_eq!(syncsafe_u32(&[0x7f, 0x7f, 0x7f, 0x7f], 0).unwrap(), 0x0fff_ffff);
    }
}
