//! Builders for small synthetic containers, used by tests and benchmarks.

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

fn pad_even(out: &mut Vec<u8>, payload_len: usize) {
    if payload_len % 2 == 1 {
        out.push(0);
    }
}

/// A RIFF chunk: four-cc, u32 LE size, payload, pad byte if odd.
pub fn riff_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
    out.extend_from_slice(payload);
    pad_even(&mut out, payload.len());
    out
}

/// An IFF/AIFF chunk: four-cc, u32 BE size, payload, pad byte if odd.
pub fn iff_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    out.extend_from_slice(payload);
    pad_even(&mut out, payload.len());
    out
}

/// An MP4 atom with a 32-bit size.
pub fn mp4_atom(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    out.write_u32::<BigEndian>(payload.len() as u32 + 8).unwrap();
    out.extend_from_slice(id);
    out.extend_from_slice(payload);
    out
}

/// An MP4 atom using the 64-bit extended size escape.
pub fn mp4_atom_extended(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    out.write_u32::<BigEndian>(1).unwrap();
    out.extend_from_slice(id);
    out.write_u64::<BigEndian>(payload.len() as u64 + 16).unwrap();
    out.extend_from_slice(payload);
    out
}

/// An MP4 full box: version byte and 24-bit flags ahead of the payload.
pub fn mp4_full_atom(id: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![version];
    body.write_u24::<BigEndian>(flags).unwrap();
    body.extend_from_slice(payload);
    mp4_atom(id, &body)
}

/// An ASF object. `guid` is in its on-disk (mixed-endian) byte order.
pub fn asf_object(guid: &[u8; 16], payload: &[u8]) -> Vec<u8> {
    let mut out = guid.to_vec();
    out.write_u64::<LittleEndian>(payload.len() as u64 + 24).unwrap();
    out.extend_from_slice(payload);
    out
}

/// A FLAC metadata block.
pub fn flac_block(kind: u8, last: bool, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![(u8::from(last) << 7) | (kind & 0x7F)];
    out.write_u24::<BigEndian>(payload.len() as u32).unwrap();
    out.extend_from_slice(payload);
    out
}

/// A DSDIFF chunk: four-cc, u64 BE size, payload, pad byte if odd.
pub fn dsdiff_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.write_u64::<BigEndian>(payload.len() as u64).unwrap();
    out.extend_from_slice(payload);
    pad_even(&mut out, payload.len());
    out
}

/// A DSF chunk: four-cc, u64 LE size counting the 12-byte header.
pub fn dsf_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.write_u64::<LittleEndian>(payload.len() as u64 + 12).unwrap();
    out.extend_from_slice(payload);
    out
}

/// An Ogg page with an explicit lacing table.
pub fn ogg_page_raw(
    flags: u8,
    granule: u64,
    serial: u32,
    sequence: u32,
    lacing: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let mut out = b"OggS".to_vec();
    out.push(0);
    out.push(flags);
    out.write_u64::<LittleEndian>(granule).unwrap();
    out.write_u32::<LittleEndian>(serial).unwrap();
    out.write_u32::<LittleEndian>(sequence).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    out.push(lacing.len() as u8);
    out.extend_from_slice(lacing);
    out.extend_from_slice(payload);
    out
}

/// Lacing values for one complete packet of `len` bytes.
pub fn lacing_for(len: usize) -> Vec<u8> {
    let mut lacing = vec![255u8; len / 255];
    lacing.push((len % 255) as u8);
    lacing
}

/// An Ogg page holding whole packets only.
pub fn ogg_page(flags: u8, granule: u64, serial: u32, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
    let mut lacing = vec![];
    let mut payload = vec![];
    for packet in packets {
        lacing.extend(lacing_for(packet.len()));
        payload.extend_from_slice(packet);
    }
    ogg_page_raw(flags, granule, serial, sequence, &lacing, &payload)
}

/// Encodes `value` as a 4-byte syncsafe integer.
pub fn syncsafe(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

/// An ID3v2 tag of `body_len` zero bytes, with an optional footer.
pub fn id3v2_tag(major: u8, flags: u8, body_len: u32) -> Vec<u8> {
    let mut out = b"ID3".to_vec();
    out.extend_from_slice(&[major, 0, flags]);
    out.extend_from_slice(&syncsafe(body_len));
    out.resize(out.len() + body_len as usize, 0);
    if flags & 0x10 != 0 {
        out.extend_from_slice(b"3DI");
        out.extend_from_slice(&[major, 0, flags]);
        out.extend_from_slice(&syncsafe(body_len));
    }
    out
}

fn ape_frame(size: u32, count: u32, flags: u32) -> Vec<u8> {
    let mut out = b"APETAGEX".to_vec();
    out.write_u32::<LittleEndian>(2000).unwrap();
    out.write_u32::<LittleEndian>(size).unwrap();
    out.write_u32::<LittleEndian>(count).unwrap();
    out.write_u32::<LittleEndian>(flags).unwrap();
    out.extend_from_slice(&[0u8; 8]);
    out
}

/// An APEv2 tag with UTF-8 items, optionally preceded by a header.
pub fn ape_tag(items: &[(&str, &[u8])], with_header: bool) -> Vec<u8> {
    let mut body = vec![];
    for (key, value) in items {
        body.write_u32::<LittleEndian>(value.len() as u32).unwrap();
        body.write_u32::<LittleEndian>(0).unwrap();
        body.extend_from_slice(key.as_bytes());
        body.push(0);
        body.extend_from_slice(value);
    }

    let size = body.len() as u32 + 32;
    let count = items.len() as u32;
    let has_header = if with_header { 1 << 31 } else { 0 };

    let mut out = vec![];
    if with_header {
        out.extend(ape_frame(size, count, has_header | (1 << 29)));
    }
    out.extend(body);
    out.extend(ape_frame(size, count, has_header));
    out
}

/// Encodes `text` as UTF-16LE without a terminator.
pub fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// An 80-bit big-endian extended float for small positive integers, as used
/// by AIFF sample rates.
pub fn f80_be(value: u32) -> [u8; 10] {
    let mut out = [0u8; 10];
    if value == 0 {
        return out;
    }

    let shift = value.leading_zeros();
    let exponent = 16383 + 31 - shift;
    let mantissa = u64::from(value << shift) << 32;
    out[..2].copy_from_slice(&(exponent as u16).to_be_bytes());
    out[2..].copy_from_slice(&mantissa.to_be_bytes());
    out
}

/// A WavPack block: 32-byte `wvpk` header followed by metadata sub-blocks.
///
/// Sub-block sizes are padded to whole 16-bit words, setting the odd-size flag
/// where needed, and use the large form past 510 bytes.
pub fn wavpack_block(
    flags: u32,
    total_samples: u32,
    block_samples: u32,
    sub_blocks: &[(u8, &[u8])],
) -> Vec<u8> {
    let mut body = vec![];
    for (id, data) in sub_blocks {
        let words = (data.len() + 1) / 2;
        let mut id = *id;
        if data.len() % 2 == 1 {
            id |= 0x40;
        }
        if words > 255 {
            body.push(id | 0x80);
            body.write_u24::<LittleEndian>(words as u32).unwrap();
        } else {
            body.push(id);
            body.push(words as u8);
        }
        body.extend_from_slice(data);
        pad_even(&mut body, data.len());
    }

    let mut out = b"wvpk".to_vec();
    out.write_u32::<LittleEndian>(body.len() as u32 + 24).unwrap();
    out.write_u16::<LittleEndian>(0x410).unwrap();
    out.extend_from_slice(&[0, 0]);
    out.write_u32::<LittleEndian>(total_samples).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    out.write_u32::<LittleEndian>(block_samples).unwrap();
    out.write_u32::<LittleEndian>(flags).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    out.extend(body);
    out
}
