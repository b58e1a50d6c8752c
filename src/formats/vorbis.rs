use super::field;
use crate::{
    error::Result,
    token::{TextEncoding, Token, U32_LE},
};
use serde::Serialize;

/// A Vorbis comment block, shared by FLAC, Ogg Vorbis and Opus.
///
/// Comments are kept as raw `KEY=value` strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VorbisComments {
    /// Encoder identification.
    pub vendor: String,
    /// User comments in stored order.
    pub comments: Vec<String>,
}

impl VorbisComments {
    /// Decodes a comment block from the start of `buf`, returning it along with
    /// the number of bytes it spans.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut at = 0;
        let vendor = read_string(buf, &mut at, "vorbis vendor")?;

        field(buf, at, 4, "vorbis comment count")?;
        let count = U32_LE.decode(buf, at)?;
        at += 4;

        // Each comment needs at least its length prefix.
        let mut comments = Vec::with_capacity((count as usize).min(buf.len() / 4));
        for _ in 0..count {
            comments.push(read_string(buf, &mut at, "vorbis comment")?);
        }

        Ok((Self { vendor, comments }, at))
    }

    /// Values of every comment whose key matches `key`, ignoring ASCII case.
    pub fn get<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.comments.iter().filter_map(move |c| {
            let (k, v) = c.split_once('=')?;
            k.eq_ignore_ascii_case(key).then_some(v)
        })
    }
}

fn read_string(buf: &[u8], at: &mut usize, name: &'static str) -> Result<String> {
    field(buf, *at, 4, name)?;
    let len = U32_LE.decode(buf, *at)? as usize;
    *at += 4;
    let raw = field(buf, *at, len, name)?;
    *at += len;
    Ok(TextEncoding::Utf8.decode(raw))
}

#[cfg(test)]
pub(crate) mod test_data {
    /// Encodes a Vorbis comment block.
    pub fn block(vendor: &str, comments: &[&str]) -> Vec<u8> {
        let mut out = (vendor.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(vendor.as_bytes());
        out.extend_from_slice(&(comments.len() as u32).to_le_bytes());
        for c in comments {
            out.extend_from_slice(&(c.len() as u32).to_le_bytes());
            out.extend_from_slice(c.as_bytes());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{test_data::block, *};
    use crate::error::{Error, StructureError};

    #[test]
    fn decodes_vendor_and_comments() {
        let mut buf = block("libFLAC", &["TITLE=Ünïcode", "artist=A", "ARTIST=B"]);
        let len = buf.len();
        buf.push(1);

        let (vc, used) = VorbisComments::decode(&buf).unwrap();
        assert_eq!(used, len);
        assert_eq!(vc.vendor, "libFLAC");
        assert_eq!(vc.get("title").collect::<Vec<_>>(), ["Ünïcode"]);
        assert_eq!(vc.get("ARTIST").collect::<Vec<_>>(), ["A", "B"]);
    }

    #[test]
    fn overlong_comment_is_structural() {
        let mut buf = block("v", &["A=1"]);
        let at = buf.len() - 7;
        buf[at..at + 4].copy_from_slice(&1_000u32.to_le_bytes());

        let err = VorbisComments::decode(&buf).unwrap_err();
        assert!(matches!(
            err,
            Error::Structure(StructureError::LengthOutOfBounds {
                field: "vorbis comment",
                length: 1_000,
                ..
            })
        ));
    }
}
