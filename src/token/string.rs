use super::{window, Token};
use crate::error::Result;
use encoding_rs::{UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};

/// Text encodings understood by [`StringToken`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextEncoding {
    /// 7-bit ASCII. The high bit of every byte is cleared.
    Ascii,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
    /// UTF-8, with malformed sequences replaced by `U+FFFD`.
    Utf8,
    /// UTF-16, little-endian, without BOM sniffing.
    Utf16Le,
    /// UTF-16, big-endian, without BOM sniffing.
    Utf16Be,
    /// Windows code page 1252, the usual meaning of "ANSI" text in RIFF INFO chunks.
    Windows1252,
}

impl TextEncoding {
    /// Decodes `bytes` as text in this encoding.
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Ascii => bytes.iter().map(|b| char::from(b & 0x7f)).collect(),
            TextEncoding::Latin1 => bytes.iter().map(|b| char::from(*b)).collect(),
            TextEncoding::Utf8 => UTF_8.decode_without_bom_handling(bytes).0.into_owned(),
            TextEncoding::Utf16Le => UTF_16LE.decode_without_bom_handling(bytes).0.into_owned(),
            TextEncoding::Utf16Be => UTF_16BE.decode_without_bom_handling(bytes).0.into_owned(),
            TextEncoding::Windows1252 =>
                WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned(),
        }
    }
}

/// A fixed-length run of encoded text.
///
/// Usually constructed per use, after decoding the length from a preceding field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StringToken {
    len: usize,
    encoding: TextEncoding,
}

impl StringToken {
    /// Creates a token spanning `len` bytes of `encoding` text.
    pub const fn new(len: usize, encoding: TextEncoding) -> Self {
        Self { len, encoding }
    }

    /// The encoding this token decodes.
    pub const fn encoding(&self) -> TextEncoding {
        self.encoding
    }
}

impl Token for StringToken {
    type Output = String;

    fn len(&self) -> usize {
        self.len
    }

    fn decode(&self, buf: &[u8], offset: usize) -> Result<String> {
        window(buf, offset, self.len).map(|b| self.encoding.decode(b))
    }
}

/// Trims trailing NUL padding (and anything after the first NUL) from a decoded
/// C-style string.
pub fn trim_nul(mut text: String) -> String {
    if let Some(idx) = text.find('\0') {
        text.truncate(idx);
    }
    text
}
