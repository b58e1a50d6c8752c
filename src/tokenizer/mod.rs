//! Position-tracked, peekable byte sources.
//!
//! A [`Tokenizer`] owns one source (a file, an async byte stream, or an
//! in-memory buffer) and exposes the same sequential cursor over all three:
//!  * reads consume bytes and advance [`position`],
//!  * peeks return the same bytes without advancing,
//!  * [`ignore`] skips bytes without handing them to the caller.
//!
//! Identical byte content must decode identically whichever source backs the
//! tokenizer. Token-level helpers live in [`TokenizerExt`], which is
//! implemented for every tokenizer, including `dyn Tokenizer`.
//!
//! [`position`]: Tokenizer::position
//! [`ignore`]: Tokenizer::ignore

mod buffer;
mod file;
mod stream;

pub use self::{buffer::*, file::*, stream::*};

use crate::{
    constants::NUMBER_SCRATCH_LEN,
    error::{Error, Result},
    token::{FromNumber, Num, StringToken, TextEncoding, Token, U8},
    Config,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

/// Facts about a tokenizer's source, captured at construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Total length of the source in bytes, if known.
    ///
    /// Streams of unknown length are treated as unbounded until they end.
    pub size: Option<u64>,
    /// Path the source was opened from, if any.
    pub path: Option<PathBuf>,
    /// MIME type supplied by the caller, if any.
    pub mime_type: Option<String>,
}

impl FileInfo {
    /// Source information with a known size.
    pub fn with_size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Default::default()
        }
    }
}

/// Parameters of a [`read_buffer`] or [`peek_buffer`] call.
///
/// [`read_buffer`]: Tokenizer::read_buffer
/// [`peek_buffer`]: Tokenizer::peek_buffer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Offset into the destination buffer at which to start writing.
    pub offset: usize,
    /// Number of bytes to transfer. Defaults to the rest of the destination.
    pub length: Option<usize>,
    /// Absolute source position to read from.
    ///
    /// Must not be behind the tokenizer's position. Positions ahead of it are
    /// skipped to first (and, for reads, consumed).
    pub position: Option<u64>,
    /// Allow fewer than `length` bytes to be returned at the end of the source.
    pub may_be_less: bool,
}

impl ReadOptions {
    /// Sets the destination offset.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the number of bytes to transfer.
    #[must_use]
    pub fn length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets the absolute source position to read from.
    #[must_use]
    pub fn position(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    /// Sets whether short transfers at the end of the source are allowed.
    #[must_use]
    pub fn may_be_less(mut self, may_be_less: bool) -> Self {
        self.may_be_less = may_be_less;
        self
    }

    /// Validates these options against a destination of `dst_len` bytes and a
    /// tokenizer at `position`.
    pub(crate) fn normalize(&self, dst_len: usize, position: u64) -> Result<Request> {
        let length = self
            .length
            .unwrap_or_else(|| dst_len.saturating_sub(self.offset));
        let needed = self.offset.saturating_add(length);

        if needed > dst_len {
            return Err(Error::BufferTooSmall {
                needed,
                available: dst_len,
            });
        }

        let skip = match self.position {
            Some(p) if p < position => {
                return Err(Error::PositionBehind {
                    requested: p,
                    current: position,
                })
            },
            Some(p) => p - position,
            None => 0,
        };

        Ok(Request {
            offset: self.offset,
            length,
            skip,
            may_be_less: self.may_be_less,
        })
    }
}

/// Validated form of [`ReadOptions`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Request {
    pub offset: usize,
    pub length: usize,
    /// Bytes between the tokenizer position and the first requested byte.
    pub skip: u64,
    pub may_be_less: bool,
}

impl Request {
    /// Checks a transfer of `available` bytes against this request.
    pub fn settle(&self, available: usize) -> Result<usize> {
        if available < self.length && !self.may_be_less {
            Err(Error::EndOfStream)
        } else {
            Ok(available.min(self.length))
        }
    }

    pub fn range(&self, n: usize) -> std::ops::Range<usize> {
        self.offset..self.offset + n
    }
}

/// A sequential, peekable cursor over one byte source.
///
/// All methods which touch the source may suspend. A tokenizer has exactly one
/// logical reader: every method takes `&mut self`.
#[async_trait]
pub trait Tokenizer: Send {
    /// Number of bytes consumed so far. Peeks never change this.
    fn position(&self) -> u64;

    /// Facts about the source captured at construction.
    fn file_info(&self) -> &FileInfo;

    /// Returns whether [`set_position`] can move the cursor anywhere.
    ///
    /// [`set_position`]: Tokenizer::set_position
    fn supports_random_access(&self) -> bool {
        false
    }

    /// Bytes left in the source, if its size is known.
    fn remaining(&self) -> Option<u64> {
        self.file_info()
            .size
            .map(|size| size.saturating_sub(self.position()))
    }

    /// Reads bytes into `dst`, advancing the position by the number read.
    ///
    /// Fails with [`Error::EndOfStream`] if fewer bytes than requested exist and
    /// `may_be_less` is not set. No requested bytes are consumed then, but a
    /// forward skip to [`ReadOptions::position`] is kept.
    async fn read_buffer(&mut self, dst: &mut [u8], options: ReadOptions) -> Result<usize>;

    /// Reads bytes into `dst` without advancing the position.
    async fn peek_buffer(&mut self, dst: &mut [u8], options: ReadOptions) -> Result<usize>;

    /// Advances the position by up to `len` bytes without transferring them.
    ///
    /// Returns the number of bytes skipped, which is less than `len` only at the
    /// end of the source.
    async fn ignore(&mut self, len: u64) -> Result<u64>;

    /// Moves the cursor to an absolute position, backwards included.
    ///
    /// Only sources with random access support this.
    async fn set_position(&mut self, _position: u64) -> Result<()> {
        Err(Error::Unsupported("set_position on a sequential source"))
    }

    /// Releases the source. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// Token-level operations available on every [`Tokenizer`].
#[async_trait]
pub trait TokenizerExt: Tokenizer {
    /// Reads and decodes one token, advancing by its length.
    async fn read_token<T>(&mut self, token: &T) -> Result<T::Output>
    where
        T: Token + Sync + ?Sized,
        T::Output: Send,
    {
        let mut buf = vec![0u8; token.len()];
        self.read_buffer(&mut buf, ReadOptions::default()).await?;
        token.decode(&buf, 0)
    }

    /// Decodes one token without advancing.
    async fn peek_token<T>(&mut self, token: &T) -> Result<T::Output>
    where
        T: Token + Sync + ?Sized,
        T::Output: Send,
    {
        let mut buf = vec![0u8; token.len()];
        self.peek_buffer(&mut buf, ReadOptions::default()).await?;
        token.decode(&buf, 0)
    }

    /// Decodes one token at an absolute position at or ahead of the cursor,
    /// consuming everything up to its end.
    async fn read_token_at<T>(&mut self, token: &T, position: u64) -> Result<T::Output>
    where
        T: Token + Sync + ?Sized,
        T::Output: Send,
    {
        let mut buf = vec![0u8; token.len()];
        self.read_buffer(&mut buf, ReadOptions::default().position(position))
            .await?;
        token.decode(&buf, 0)
    }

    /// Reads one numeric primitive without allocating.
    async fn read_number<T>(&mut self, token: Num<T>) -> Result<T>
    where
        T: FromNumber + Send,
    {
        let mut scratch = [0u8; NUMBER_SCRATCH_LEN];
        let len = token.len();
        self.read_buffer(&mut scratch[..len], ReadOptions::default())
            .await?;
        token.decode(&scratch, 0)
    }

    /// Peeks one numeric primitive without allocating.
    async fn peek_number<T>(&mut self, token: Num<T>) -> Result<T>
    where
        T: FromNumber + Send,
    {
        let mut scratch = [0u8; NUMBER_SCRATCH_LEN];
        let len = token.len();
        self.peek_buffer(&mut scratch[..len], ReadOptions::default())
            .await?;
        token.decode(&scratch, 0)
    }

    /// Reads `len` bytes of text.
    async fn read_string(&mut self, len: usize, encoding: TextEncoding) -> Result<String> {
        self.read_token(&StringToken::new(len, encoding)).await
    }

    /// Reads an IFF-style Pascal string: a length byte, that many bytes of text,
    /// and a pad byte if needed to make the whole field even.
    ///
    /// Returns the text and the number of bytes consumed.
    async fn read_pascal_string(&mut self, encoding: TextEncoding) -> Result<(String, u64)> {
        let len = self.read_number(U8).await?;
        let text = self.read_string(usize::from(len), encoding).await?;
        let mut consumed = 1 + u64::from(len);
        if consumed % 2 == 1 {
            consumed += self.ignore(1).await?;
        }
        Ok((text, consumed))
    }
}

impl<Z: Tokenizer + ?Sized> TokenizerExt for Z {}

/// Creates a tokenizer over an in-memory buffer.
pub fn from_buffer(bytes: impl Into<Vec<u8>>) -> BufferTokenizer {
    BufferTokenizer::new(bytes)
}

/// Opens a file-backed tokenizer.
pub async fn from_file(path: impl AsRef<Path>, config: &Config) -> Result<FileTokenizer> {
    FileTokenizer::open(path, config).await
}

/// Creates a tokenizer over an async byte stream.
///
/// If `path` names the stream's backing file, it is `stat`-ed to learn the size;
/// otherwise the size is unknown.
pub async fn from_stream<R>(
    reader: R,
    path: Option<&Path>,
    config: &Config,
) -> Result<StreamTokenizer<R>>
where
    R: AsyncRead + Unpin + Send,
{
    let mut info = FileInfo::default();
    if let Some(path) = path {
        info.size = tokio::fs::metadata(path).await.ok().map(|m| m.len());
        info.path = Some(path.to_path_buf());
    }

    Ok(StreamTokenizer::new(reader, info, config))
}
