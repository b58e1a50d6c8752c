use super::{FileInfo, ReadOptions, Request, Tokenizer};
use crate::{
    error::{Error, Result},
    Config,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// A tokenizer over a forward-only async byte stream.
///
/// Peeked bytes are held in a queue until a read or ignore consumes them, so
/// the stream itself is only ever read forwards. Ignored regions are drained
/// in chunks of [`Config::ignore_chunk_len`].
pub struct StreamTokenizer<R> {
    reader: Option<R>,
    peeked: VecDeque<u8>,
    scratch: Vec<u8>,
    eof: bool,
    position: u64,
    info: FileInfo,
    ignore_chunk_len: usize,
    stream_read_len: usize,
}

impl<R> std::fmt::Debug for StreamTokenizer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTokenizer")
            .field("open", &self.reader.is_some())
            .field("peeked", &self.peeked.len())
            .field("eof", &self.eof)
            .field("position", &self.position)
            .field("info", &self.info)
            .finish()
    }
}

impl<R> StreamTokenizer<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wraps `reader`, which must be positioned at the start of the data.
    pub fn new(reader: R, info: FileInfo, config: &Config) -> Self {
        Self {
            reader: Some(reader),
            peeked: VecDeque::new(),
            scratch: Vec::new(),
            eof: false,
            position: 0,
            info,
            ignore_chunk_len: config.ignore_chunk_len.max(1),
            stream_read_len: config.stream_read_len.max(1),
        }
    }

    /// Unwraps the underlying reader, discarding any peeked bytes.
    pub fn into_inner(self) -> Option<R> {
        self.reader
    }

    fn check_open(&self) -> Result<()> {
        if self.reader.is_some() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// Pulls one read of at most `want` bytes from the stream into `scratch`.
    async fn pull(&mut self, want: usize) -> Result<usize> {
        let reader = self.reader.as_mut().ok_or(Error::Closed)?;

        if self.scratch.len() < want {
            self.scratch.resize(want, 0);
        }

        let n = reader.read(&mut self.scratch[..want]).await?;
        if n == 0 {
            trace!("Stream source ended at {}.", self.position + self.peeked.len() as u64);
            self.eof = true;
        }
        Ok(n)
    }

    /// Grows the peek queue until it holds `len` bytes or the stream ends.
    async fn fill(&mut self, len: usize) -> Result<()> {
        while self.peeked.len() < len && !self.eof {
            let want = (len - self.peeked.len()).max(self.stream_read_len);
            let n = self.pull(want).await?;
            self.peeked.extend(&self.scratch[..n]);
        }
        Ok(())
    }

    /// Copies up to `req.length` queued bytes after `skip` into `dst`.
    async fn copy_queued(&mut self, dst: &mut [u8], req: &Request, skip: usize) -> Result<usize> {
        self.fill(skip.saturating_add(req.length)).await?;

        let available = self.peeked.len().saturating_sub(skip).min(req.length);
        let n = req.settle(available)?;

        for (d, s) in dst[req.range(n)]
            .iter_mut()
            .zip(self.peeked.range(skip..skip + n))
        {
            *d = *s;
        }
        Ok(n)
    }
}

#[async_trait]
impl<R> Tokenizer for StreamTokenizer<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn position(&self) -> u64 {
        self.position
    }

    fn file_info(&self) -> &FileInfo {
        &self.info
    }

    async fn read_buffer(&mut self, dst: &mut [u8], options: ReadOptions) -> Result<usize> {
        let req = options.normalize(dst.len(), self.position)?;
        self.check_open()?;

        if req.skip > 0 {
            self.ignore(req.skip).await?;
        }

        let n = self.copy_queued(dst, &req, 0).await?;
        self.peeked.drain(..n);
        self.position += n as u64;
        Ok(n)
    }

    async fn peek_buffer(&mut self, dst: &mut [u8], options: ReadOptions) -> Result<usize> {
        let req = options.normalize(dst.len(), self.position)?;
        self.check_open()?;

        let skip = usize::try_from(req.skip)
            .map_err(|_| Error::Unsupported("peek distance beyond addressable memory"))?;
        self.copy_queued(dst, &req, skip).await
    }

    async fn ignore(&mut self, len: u64) -> Result<u64> {
        self.check_open()?;

        let target = match self.remaining() {
            Some(remaining) => len.min(remaining),
            None => len,
        };

        let from_queue = (self.peeked.len() as u64).min(target);
        self.peeked.drain(..from_queue as usize);
        let mut skipped = from_queue;

        while skipped < target && !self.eof {
            let want = (target - skipped).min(self.ignore_chunk_len as u64) as usize;
            skipped += self.pull(want).await? as u64;
        }

        self.position += skipped;
        Ok(skipped)
    }

    async fn close(&mut self) -> Result<()> {
        if self.reader.take().is_some() {
            trace!(
                "Closing stream source at {} with {} bytes unread in the peek buffer.",
                self.position,
                self.peeked.len()
            );
            self.peeked = VecDeque::new();
            self.scratch = Vec::new();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        token::{U16_BE, U8},
        tokenizer::TokenizerExt,
    };
    use std::io::Cursor;

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn small_refills_cross_chunk_boundaries() {
        let bytes: Vec<u8> = (0u8..=200).collect();
        let cfg = Config::default().stream_read_len(3).ignore_chunk_len(7);
        let mut tok = StreamTokenizer::new(Cursor::new(bytes.clone()), FileInfo::default(), &cfg);

        assert!(!tok.supports_random_access());
        assert_eq!(tok.peek_number(U16_BE).await.unwrap(), 0x0001);
        assert_eq!(tok.ignore(100).await.unwrap(), 100);
        assert_eq!(tok.read_number(U8).await.unwrap(), 100);

        let mut buf = [0u8; 10];
        tok.peek_buffer(&mut buf, ReadOptions::default().position(150))
            .await
            .unwrap();
        assert_eq!(buf[0], 150);
        assert_eq!(tok.position(), 101);

        assert_eq!(tok.ignore(1_000).await.unwrap(), 100);
        assert_eq!(tok.position(), bytes.len() as u64);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn rewinding_is_unsupported() {
        let mut tok = StreamTokenizer::new(
            Cursor::new(vec![1u8, 2, 3]),
            FileInfo::default(),
            &Config::default(),
        );
        tok.ignore(2).await.unwrap();
        assert!(matches!(
            tok.set_position(0).await,
            Err(Error::Unsupported(_))
        ));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn known_size_clamps_ignore() {
        let mut tok = StreamTokenizer::new(
            Cursor::new(vec![0u8; 32]),
            FileInfo::with_size(20),
            &Config::default(),
        );
        assert_eq!(tok.ignore(25).await.unwrap(), 20);
        assert_eq!(tok.remaining(), Some(0));
    }
}
