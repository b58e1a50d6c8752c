use super::{FileInfo, ReadOptions, Request, Tokenizer};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::trace;

/// A tokenizer over bytes already held in memory.
///
/// Every operation completes without suspending, and random access is free.
#[derive(Debug)]
pub struct BufferTokenizer {
    data: Vec<u8>,
    position: u64,
    info: FileInfo,
    closed: bool,
}

impl BufferTokenizer {
    /// Wraps `bytes`, recording their length as the source size.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let data = bytes.into();
        let info = FileInfo::with_size(data.len() as u64);
        Self::with_info(data, info)
    }

    /// Wraps `bytes` with caller-supplied source information.
    ///
    /// The size is always taken from the buffer itself.
    pub fn with_info(bytes: impl Into<Vec<u8>>, mut info: FileInfo) -> Self {
        let data = bytes.into();
        info.size = Some(data.len() as u64);
        Self {
            data,
            position: 0,
            info,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Copies the requested range starting at `start` into `dst`.
    fn copy_at(&self, dst: &mut [u8], req: &Request, start: u64) -> Result<usize> {
        let start = start.min(self.len());
        let available = (self.len() - start).min(req.length as u64) as usize;
        let n = req.settle(available)?;

        let start = start as usize;
        dst[req.range(n)].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}

#[async_trait]
impl Tokenizer for BufferTokenizer {
    fn position(&self) -> u64 {
        self.position
    }

    fn file_info(&self) -> &FileInfo {
        &self.info
    }

    fn supports_random_access(&self) -> bool {
        true
    }

    async fn read_buffer(&mut self, dst: &mut [u8], options: ReadOptions) -> Result<usize> {
        self.check_open()?;
        let req = options.normalize(dst.len(), self.position)?;

        if req.skip > 0 {
            self.position = (self.position + req.skip).min(self.len());
        }

        let n = self.copy_at(dst, &req, self.position)?;
        self.position += n as u64;
        Ok(n)
    }

    async fn peek_buffer(&mut self, dst: &mut [u8], options: ReadOptions) -> Result<usize> {
        self.check_open()?;
        let req = options.normalize(dst.len(), self.position)?;

        self.copy_at(dst, &req, self.position + req.skip)
    }

    async fn ignore(&mut self, len: u64) -> Result<u64> {
        self.check_open()?;
        let skipped = len.min(self.len() - self.position);
        self.position += skipped;
        Ok(skipped)
    }

    async fn set_position(&mut self, position: u64) -> Result<()> {
        self.check_open()?;
        self.position = position.min(self.len());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            trace!("Releasing {} byte buffer source.", self.data.len());
            self.closed = true;
            self.data = Vec::new();
        }
        Ok(())
    }
}
