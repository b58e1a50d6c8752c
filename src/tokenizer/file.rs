use super::{FileInfo, ReadOptions, Request, Tokenizer};
use crate::{
    error::{Error, Result},
    Config,
};
use async_trait::async_trait;
use std::{io::SeekFrom, path::Path};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::{debug, trace};

/// A tokenizer over a local file, read with positioned reads.
///
/// Peeks and reads may target any offset at or after the cursor without
/// buffering, and [`set_position`] can rewind.
///
/// [`set_position`]: Tokenizer::set_position
#[derive(Debug)]
pub struct FileTokenizer {
    file: Option<File>,
    /// Offset of the OS file cursor, to avoid redundant seeks.
    os_position: u64,
    position: u64,
    info: FileInfo,
}

impl FileTokenizer {
    /// Opens `path`, capturing its size and path as [`FileInfo`].
    pub async fn open(path: impl AsRef<Path>, _config: &Config) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();

        debug!("Opened {:?} ({} bytes) for tokenizing.", path, size);

        Ok(Self::from_parts(file, FileInfo {
            size: Some(size),
            path: Some(path.to_path_buf()),
            mime_type: None,
        }))
    }

    /// Wraps an already open file positioned at its start.
    ///
    /// `info.size` should hold the file's length; reads past it still succeed
    /// if the file has grown, but [`ignore`] is clamped to it.
    ///
    /// [`ignore`]: Tokenizer::ignore
    pub fn from_parts(file: File, info: FileInfo) -> Self {
        Self {
            file: Some(file),
            os_position: 0,
            position: 0,
            info,
        }
    }

    /// Fills as much of the requested range as the file holds, starting at `at`.
    async fn read_at(&mut self, dst: &mut [u8], req: &Request, at: u64) -> Result<usize> {
        let file = self.file.as_mut().ok_or(Error::Closed)?;

        if self.os_position != at {
            file.seek(SeekFrom::Start(at)).await?;
            self.os_position = at;
        }

        let target = &mut dst[req.range(req.length)];
        let mut filled = 0;
        while filled < target.len() {
            let n = file.read(&mut target[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.os_position += filled as u64;

        req.settle(filled)
    }
}

#[async_trait]
impl Tokenizer for FileTokenizer {
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
        let req = options.normalize(dst.len(), self.position)?;
        if self.file.is_none() {
            return Err(Error::Closed);
        }

        if req.skip > 0 {
            self.ignore(req.skip).await?;
        }

        let n = self.read_at(dst, &req, self.position).await?;
        self.position += n as u64;
        Ok(n)
    }

    async fn peek_buffer(&mut self, dst: &mut [u8], options: ReadOptions) -> Result<usize> {
        let req = options.normalize(dst.len(), self.position)?;
        self.read_at(dst, &req, self.position + req.skip).await
    }

    async fn ignore(&mut self, len: u64) -> Result<u64> {
        if self.file.is_none() {
            return Err(Error::Closed);
        }

        let skipped = match self.remaining() {
            Some(remaining) => len.min(remaining),
            None => len,
        };
        self.position += skipped;
        Ok(skipped)
    }

    async fn set_position(&mut self, position: u64) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::Closed);
        }

        self.position = match self.info.size {
            Some(size) => position.min(size),
            None => position,
        };
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            trace!("Closing file source {:?}.", self.info.path);
            drop(file);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{token::U32_BE, tokenizer::TokenizerExt};
    use tempdir::TempDir;

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn open_captures_file_info() {
        let dir = TempDir::new("chunkstream").unwrap();
        let path = dir.path().join("info.bin");
        tokio::fs::write(&path, [0u8, 0, 1, 0, 7, 7]).await.unwrap();

        let mut tok = FileTokenizer::open(&path, &Config::default()).await.unwrap();
        assert_eq!(tok.file_info().size, Some(6));
        assert_eq!(tok.file_info().path.as_deref(), Some(path.as_path()));
        assert_eq!(tok.read_number(U32_BE).await.unwrap(), 256);
        assert_eq!(tok.remaining(), Some(2));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn missing_files_are_io_errors() {
        let dir = TempDir::new("chunkstream").unwrap();
        let err = FileTokenizer::open(dir.path().join("absent"), &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn rewinds_after_reading_trailer() {
        let dir = TempDir::new("chunkstream").unwrap();
        let path = dir.path().join("trailer.bin");
        tokio::fs::write(&path, [1u8, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();

        let mut tok = FileTokenizer::open(&path, &Config::default()).await.unwrap();
        tok.set_position(4).await.unwrap();
        assert_eq!(tok.read_number(U32_BE).await.unwrap(), 0x0506_0708);

        tok.set_position(0).await.unwrap();
        assert_eq!(tok.peek_number(U32_BE).await.unwrap(), 0x0102_0304);
        assert_eq!(tok.position(), 0);
    }
}
