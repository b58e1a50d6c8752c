use super::{ChunkFormat, ChunkHeader, ChunkId};
use crate::{
    error::{Error, Result, StructureError},
    tokenizer::{ReadOptions, Tokenizer},
    Config,
};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

/// What the walker does with a chunk's payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Action {
    /// Treat the payload as a nested sequence of chunks.
    Recurse,
    /// Hand the payload to [`ChunkVisitor::leaf`].
    Leaf,
    /// Skip the payload undecoded.
    #[default]
    Skip,
}

/// Per-format behaviour plugged into [`walk`].
///
/// `path` always holds the ids from the outermost chunk down to, and including,
/// the chunk being visited.
#[async_trait]
pub trait ChunkVisitor: Send {
    /// Chooses how to handle a chunk. Ids a visitor does not know should be skipped.
    fn action(&mut self, path: &[ChunkId], header: &ChunkHeader) -> Action;

    /// Called before the children of a [`Action::Recurse`] chunk are walked.
    ///
    /// Bytes consumed here (a `LIST` type, a full-box version word, ...) count
    /// against the container's payload.
    async fn enter(
        &mut self,
        _tok: &mut dyn Tokenizer,
        _path: &[ChunkId],
        _header: &ChunkHeader,
    ) -> Result<()> {
        Ok(())
    }

    /// Decodes the payload of a [`Action::Leaf`] chunk.
    ///
    /// The tokenizer is positioned at the first payload byte. Anything left
    /// unread is skipped by the walker afterwards, reading past the payload is
    /// an [`StructureError::Overrun`].
    async fn leaf(
        &mut self,
        _tok: &mut dyn Tokenizer,
        _path: &[ChunkId],
        _header: &ChunkHeader,
    ) -> Result<()> {
        Ok(())
    }

    /// Called once a chunk and all of its children have been processed.
    fn exit(&mut self, _path: &[ChunkId], _header: &ChunkHeader) {}

    /// Ends the walk early once the visitor has what it needs.
    ///
    /// Checked before every header and after every handler. The walk then
    /// returns immediately, with the tokenizer wherever the visitor left it.
    fn should_stop(&self) -> bool {
        false
    }
}

/// Outcome of a successful [`walk`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WalkSummary {
    /// Number of chunk headers read, at every depth.
    pub chunks: usize,
    /// Bytes consumed from the tokenizer.
    pub bytes: u64,
    /// Deepest nesting level reached, counting top-level chunks as 1.
    pub max_depth: usize,
    /// Whether an unbounded level ended at a clean end of input.
    pub reached_eof: bool,
    /// Whether the visitor ended the walk early.
    pub stopped: bool,
}

/// Walks a sequence of chunks at the tokenizer's position.
///
/// `extent` bounds the top level; `None` walks until the input ends cleanly
/// between two chunks. A truncated header or payload fails the walk with
/// [`Error::EndOfStream`], leaving whatever the visitor collected intact.
#[instrument(skip(tok, visitor, config))]
pub async fn walk<V>(
    tok: &mut dyn Tokenizer,
    format: ChunkFormat,
    visitor: &mut V,
    config: &Config,
    extent: Option<u64>,
) -> Result<WalkSummary>
where
    V: ChunkVisitor + ?Sized,
{
    let start = tok.position();
    let mut walker = Walker {
        tok,
        visitor,
        format,
        config,
        path: Vec::new(),
        summary: WalkSummary::default(),
    };

    walker.level(extent).await?;
    walker.summary.bytes = walker.tok.position() - start;

    debug!(
        "Walked {} {} chunks over {} bytes.",
        walker.summary.chunks,
        format.name(),
        walker.summary.bytes
    );

    Ok(walker.summary)
}

struct Walker<'w, V: ?Sized> {
    tok: &'w mut dyn Tokenizer,
    visitor: &'w mut V,
    format: ChunkFormat,
    config: &'w Config,
    path: Vec<ChunkId>,
    summary: WalkSummary,
}

impl<'w, V> Walker<'w, V>
where
    V: ChunkVisitor + ?Sized,
{
    /// Walks sibling chunks until `budget` is used up.
    fn level(&mut self, budget: Option<u64>) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut budget = budget;

            loop {
                if self.stop_requested() {
                    break;
                }

                match budget {
                    Some(0) => break,
                    Some(rem) if rem < self.format.fixed_len() => {
                        if self.config.warn_on_leftover {
                            warn!(
                                "Skipping {} trailing bytes inside {:?}: too short for a header.",
                                rem, self.path
                            );
                        }
                        self.skip_exact(rem).await?;
                        break;
                    },
                    Some(_) => {},
                    None =>
                        if self.at_eof().await? {
                            self.summary.reached_eof = true;
                            break;
                        },
                }

                let (used, last) = self.child(budget).await?;

                if let Some(rem) = budget.as_mut() {
                    *rem -= used;
                }

                if last || self.summary.stopped {
                    break;
                }
            }

            Ok(())
        }
        .boxed()
    }

    /// Reads and processes one chunk, returning the bytes it spanned and whether
    /// it closed its level.
    async fn child(&mut self, budget: Option<u64>) -> Result<(u64, bool)> {
        let start = self.tok.position();
        let mut header = self.format.read_header(&mut *self.tok).await?;
        let header_len = header.header_len;

        if header.size.is_none() {
            header.size = budget.map(|rem| rem.saturating_sub(header_len));
        }

        if let Some(rem) = budget {
            let declared = header_len.saturating_add(header.size.unwrap_or(0));
            if declared > rem {
                return Err(Error::structure(StructureError::ChildExceedsParent {
                    id: header.id.to_string(),
                    declared,
                    remaining: rem,
                }));
            }

            if declared.saturating_add(header.padding) > rem {
                trace!("{} is missing its pad byte at the end of its parent.", header.id);
                header.padding = 0;
            }
        }

        self.summary.chunks += 1;
        self.path.push(header.id);
        self.summary.max_depth = self.summary.max_depth.max(self.path.len());

        let action = self.visitor.action(&self.path, &header);
        trace!("{:?} at {}: {:?} ({:?} bytes).", self.path, start, action, header.size);

        let body_start = self.tok.position();
        let res = self.run(action, &header, body_start).await;
        if res.is_ok() && !self.summary.stopped {
            self.visitor.exit(&self.path, &header);
        }
        self.path.pop();
        res?;

        if self.stop_requested() {
            return Ok((self.tok.position() - start, true));
        }

        let consumed = self.tok.position() - body_start;
        match header.size {
            Some(size) => {
                if consumed > size {
                    return Err(Error::structure(StructureError::Overrun {
                        id: header.id.to_string(),
                        declared: header_len.saturating_add(size),
                        consumed: header_len.saturating_add(consumed),
                    }));
                }

                let leftover = size - consumed;
                if leftover > 0 && action != Action::Skip && self.config.warn_on_leftover {
                    warn!(
                        "{} left {} of {} payload bytes unread, skipping.",
                        header.id, leftover, size
                    );
                }
                self.skip_exact(leftover.saturating_add(header.padding)).await?;
            },
            None =>
                if action == Action::Skip {
                    self.tok.ignore(u64::MAX).await?;
                },
        }

        Ok((self.tok.position() - start, header.last))
    }

    async fn run(&mut self, action: Action, header: &ChunkHeader, body_start: u64) -> Result<()> {
        match action {
            Action::Skip => Ok(()),
            Action::Leaf => self.visitor.leaf(&mut *self.tok, &self.path, header).await,
            Action::Recurse => {
                self.visitor
                    .enter(&mut *self.tok, &self.path, header)
                    .await?;

                let prelude = self.tok.position() - body_start;
                let budget = match header.size {
                    Some(size) => Some(size.checked_sub(prelude).ok_or_else(|| {
                        Error::structure(StructureError::Overrun {
                            id: header.id.to_string(),
                            declared: header.header_len.saturating_add(size),
                            consumed: header.header_len + prelude,
                        })
                    })?),
                    None => None,
                };

                self.level(budget).await
            },
        }
    }

    fn stop_requested(&mut self) -> bool {
        if !self.summary.stopped && self.visitor.should_stop() {
            debug!("Visitor ended the walk at {}.", self.tok.position());
            self.summary.stopped = true;
        }
        self.summary.stopped
    }

    async fn at_eof(&mut self) -> Result<bool> {
        let mut next = [0u8; 1];
        let n = self
            .tok
            .peek_buffer(&mut next, ReadOptions::default().may_be_less(true))
            .await?;
        Ok(n == 0)
    }

    async fn skip_exact(&mut self, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }

        if self.tok.ignore(len).await? < len {
            Err(Error::EndOfStream)
        } else {
            Ok(())
        }
    }
}
