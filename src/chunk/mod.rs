//! Size-delimited chunk, atom, and object traversal.
//!
//! Every supported container is a sequence of `(id, size, payload)` records,
//! some of which nest further records in their payload. [`walk`] reads headers
//! in one of the [`ChunkFormat`] layouts and asks a [`ChunkVisitor`] what to do
//! with each payload: recurse into it, decode it, or skip it.
//!
//! Byte accounting is enforced at every level. A child may never claim more
//! than its parent has left, a handler may never read past its payload, and any
//! payload bytes a handler leaves unread (plus pad bytes) are skipped before
//! the next sibling header is read.
//!
//! Traversal state lives on the call stack. Walkers needing an explicit tree
//! can record one with [`TreeBuilder`].

mod header;
mod tree;
mod walker;

pub use self::{header::*, tree::*, walker::*};
