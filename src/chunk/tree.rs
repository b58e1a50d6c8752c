use super::{Action, ChunkHeader, ChunkId, ChunkVisitor};
use crate::{
    error::{Error, Result},
    tokenizer::Tokenizer,
};
use async_trait::async_trait;
use serde::Serialize;

/// One chunk recorded in a [`ChunkTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkNode {
    /// The chunk's header, with its size resolved.
    pub header: ChunkHeader,
    /// Nesting depth, 0 for top-level chunks.
    pub depth: usize,
    /// Index of the enclosing chunk.
    pub parent: Option<usize>,
    /// How the walker handled the chunk.
    pub action: Action,
}

/// An owned arena of chunks in visit order.
///
/// Nodes refer to their parents by index. A parent always precedes its
/// children, and siblings appear in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChunkTree {
    nodes: Vec<ChunkNode>,
}

impl ChunkTree {
    /// All nodes in visit order.
    pub fn nodes(&self) -> &[ChunkNode] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no chunk was recorded.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fetches a node by index.
    pub fn get(&self, index: usize) -> Option<&ChunkNode> {
        self.nodes.get(index)
    }

    /// Indices of the top-level chunks.
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.children_of(None)
    }

    /// Indices of the direct children of `index`.
    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.children_of(Some(index))
    }

    fn children_of(&self, parent: Option<usize>) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.parent == parent)
            .map(|(i, _)| i)
    }

    /// Ids from the root down to `index`.
    pub fn path(&self, index: usize) -> Vec<ChunkId> {
        let mut out = vec![];
        let mut cursor = Some(index);
        while let Some(node) = cursor.and_then(|i| self.nodes.get(i)) {
            out.push(node.header.id);
            cursor = node.parent;
        }
        out.reverse();
        out
    }

    /// Finds the first chunk whose id path matches `path` exactly.
    pub fn find(&self, path: &[&[u8; 4]]) -> Option<usize> {
        let mut candidates: Vec<usize> = self.roots().collect();
        let (last, parents) = path.split_last()?;

        for id in parents {
            let next = candidates
                .iter()
                .copied()
                .find(|&i| self.nodes[i].header.id == **id)?;
            candidates = self.children(next).collect();
        }

        candidates
            .into_iter()
            .find(|&i| self.nodes[i].header.id == **last)
    }
}

type Classifier = dyn FnMut(&[ChunkId], &ChunkHeader) -> Action + Send;

/// A visitor which records every chunk into a [`ChunkTree`].
///
/// The classifier decides which chunks are containers; everything it does not
/// recurse into is recorded and skipped.
pub struct TreeBuilder {
    classify: Box<Classifier>,
    preludes: Vec<(ChunkId, u64)>,
    open: Vec<usize>,
    tree: ChunkTree,
}

impl TreeBuilder {
    /// Creates a builder using `classify` to choose each chunk's [`Action`].
    ///
    /// [`Action::Leaf`] is recorded but treated like [`Action::Skip`].
    pub fn new<F>(classify: F) -> Self
    where
        F: FnMut(&[ChunkId], &ChunkHeader) -> Action + Send + 'static,
    {
        Self {
            classify: Box::new(classify),
            preludes: vec![],
            open: vec![],
            tree: ChunkTree::default(),
        }
    }

    /// Declares that containers with this id start with `len` bytes of
    /// non-chunk data, which are skipped before their children.
    #[must_use]
    pub fn prelude(mut self, id: ChunkId, len: u64) -> Self {
        self.preludes.push((id, len));
        self
    }

    /// Returns the finished tree.
    pub fn into_tree(self) -> ChunkTree {
        self.tree
    }
}

impl std::fmt::Debug for TreeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeBuilder")
            .field("preludes", &self.preludes)
            .field("tree", &self.tree)
            .finish()
    }
}

#[async_trait]
impl ChunkVisitor for TreeBuilder {
    fn action(&mut self, path: &[ChunkId], header: &ChunkHeader) -> Action {
        let depth = path.len() - 1;
        let action = (self.classify)(path, header);

        self.open.truncate(depth);
        let index = self.tree.nodes.len();
        self.tree.nodes.push(ChunkNode {
            header: *header,
            depth,
            parent: self.open.last().copied(),
            action,
        });

        match action {
            Action::Recurse => {
                self.open.push(index);
                Action::Recurse
            },
            _ => Action::Skip,
        }
    }

    async fn enter(
        &mut self,
        tok: &mut dyn Tokenizer,
        _path: &[ChunkId],
        header: &ChunkHeader,
    ) -> Result<()> {
        let prelude = self
            .preludes
            .iter()
            .find(|(id, _)| *id == header.id)
            .map_or(0, |(_, len)| *len);

        if prelude > 0 && tok.ignore(prelude).await? < prelude {
            return Err(Error::EndOfStream);
        }

        Ok(())
    }
}
