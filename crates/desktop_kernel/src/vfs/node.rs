//! Arena node types for the virtual filesystem.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::permissions::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Stable node identifier. Allocated from a monotonic counter and never reused.
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// File payload or directory entries.
pub enum NodeKind {
    /// Regular file with raw text content.
    File {
        /// File content.
        content: String,
    },
    /// Directory with ordered child ids.
    Directory {
        /// Children in insertion order.
        children: Vec<NodeId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A file or directory stored in the tree arena.
///
/// Fields are only mutable from inside the tree so callers can hold `&FileNode` views without
/// being able to break structural invariants.
pub struct FileNode {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind,
    pub(crate) owner: String,
    pub(crate) group: String,
    pub(crate) mode: Mode,
    pub(crate) modified_ms: u64,
    pub(crate) trashed_from: Option<String>,
}

impl FileNode {
    /// Stable identifier.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Path segment, unique among siblings. Empty for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent directory id; `None` only for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// File/directory payload.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns `true` for directories.
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    /// Returns `true` for regular files.
    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    /// File content, or `None` for directories.
    pub fn content(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::File { content } => Some(content),
            NodeKind::Directory { .. } => None,
        }
    }

    /// Child ids in insertion order; empty for files.
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Directory { children } => children,
            NodeKind::File { .. } => &[],
        }
    }

    /// Content length in bytes for files, entry count for directories.
    pub fn size(&self) -> usize {
        match &self.kind {
            NodeKind::File { content } => content.len(),
            NodeKind::Directory { children } => children.len(),
        }
    }

    /// Owning account name.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Owning group name.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Permission bits.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Last content or metadata change, in unix milliseconds.
    pub fn modified_ms(&self) -> u64 {
        self.modified_ms
    }

    /// Original path of a node sitting in a trash directory.
    pub fn trashed_from(&self) -> Option<&str> {
        self.trashed_from.as_deref()
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<NodeId>> {
        match &mut self.kind {
            NodeKind::Directory { children } => Some(children),
            NodeKind::File { .. } => None,
        }
    }
}
