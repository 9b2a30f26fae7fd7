//! Virtual filesystem: arena tree, paths, permissions, and the persisted document form.

pub mod node;
pub mod path;
pub mod permissions;
pub mod persist;
pub mod tree;

pub use node::{FileNode, NodeId, NodeKind};
pub use path::{expand_path, normalize_path, PathContext};
pub use permissions::{Access, AccessClass, Mode, Principal};
pub use persist::{FsDocument, LoadRepairs, StoredNode, StoredNodeType, FS_DOCUMENT_VERSION};
pub use tree::{FsTree, HOME_ROOT, TRASH_DIR_NAME};
