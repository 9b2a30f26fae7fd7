//! Nested JSON document form of the tree and the validation applied when loading it.

use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
};

use platform_host::Clock;
use serde::{Deserialize, Serialize};

use super::{
    node::{FileNode, NodeId, NodeKind},
    path,
    permissions::Mode,
    tree::FsTree,
};

/// Current filesystem document version.
pub const FS_DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Node type tag in the stored document.
pub enum StoredNodeType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One node of the stored document. Unknown fields are ignored on read.
pub struct StoredNode {
    /// Stable node id.
    pub id: u64,
    /// Path segment.
    pub name: String,
    /// File or directory.
    #[serde(rename = "type")]
    pub node_type: StoredNodeType,
    /// File content; files only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Nested children; directories only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<StoredNode>>,
    /// Owning account.
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Owning group.
    #[serde(default = "default_owner")]
    pub group: String,
    /// Octal permission bits.
    #[serde(default = "default_permissions")]
    pub permissions: Mode,
    /// Last modification, unix milliseconds.
    #[serde(default)]
    pub modified: u64,
    /// Original path for nodes sitting in a trash directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trashed_from: Option<String>,
}

fn default_owner() -> String {
    "root".to_string()
}

fn default_permissions() -> Mode {
    Mode::DIRECTORY_DEFAULT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The whole tree as persisted under one store key.
pub struct FsDocument {
    /// Document version.
    pub version: u32,
    /// Next id to allocate.
    #[serde(default)]
    pub next_id: u64,
    /// Root directory.
    pub root: StoredNode,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// Counts of repairs applied while loading a document.
pub struct LoadRepairs {
    /// Nodes whose id collided with an earlier node and received a fresh id.
    pub reassigned_ids: usize,
    /// Nodes renamed because their name was invalid or taken by a sibling.
    pub renamed: usize,
}

impl FsTree {
    /// Serializes the tree into its nested document form.
    pub fn to_document(&self) -> FsDocument {
        FsDocument {
            version: FS_DOCUMENT_VERSION,
            next_id: self.next_id,
            root: self.store_node(self.root),
        }
    }

    fn store_node(&self, id: NodeId) -> StoredNode {
        let node = &self.nodes[&id];
        let (node_type, content, children) = match &node.kind {
            NodeKind::File { content } => (StoredNodeType::File, Some(content.clone()), None),
            NodeKind::Directory { children } => (
                StoredNodeType::Directory,
                None,
                Some(children.iter().map(|child| self.store_node(*child)).collect()),
            ),
        };
        StoredNode {
            id: id.0,
            name: node.name.clone(),
            node_type,
            content,
            children,
            owner: node.owner.clone(),
            group: node.group.clone(),
            permissions: node.mode,
            modified: node.modified_ms,
            trashed_from: node.trashed_from.clone(),
        }
    }

    /// Rebuilds a tree from a stored document.
    ///
    /// Returns `None` when the root is not a directory. Duplicate ids are replaced with fresh
    /// ones, invalid or clashing sibling names are made unique, and the id counter is raised above
    /// every id in the document, so the returned tree satisfies every structural invariant.
    pub fn from_document(document: FsDocument, clock: Rc<dyn Clock>) -> Option<(Self, LoadRepairs)> {
        if document.root.node_type != StoredNodeType::Directory {
            return None;
        }
        let max_id = max_stored_id(&document.root);
        let mut loader = Loader {
            nodes: HashMap::new(),
            seen: HashSet::new(),
            next_id: document.next_id.max(max_id.saturating_add(1)).max(2),
            repairs: LoadRepairs::default(),
        };
        let root = loader.insert(document.root, None, String::new());
        let tree = Self::from_parts(loader.nodes, root, loader.next_id, clock);
        Some((tree, loader.repairs))
    }
}

fn max_stored_id(node: &StoredNode) -> u64 {
    node.children
        .iter()
        .flatten()
        .map(max_stored_id)
        .fold(node.id, u64::max)
}

struct Loader {
    nodes: HashMap<NodeId, FileNode>,
    seen: HashSet<u64>,
    next_id: u64,
    repairs: LoadRepairs,
}

impl Loader {
    fn insert(&mut self, stored: StoredNode, parent: Option<NodeId>, name: String) -> NodeId {
        let id = if stored.id == 0 || !self.seen.insert(stored.id) {
            self.repairs.reassigned_ids += 1;
            let fresh = self.next_id;
            self.next_id += 1;
            self.seen.insert(fresh);
            NodeId(fresh)
        } else {
            NodeId(stored.id)
        };

        let kind = match stored.node_type {
            StoredNodeType::File => NodeKind::File {
                content: stored.content.unwrap_or_default(),
            },
            StoredNodeType::Directory => NodeKind::Directory {
                children: Vec::new(),
            },
        };
        self.nodes.insert(
            id,
            FileNode {
                id,
                name,
                parent,
                kind,
                owner: stored.owner,
                group: stored.group,
                mode: stored.permissions,
                modified_ms: stored.modified,
                trashed_from: stored.trashed_from,
            },
        );

        if stored.node_type == StoredNodeType::Directory {
            let mut taken: HashSet<String> = HashSet::new();
            let mut children = Vec::new();
            for child in stored.children.unwrap_or_default() {
                let base = if path::validate_name(&child.name).is_ok() {
                    child.name.clone()
                } else {
                    self.repairs.renamed += 1;
                    repaired_name(&child.name)
                };
                let name = path::unique_name(&base, |candidate| taken.contains(candidate));
                if name != base {
                    self.repairs.renamed += 1;
                }
                taken.insert(name.clone());
                children.push(self.insert(child, Some(id), name));
            }
            if let Some(slot) = self.nodes.get_mut(&id).and_then(FileNode::children_mut) {
                *slot = children;
            }
        }
        id
    }
}

/// Makes a stored name usable as a path segment, cutting it to `MAX_NAME_LEN` bytes on a char
/// boundary.
fn repaired_name(raw: &str) -> String {
    let mut cleaned = String::new();
    for ch in raw.chars().filter(|ch| *ch != '\0') {
        let ch = if ch == '/' || ch == '\\' { '_' } else { ch };
        if cleaned.len() + ch.len_utf8() > path::MAX_NAME_LEN {
            break;
        }
        cleaned.push(ch);
    }
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "untitled".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use platform_host::{parse_document, ManualClock};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::vfs::{PathContext, Principal};

    fn clock() -> Rc<dyn Clock> {
        Rc::new(ManualClock::starting_at(5))
    }

    #[test]
    fn document_round_trip_preserves_tree() {
        let mut tree = FsTree::seeded(clock());
        let root = Principal::root();
        tree.create_directory("/tmp", "box", &root).unwrap();
        tree.create_file("/tmp/box", "a.txt", "alpha", &root).unwrap();

        let document = tree.to_document();
        let raw = serde_json::to_string(&document).unwrap();
        let reparsed: FsDocument = parse_document(&raw).expect("valid document");
        let (loaded, repairs) = FsTree::from_document(reparsed, clock()).expect("load");

        assert_eq!(repairs, LoadRepairs::default());
        assert_eq!(loaded.to_document(), document);
        assert_eq!(loaded.read_file("/tmp/box/a.txt", &root), Ok("alpha"));
        assert!(!loaded.is_dirty());
    }

    #[test]
    fn stored_shape_uses_type_tag_and_omits_absent_fields() {
        let tree = FsTree::seeded(clock());
        let value = serde_json::to_value(tree.to_document()).unwrap();
        assert_eq!(value["root"]["type"], json!("directory"));
        assert_eq!(value["root"]["permissions"], json!(0o755));
        assert!(value["root"].get("content").is_none());
        assert_eq!(value["root"]["children"][0]["name"], json!("home"));
    }

    #[test]
    fn loading_repairs_duplicate_ids_and_names() {
        let raw = json!({
            "version": 1,
            "next_id": 3,
            "extra_field": "ignored",
            "root": {
                "id": 1, "name": "", "type": "directory", "owner": "root", "group": "root",
                "permissions": 493, "modified": 0,
                "children": [
                    {"id": 2, "name": "a", "type": "file", "content": "one"},
                    {"id": 2, "name": "a", "type": "file", "content": "two"},
                    {"id": 9, "name": "bad/name", "type": "directory"}
                ]
            }
        })
        .to_string();
        let document: FsDocument = parse_document(&raw).expect("parses");
        let (tree, repairs) = FsTree::from_document(document, clock()).expect("load");

        assert_eq!(repairs.reassigned_ids, 1);
        assert_eq!(repairs.renamed, 2);
        let root = Principal::root();
        assert_eq!(tree.read_file("/a", &root), Ok("one"));
        assert_eq!(tree.read_file("/a (2)", &root), Ok("two"));
        assert!(tree.get_node_at_path("/bad_name", PathContext::ROOT).is_some());
        assert!(tree.next_id > 9);
        let ids: HashSet<_> = tree.iter().map(FileNode::id).collect();
        assert_eq!(ids.len(), tree.len());
    }

    #[test]
    fn file_root_is_rejected() {
        let document = FsDocument {
            version: 1,
            next_id: 2,
            root: StoredNode {
                id: 1,
                name: String::new(),
                node_type: StoredNodeType::File,
                content: Some("x".to_string()),
                children: None,
                owner: "root".to_string(),
                group: "root".to_string(),
                permissions: Mode::FILE_DEFAULT,
                modified: 0,
                trashed_from: None,
            },
        };
        assert!(FsTree::from_document(document, clock()).is_none());
    }

    #[test]
    fn repaired_multibyte_names_fit_the_byte_limit() {
        let name = repaired_name(&"é".repeat(200));
        assert_eq!(name.len(), 254);
        assert_eq!(name.chars().count(), 127);
        assert_eq!(path::validate_name(&name), Ok(()));

        let name = repaired_name(&format!("a{}", "€".repeat(100)));
        assert!(name.len() <= path::MAX_NAME_LEN);
        assert_eq!(path::validate_name(&name), Ok(()));
        assert_eq!(repaired_name("a/b\\c\0"), "a_b_c");
    }
}
