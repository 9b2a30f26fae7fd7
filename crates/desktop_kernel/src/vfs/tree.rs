//! Arena-backed filesystem tree with permission-checked operations.
//!
//! Nodes live in a map keyed by [`NodeId`]; parents are stored as ids, so a move is a re-link of
//! two child lists plus one parent pointer. Every operation validates completely before it
//! mutates anything, so a failed call leaves the tree exactly as it was.

use std::{collections::HashMap, rc::Rc};

use platform_host::Clock;

use super::{
    node::{FileNode, NodeId, NodeKind},
    path::{self, PathContext},
    permissions::{Access, Mode, Principal},
};
use crate::error::{FsError, PathError};

/// Name of the per-user trash directory inside each home.
pub const TRASH_DIR_NAME: &str = ".Trash";
/// Directory that holds every user home.
pub const HOME_ROOT: &str = "/home";

#[derive(Debug)]
/// The virtual filesystem.
pub struct FsTree {
    pub(crate) nodes: HashMap<NodeId, FileNode>,
    pub(crate) root: NodeId,
    pub(crate) next_id: u64,
    dirty: bool,
    clock: Rc<dyn Clock>,
}

impl FsTree {
    /// Creates a tree holding only an empty root directory owned by `root`.
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        let root = NodeId(1);
        let now = clock.now_ms();
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            FileNode {
                id: root,
                name: String::new(),
                parent: None,
                kind: NodeKind::Directory {
                    children: Vec::new(),
                },
                owner: "root".to_string(),
                group: "root".to_string(),
                mode: Mode::DIRECTORY_DEFAULT,
                modified_ms: now,
                trashed_from: None,
            },
        );
        Self {
            nodes,
            root,
            next_id: 2,
            dirty: true,
            clock,
        }
    }

    /// Creates the first-boot tree: `/home`, `/root`, `/tmp`, and `/etc`.
    pub fn seeded(clock: Rc<dyn Clock>) -> Self {
        let mut tree = Self::new(clock);
        let root = tree.root;
        for (name, mode) in [
            ("home", Mode::DIRECTORY_DEFAULT),
            ("root", Mode::PRIVATE_DIRECTORY),
            ("tmp", Mode::WORLD_WRITABLE),
            ("etc", Mode::DIRECTORY_DEFAULT),
        ] {
            tree.insert_child(root, name, Self::empty_dir(), "root", "root", mode);
        }
        tree
    }

    pub(crate) fn from_parts(
        nodes: HashMap<NodeId, FileNode>,
        root: NodeId,
        next_id: u64,
        clock: Rc<dyn Clock>,
    ) -> Self {
        Self {
            nodes,
            root,
            next_id,
            dirty: false,
            clock,
        }
    }

    /// Id of the root directory.
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns `true` when the tree changed since it was last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Looks up a node by id.
    pub fn node(&self, id: NodeId) -> Option<&FileNode> {
        self.nodes.get(&id)
    }

    /// Iterates every node in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &FileNode> {
        self.nodes.values()
    }

    /// Resolves `raw` to a node id.
    ///
    /// Returns `Ok(None)` for a path that simply does not exist and an error when an intermediate
    /// segment names a file.
    pub fn resolve(&self, raw: &str, ctx: PathContext<'_>) -> Result<Option<NodeId>, PathError> {
        let normalized = path::expand_path(raw, ctx)?;
        let mut current = self.root;
        let mut walked = String::new();
        for segment in path::segments(&normalized) {
            let Some(node) = self.nodes.get(&current) else {
                return Ok(None);
            };
            if !node.is_dir() {
                return Err(PathError::NotADirectory(if walked.is_empty() {
                    "/".to_string()
                } else {
                    walked
                }));
            }
            let Some(child) = self.child_named(current, segment) else {
                return Ok(None);
            };
            walked.push('/');
            walked.push_str(segment);
            current = child;
        }
        Ok(Some(current))
    }

    /// Returns the node at `raw`, or `None` when it is missing or unreachable.
    pub fn get_node_at_path(&self, raw: &str, ctx: PathContext<'_>) -> Option<&FileNode> {
        let id = self.resolve(raw, ctx).ok().flatten()?;
        self.nodes.get(&id)
    }

    /// Lists a directory in insertion order. `None` when `raw` is missing or not a directory.
    pub fn list_directory(&self, raw: &str, ctx: PathContext<'_>) -> Option<Vec<&FileNode>> {
        let node = self.get_node_at_path(raw, ctx)?;
        if !node.is_dir() {
            return None;
        }
        Some(
            node.children()
                .iter()
                .filter_map(|child| self.nodes.get(child))
                .collect(),
        )
    }

    /// Rebuilds the absolute path of a node from its parent chain.
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = self.nodes.get(&id)?;
        while let Some(parent) = current.parent {
            names.push(current.name.as_str());
            current = self.nodes.get(&parent)?;
        }
        if names.is_empty() {
            return Some("/".to_string());
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    /// Returns `true` when `ancestor` is `node` or lies on its parent chain.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    /// Creates a regular file in `dir`.
    pub fn create_file(
        &mut self,
        dir: &str,
        name: &str,
        content: &str,
        actor: &Principal,
    ) -> Result<NodeId, FsError> {
        self.create_node(
            dir,
            name,
            NodeKind::File {
                content: content.to_string(),
            },
            Mode::FILE_DEFAULT,
            actor,
        )
    }

    /// Creates an empty directory in `dir`.
    pub fn create_directory(
        &mut self,
        dir: &str,
        name: &str,
        actor: &Principal,
    ) -> Result<NodeId, FsError> {
        self.create_node(dir, name, Self::empty_dir(), Mode::DIRECTORY_DEFAULT, actor)
    }

    /// Reads a file's content.
    pub fn read_file(&self, raw: &str, actor: &Principal) -> Result<&str, FsError> {
        let id = self.require(raw, actor)?;
        let node = &self.nodes[&id];
        let Some(content) = node.content() else {
            return Err(FsError::NotAFile(self.display_path(id)));
        };
        if !actor.can(node, Access::Read) {
            return Err(FsError::PermissionDenied(self.display_path(id)));
        }
        Ok(content)
    }

    /// Overwrites an existing file. Never creates files.
    pub fn write_file(&mut self, raw: &str, content: &str, actor: &Principal) -> Result<(), FsError> {
        let id = self.require(raw, actor)?;
        let node = &self.nodes[&id];
        if !node.is_file() {
            return Err(FsError::NotAFile(self.display_path(id)));
        }
        if !actor.can(node, Access::Write) {
            return Err(FsError::PermissionDenied(self.display_path(id)));
        }
        let now = self.clock.now_ms();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.kind = NodeKind::File {
                content: content.to_string(),
            };
            node.modified_ms = now;
        }
        self.dirty = true;
        Ok(())
    }

    /// Re-parents node `id` under the directory at `dest`.
    ///
    /// Moving a node into the directory that already holds it is a successful no-op.
    pub fn move_node_by_id(
        &mut self,
        id: NodeId,
        dest: &str,
        actor: &Principal,
    ) -> Result<(), FsError> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| FsError::NotFound(id.to_string()))?;
        let dest_id = self.require(dest, actor)?;
        let dest_node = &self.nodes[&dest_id];
        if !dest_node.is_dir() {
            return Err(FsError::NotADirectory(self.display_path(dest_id)));
        }
        if self.is_ancestor_or_self(id, dest_id) {
            return Err(FsError::WouldCreateCycle(self.display_path(id)));
        }
        if self.is_protected(id) {
            return Err(FsError::Protected(self.display_path(id)));
        }
        let Some(parent_id) = node.parent else {
            return Err(FsError::Protected("/".to_string()));
        };
        if parent_id == dest_id {
            return Ok(());
        }
        if self.child_named(dest_id, &node.name).is_some() {
            return Err(FsError::AlreadyExists(path::join(
                &self.display_path(dest_id),
                &node.name,
            )));
        }
        self.require_access(parent_id, Access::Write, actor)?;
        self.require_access(dest_id, Access::Write, actor)?;

        self.relink(id, dest_id);
        self.dirty = true;
        Ok(())
    }

    /// Renames the node at `raw` within its directory.
    pub fn rename_node(&mut self, raw: &str, new_name: &str, actor: &Principal) -> Result<(), FsError> {
        path::validate_name(new_name)?;
        let id = self.require(raw, actor)?;
        if self.is_protected(id) {
            return Err(FsError::Protected(self.display_path(id)));
        }
        let Some(parent_id) = self.nodes[&id].parent else {
            return Err(FsError::Protected("/".to_string()));
        };
        if self.nodes[&id].name == new_name {
            return Ok(());
        }
        if self.child_named(parent_id, new_name).is_some() {
            return Err(FsError::AlreadyExists(path::join(
                &self.display_path(parent_id),
                new_name,
            )));
        }
        self.require_access(parent_id, Access::Write, actor)?;

        let now = self.clock.now_ms();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = new_name.to_string();
            node.modified_ms = now;
        }
        self.touch(parent_id, now);
        self.dirty = true;
        Ok(())
    }

    /// Replaces the permission bits of the node at `raw`. Owner or root only.
    pub fn chmod(&mut self, raw: &str, mode: Mode, actor: &Principal) -> Result<(), FsError> {
        let id = self.require(raw, actor)?;
        if !actor.can_administer(&self.nodes[&id]) {
            return Err(FsError::PermissionDenied(self.display_path(id)));
        }
        let now = self.clock.now_ms();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.mode = mode;
            node.modified_ms = now;
        }
        self.dirty = true;
        Ok(())
    }

    /// Replaces the owner and group of the node at `raw`. Owner or root only.
    pub fn chown(
        &mut self,
        raw: &str,
        owner: &str,
        group: &str,
        actor: &Principal,
    ) -> Result<(), FsError> {
        let id = self.require(raw, actor)?;
        if !actor.can_administer(&self.nodes[&id]) {
            return Err(FsError::PermissionDenied(self.display_path(id)));
        }
        if owner.trim().is_empty() || group.trim().is_empty() {
            return Err(FsError::InvalidName(format!("{owner}:{group}")));
        }
        let now = self.clock.now_ms();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.owner = owner.to_string();
            node.group = group.to_string();
            node.modified_ms = now;
        }
        self.dirty = true;
        Ok(())
    }

    /// Moves the node at `raw` into the actor's trash, or erases it when it is already in a trash.
    ///
    /// Returns the id of the trashed node, which is unchanged by the move.
    pub fn delete_node(&mut self, raw: &str, actor: &Principal) -> Result<NodeId, FsError> {
        let id = self.require(raw, actor)?;
        if self.is_protected(id) {
            return Err(FsError::Protected(self.display_path(id)));
        }
        if self.trash_containing(id).is_some() {
            self.erase_node(id, actor)?;
            return Ok(id);
        }
        let parent_id = self.nodes[&id]
            .parent
            .ok_or_else(|| FsError::Protected("/".to_string()))?;
        self.require_access(parent_id, Access::Write, actor)?;
        if let Some(home) = self.home_of(actor) {
            if self.is_ancestor_or_self(id, home) {
                return Err(FsError::WouldCreateCycle(self.display_path(id)));
            }
        }
        let trash_id = self.ensure_trash(actor)?;
        let original = self.display_path(id);
        let name = self.free_name_in(trash_id, &self.nodes[&id].name);

        self.relink(id, trash_id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = name;
            node.trashed_from = Some(original);
        }
        self.dirty = true;
        Ok(id)
    }

    /// Moves a trashed node back to where it was deleted from.
    ///
    /// Falls back to the actor's home when the original directory is gone, and picks a free name
    /// when the original name was taken in the meantime. Returns the restored path.
    pub fn restore_from_trash(&mut self, id: NodeId, actor: &Principal) -> Result<String, FsError> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| FsError::NotFound(id.to_string()))?;
        let (Some(original), Some(trash_id)) = (node.trashed_from.clone(), self.trash_containing(id))
        else {
            return Err(FsError::NotInTrash(self.display_path(id)));
        };
        let parent_id = node.parent.unwrap_or(trash_id);
        let (original_dir, original_name) =
            path::split_parent(&original).unwrap_or(("/", node.name.as_str()));
        let original_name = original_name.to_string();

        let dest_id = match self.resolve(original_dir, PathContext::ROOT) {
            Ok(Some(dir)) if self.nodes[&dir].is_dir() && !self.is_ancestor_or_self(trash_id, dir) => {
                dir
            }
            _ => {
                let home = actor
                    .home
                    .as_deref()
                    .ok_or(FsError::Path(PathError::NoHomeDirectory))?;
                self.require(home, actor)?
            }
        };
        self.require_access(parent_id, Access::Write, actor)?;
        self.require_access(dest_id, Access::Write, actor)?;
        let name = self.free_name_in(dest_id, &original_name);

        self.relink(id, dest_id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = name;
            node.trashed_from = None;
        }
        self.dirty = true;
        Ok(self.display_path(id))
    }

    /// Permanently removes node `id` and its whole subtree. Returns the number of erased nodes.
    pub fn erase_node(&mut self, id: NodeId, actor: &Principal) -> Result<usize, FsError> {
        if !self.nodes.contains_key(&id) {
            return Err(FsError::NotFound(id.to_string()));
        }
        if self.is_protected(id) {
            return Err(FsError::Protected(self.display_path(id)));
        }
        let parent_id = self.nodes[&id]
            .parent
            .ok_or_else(|| FsError::Protected("/".to_string()))?;
        self.require_access(parent_id, Access::Write, actor)?;

        let now = self.clock.now_ms();
        if let Some(children) = self.nodes.get_mut(&parent_id).and_then(FileNode::children_mut) {
            children.retain(|child| *child != id);
        }
        self.touch(parent_id, now);
        let mut stack = vec![id];
        let mut erased = 0;
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                stack.extend(node.children().iter().copied());
                erased += 1;
            }
        }
        self.dirty = true;
        Ok(erased)
    }

    /// Erases everything in the actor's trash. Returns the number of erased nodes.
    pub fn empty_trash(&mut self, actor: &Principal) -> Result<usize, FsError> {
        let Some(trash_id) = self.trash_of(actor) else {
            return Ok(0);
        };
        self.require_access(trash_id, Access::Write, actor)?;
        let children = self.nodes[&trash_id].children().to_vec();
        let mut erased = 0;
        for child in children {
            erased += self.erase_node(child, actor)?;
        }
        Ok(erased)
    }

    /// Lists the actor's trash, or an empty list when no trash exists yet.
    pub fn trash_contents(&self, actor: &Principal) -> Vec<&FileNode> {
        self.trash_of(actor)
            .and_then(|id| self.nodes.get(&id))
            .map(|trash| {
                trash
                    .children()
                    .iter()
                    .filter_map(|child| self.nodes.get(child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Creates a directory without permission checks; used when provisioning homes.
    ///
    /// Returns the existing directory when one with that name is already present.
    pub(crate) fn provision_directory(
        &mut self,
        parent: NodeId,
        name: &str,
        owner: &str,
        group: &str,
        mode: Mode,
    ) -> Result<NodeId, FsError> {
        path::validate_name(name)?;
        let parent_node = self
            .nodes
            .get(&parent)
            .ok_or_else(|| FsError::NotFound(parent.to_string()))?;
        if !parent_node.is_dir() {
            return Err(FsError::NotADirectory(self.display_path(parent)));
        }
        if let Some(existing) = self.child_named(parent, name) {
            if self.nodes[&existing].is_dir() {
                return Ok(existing);
            }
            return Err(FsError::AlreadyExists(path::join(
                &self.display_path(parent),
                name,
            )));
        }
        let id = self.insert_child(parent, name, Self::empty_dir(), owner, group, mode);
        Ok(id)
    }

    fn create_node(
        &mut self,
        dir: &str,
        name: &str,
        kind: NodeKind,
        mode: Mode,
        actor: &Principal,
    ) -> Result<NodeId, FsError> {
        path::validate_name(name)?;
        let parent = self.require(dir, actor)?;
        if !self.nodes[&parent].is_dir() {
            return Err(FsError::NotADirectory(self.display_path(parent)));
        }
        self.require_access(parent, Access::Write, actor)?;
        if self.child_named(parent, name).is_some() {
            return Err(FsError::AlreadyExists(path::join(
                &self.display_path(parent),
                name,
            )));
        }
        let owner = actor.username.clone();
        let group = actor.primary_group.clone();
        Ok(self.insert_child(parent, name, kind, &owner, &group, mode))
    }

    fn insert_child(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        owner: &str,
        group: &str,
        mode: Mode,
    ) -> NodeId {
        let id = self.alloc_id();
        let now = self.clock.now_ms();
        self.nodes.insert(
            id,
            FileNode {
                id,
                name: name.to_string(),
                parent: Some(parent),
                kind,
                owner: owner.to_string(),
                group: group.to_string(),
                mode,
                modified_ms: now,
                trashed_from: None,
            },
        );
        if let Some(children) = self.nodes.get_mut(&parent).and_then(FileNode::children_mut) {
            children.push(id);
        }
        self.touch(parent, now);
        self.dirty = true;
        id
    }

    fn alloc_id(&mut self) -> NodeId {
        while self.nodes.contains_key(&NodeId(self.next_id)) {
            self.next_id += 1;
        }
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn relink(&mut self, id: NodeId, dest: NodeId) {
        let now = self.clock.now_ms();
        let old_parent = self.nodes.get(&id).and_then(|n| n.parent);
        if let Some(old_parent) = old_parent {
            if let Some(children) = self
                .nodes
                .get_mut(&old_parent)
                .and_then(FileNode::children_mut)
            {
                children.retain(|child| *child != id);
            }
            self.touch(old_parent, now);
        }
        if let Some(children) = self.nodes.get_mut(&dest).and_then(FileNode::children_mut) {
            children.push(id);
        }
        self.touch(dest, now);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(dest);
            node.modified_ms = now;
        }
    }

    fn touch(&mut self, id: NodeId, now: u64) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.modified_ms = now;
        }
    }

    fn require(&self, raw: &str, actor: &Principal) -> Result<NodeId, FsError> {
        let ctx = Self::context_for(actor);
        self.resolve(raw, ctx)?
            .ok_or_else(|| FsError::NotFound(path::expand_path(raw, ctx).unwrap_or_default()))
    }

    fn require_access(&self, id: NodeId, access: Access, actor: &Principal) -> Result<(), FsError> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| FsError::NotFound(id.to_string()))?;
        if actor.can(node, access) {
            Ok(())
        } else {
            Err(FsError::PermissionDenied(self.display_path(id)))
        }
    }

    pub(crate) fn child_named(&self, dir: NodeId, name: &str) -> Option<NodeId> {
        self.nodes
            .get(&dir)?
            .children()
            .iter()
            .copied()
            .find(|child| self.nodes.get(child).is_some_and(|n| n.name == name))
    }

    fn free_name_in(&self, dir: NodeId, base: &str) -> String {
        path::unique_name(base, |candidate| self.child_named(dir, candidate).is_some())
    }

    fn display_path(&self, id: NodeId) -> String {
        self.path_of(id).unwrap_or_else(|| id.to_string())
    }

    fn home_root(&self) -> Option<NodeId> {
        self.child_named(self.root, "home")
    }

    /// Root, `/home`, home directories, and trash directories cannot be moved, renamed, or removed.
    fn is_protected(&self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        let Some(parent) = node.parent else {
            return true;
        };
        if self.home_root() == Some(id) {
            return true;
        }
        let is_home = self.home_root() == Some(parent) || parent == self.root && node.name == "root";
        let is_trash = node.name == TRASH_DIR_NAME && self.is_home_dir(parent);
        is_home || is_trash
    }

    fn is_home_dir(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|node| {
            node.parent.is_some_and(|parent| {
                self.home_root() == Some(parent) || parent == self.root && node.name == "root"
            })
        })
    }

    /// Returns the trash directory holding `id`, if `id` sits inside one.
    fn trash_containing(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.nodes.get(&id)?.parent;
        while let Some(ancestor) = current {
            let node = self.nodes.get(&ancestor)?;
            if node.name == TRASH_DIR_NAME && node.parent.is_some_and(|p| self.is_home_dir(p)) {
                return Some(ancestor);
            }
            current = node.parent;
        }
        None
    }

    fn home_of(&self, actor: &Principal) -> Option<NodeId> {
        self.resolve(actor.home.as_deref()?, PathContext::ROOT).ok()?
    }

    fn trash_of(&self, actor: &Principal) -> Option<NodeId> {
        self.child_named(self.home_of(actor)?, TRASH_DIR_NAME)
    }

    fn ensure_trash(&mut self, actor: &Principal) -> Result<NodeId, FsError> {
        let home_path = actor
            .home
            .as_deref()
            .ok_or(FsError::Path(PathError::NoHomeDirectory))?;
        let home = self
            .resolve(home_path, PathContext::ROOT)?
            .ok_or_else(|| FsError::NotFound(home_path.to_string()))?;
        self.provision_directory(
            home,
            TRASH_DIR_NAME,
            &actor.username,
            &actor.primary_group,
            Mode::PRIVATE_DIRECTORY,
        )
    }

    fn context_for(actor: &Principal) -> PathContext<'_> {
        match actor.home.as_deref() {
            Some(home) => PathContext::at_home(home),
            None => PathContext::ROOT,
        }
    }

    fn empty_dir() -> NodeKind {
        NodeKind::Directory {
            children: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use platform_host::ManualClock;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::vfs::permissions::AccessClass;

    fn user(name: &str, groups: &[&str]) -> Principal {
        Principal {
            username: name.to_string(),
            primary_group: groups.first().copied().unwrap_or(name).to_string(),
            groups: groups.iter().map(|g| g.to_string()).collect::<BTreeSet<_>>(),
            is_root: false,
            home: Some(format!("/home/{name}")),
        }
    }

    fn tree_with_homes(names: &[&str]) -> (FsTree, ManualClock) {
        let clock = ManualClock::starting_at(1_000);
        let mut tree = FsTree::seeded(Rc::new(clock.clone()));
        let home = tree.resolve("/home", PathContext::ROOT).unwrap().unwrap();
        for name in names {
            let dir = tree
                .provision_directory(home, name, name, "users", Mode::DIRECTORY_DEFAULT)
                .unwrap();
            tree.provision_directory(dir, "Desktop", name, "users", Mode::DIRECTORY_DEFAULT)
                .unwrap();
        }
        (tree, clock)
    }

    fn names(list: Option<Vec<&FileNode>>) -> Vec<String> {
        list.unwrap_or_default()
            .into_iter()
            .map(|n| n.name().to_string())
            .collect()
    }

    #[test]
    fn seeded_tree_has_standard_directories() {
        let (tree, _) = tree_with_homes(&[]);
        assert_eq!(
            names(tree.list_directory("/", PathContext::ROOT)),
            vec!["home", "root", "tmp", "etc"]
        );
        assert_eq!(tree.path_of(tree.root_id()), Some("/".to_string()));
    }

    #[test]
    fn resolve_reports_traversal_through_files() {
        let (mut tree, _) = tree_with_homes(&["alice"]);
        let alice = user("alice", &["users"]);
        tree.create_file("~", "notes.txt", "hi", &alice).unwrap();

        assert_eq!(
            tree.resolve("/home/alice/notes.txt/inner", PathContext::ROOT),
            Err(PathError::NotADirectory("/home/alice/notes.txt".to_string()))
        );
        assert!(tree
            .get_node_at_path("/home/alice/notes.txt/inner", PathContext::ROOT)
            .is_none());
        assert!(tree.get_node_at_path("/missing", PathContext::ROOT).is_none());
        assert!(tree.list_directory("/home/alice/notes.txt", PathContext::ROOT).is_none());
    }

    #[test]
    fn create_read_write_round_trip_updates_modified() {
        let (mut tree, clock) = tree_with_homes(&["alice"]);
        let alice = user("alice", &["users"]);
        let id = tree
            .create_file("/home/alice", "notes.txt", "hi", &alice)
            .unwrap();
        assert_eq!(tree.read_file("~/notes.txt", &alice), Ok("hi"));
        let before = tree.node(id).unwrap().modified_ms();

        clock.advance(50);
        tree.write_file("notes.txt", "updated", &alice).unwrap();
        assert_eq!(tree.read_file("/home/alice/notes.txt", &alice), Ok("updated"));
        assert!(tree.node(id).unwrap().modified_ms() > before);
        assert_eq!(tree.node(id).unwrap().owner(), "alice");
        assert_eq!(tree.node(id).unwrap().group(), "users");
    }

    #[test]
    fn create_file_fails_without_partial_state() {
        let (mut tree, _) = tree_with_homes(&["alice", "bob"]);
        let alice = user("alice", &["users"]);
        let bob = user("bob", &["users"]);
        tree.create_file("~", "a.txt", "1", &alice).unwrap();
        tree.mark_clean();
        let count = tree.len();

        assert!(matches!(
            tree.create_file("/home/alice", "a.txt", "2", &alice),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            tree.create_file("/home/alice", "b.txt", "2", &bob),
            Err(FsError::PermissionDenied(_))
        ));
        assert!(matches!(
            tree.create_file("/home/nobody", "b.txt", "2", &alice),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            tree.create_file("/home/alice/a.txt", "b.txt", "2", &alice),
            Err(FsError::NotADirectory(_))
        ));
        assert!(matches!(
            tree.create_file("/home/alice", "x/y", "2", &alice),
            Err(FsError::InvalidName(_))
        ));
        assert_eq!(tree.len(), count);
        assert!(!tree.is_dirty());
        assert_eq!(tree.read_file("/home/alice/a.txt", &alice), Ok("1"));
    }

    #[test]
    fn write_file_never_creates_files() {
        let (mut tree, _) = tree_with_homes(&["alice"]);
        let alice = user("alice", &["users"]);
        assert!(matches!(
            tree.write_file("~/new.txt", "x", &alice),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            tree.write_file("~/Desktop", "x", &alice),
            Err(FsError::NotAFile(_))
        ));
        assert!(tree.get_node_at_path("/home/alice/new.txt", PathContext::ROOT).is_none());
    }

    #[test]
    fn read_respects_mode_bits_and_root_bypasses() {
        let (mut tree, _) = tree_with_homes(&["alice", "bob"]);
        let alice = user("alice", &["users"]);
        let bob = user("bob", &["users"]);
        tree.create_file("~", "secret.txt", "s", &alice).unwrap();
        assert_eq!(tree.read_file("/home/alice/secret.txt", &bob), Ok("s"));

        tree.chmod("~/secret.txt", Mode::from_bits(0o600), &alice).unwrap();
        assert!(matches!(
            tree.read_file("/home/alice/secret.txt", &bob),
            Err(FsError::PermissionDenied(_))
        ));
        assert_eq!(
            tree.read_file("/home/alice/secret.txt", &Principal::root()),
            Ok("s")
        );
    }

    #[test]
    fn chmod_and_chown_require_owner_or_root() {
        let (mut tree, _) = tree_with_homes(&["alice", "bob"]);
        let alice = user("alice", &["users"]);
        let bob = user("bob", &["users"]);
        tree.create_file("~", "a.txt", "", &alice).unwrap();

        assert!(matches!(
            tree.chmod("/home/alice/a.txt", Mode::WORLD_WRITABLE, &bob),
            Err(FsError::PermissionDenied(_))
        ));
        assert!(matches!(
            tree.chown("/home/alice/a.txt", "bob", "users", &bob),
            Err(FsError::PermissionDenied(_))
        ));
        tree.chown("/home/alice/a.txt", "bob", "bob", &alice).unwrap();
        let node = tree.get_node_at_path("/home/alice/a.txt", PathContext::ROOT).unwrap();
        assert_eq!((node.owner(), node.group()), ("bob", "bob"));
        tree.chmod("/home/alice/a.txt", Mode::from_bits(0o666), &Principal::root())
            .unwrap();
    }

    #[test]
    fn move_rejects_cycles_and_collisions() {
        let (mut tree, _) = tree_with_homes(&["alice"]);
        let alice = user("alice", &["users"]);
        let outer = tree.create_directory("~", "outer", &alice).unwrap();
        tree.create_directory("~/outer", "inner", &alice).unwrap();
        tree.create_file("~", "clash", "", &alice).unwrap();
        tree.create_file("~/outer", "clash", "", &alice).unwrap();
        let clash = tree.resolve("~/clash", PathContext::at_home("/home/alice")).unwrap().unwrap();

        assert!(matches!(
            tree.move_node_by_id(outer, "~/outer", &alice),
            Err(FsError::WouldCreateCycle(_))
        ));
        assert!(matches!(
            tree.move_node_by_id(outer, "~/outer/inner", &alice),
            Err(FsError::WouldCreateCycle(_))
        ));
        assert!(matches!(
            tree.move_node_by_id(clash, "~/outer", &alice),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            tree.move_node_by_id(outer, "~/clash", &alice),
            Err(FsError::NotADirectory(_))
        ));
        assert!(matches!(
            tree.move_node_by_id(tree.root_id(), "/tmp", &Principal::root()),
            Err(FsError::WouldCreateCycle(_))
        ));
    }

    #[test]
    fn move_preserves_subtree_and_updates_listings() {
        let (mut tree, _) = tree_with_homes(&["alice"]);
        let alice = user("alice", &["users"]);
        let docs = tree.create_directory("~", "docs", &alice).unwrap();
        tree.create_file("~/docs", "a.txt", "alpha", &alice).unwrap();

        tree.move_node_by_id(docs, "~/Desktop", &alice).unwrap();
        assert_eq!(names(tree.list_directory("/home/alice", PathContext::ROOT)), vec!["Desktop"]);
        assert_eq!(tree.read_file("~/Desktop/docs/a.txt", &alice), Ok("alpha"));
        assert_eq!(tree.path_of(docs), Some("/home/alice/Desktop/docs".to_string()));
        tree.move_node_by_id(docs, "~/Desktop", &alice).unwrap();
    }

    #[test]
    fn move_requires_write_on_both_directories() {
        let (mut tree, _) = tree_with_homes(&["alice", "bob"]);
        let alice = user("alice", &["users"]);
        let bob = user("bob", &["users"]);
        let id = tree.create_file("~", "a.txt", "", &alice).unwrap();
        assert!(matches!(
            tree.move_node_by_id(id, "/home/bob", &alice),
            Err(FsError::PermissionDenied(_))
        ));
        assert!(matches!(
            tree.move_node_by_id(id, "/tmp", &bob),
            Err(FsError::PermissionDenied(_))
        ));
        tree.move_node_by_id(id, "/tmp", &alice).unwrap();
    }

    #[test]
    fn rename_checks_collisions_and_protection() {
        let (mut tree, _) = tree_with_homes(&["alice"]);
        let alice = user("alice", &["users"]);
        tree.create_file("~", "a.txt", "", &alice).unwrap();
        tree.create_file("~", "b.txt", "", &alice).unwrap();
        assert!(matches!(
            tree.rename_node("~/a.txt", "b.txt", &alice),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            tree.rename_node("/home/alice", "mallory", &Principal::root()),
            Err(FsError::Protected(_))
        ));
        tree.rename_node("~/a.txt", "c.txt", &alice).unwrap();
        assert_eq!(
            names(tree.list_directory("~", PathContext::at_home("/home/alice"))),
            vec!["Desktop", "c.txt", "b.txt"]
        );
    }

    #[test]
    fn delete_moves_to_trash_and_restore_brings_it_back() {
        let (mut tree, _) = tree_with_homes(&["alice"]);
        let alice = user("alice", &["users"]);
        let first = tree.create_file("~/Desktop", "a.txt", "one", &alice).unwrap();
        tree.delete_node("~/Desktop/a.txt", &alice).unwrap();
        let second = tree.create_file("~/Desktop", "a.txt", "two", &alice).unwrap();
        tree.delete_node("~/Desktop/a.txt", &alice).unwrap();

        let trash = tree.trash_contents(&alice);
        assert_eq!(
            trash.iter().map(|n| n.name()).collect::<Vec<_>>(),
            vec!["a.txt", "a (2).txt"]
        );
        assert_eq!(
            tree.node(first).unwrap().trashed_from(),
            Some("/home/alice/Desktop/a.txt")
        );
        let trash_node = tree
            .get_node_at_path("/home/alice/.Trash", PathContext::ROOT)
            .unwrap();
        assert_eq!(trash_node.mode(), Mode::PRIVATE_DIRECTORY);

        assert_eq!(
            tree.restore_from_trash(second, &alice),
            Ok("/home/alice/Desktop/a.txt".to_string())
        );
        assert_eq!(
            tree.restore_from_trash(first, &alice),
            Ok("/home/alice/Desktop/a (2).txt".to_string())
        );
        assert_eq!(tree.read_file("~/Desktop/a (2).txt", &alice), Ok("one"));
        assert!(matches!(
            tree.restore_from_trash(first, &alice),
            Err(FsError::NotInTrash(_))
        ));
    }

    #[test]
    fn restore_falls_back_to_home_when_origin_is_gone() {
        let (mut tree, _) = tree_with_homes(&["alice"]);
        let alice = user("alice", &["users"]);
        tree.create_directory("~", "gone", &alice).unwrap();
        let id = tree.create_file("~/gone", "a.txt", "x", &alice).unwrap();
        tree.delete_node("~/gone/a.txt", &alice).unwrap();
        let gone = tree.resolve("~/gone", PathContext::at_home("/home/alice")).unwrap().unwrap();
        tree.erase_node(gone, &alice).unwrap();

        assert_eq!(
            tree.restore_from_trash(id, &alice),
            Ok("/home/alice/a.txt".to_string())
        );
    }

    #[test]
    fn deleting_inside_trash_erases_and_empty_trash_clears_everything() {
        let (mut tree, _) = tree_with_homes(&["alice"]);
        let alice = user("alice", &["users"]);
        let dir = tree.create_directory("~", "dir", &alice).unwrap();
        tree.create_file("~/dir", "inner.txt", "", &alice).unwrap();
        tree.create_file("~", "b.txt", "", &alice).unwrap();
        tree.delete_node("~/dir", &alice).unwrap();
        tree.delete_node("~/b.txt", &alice).unwrap();
        let before = tree.len();

        tree.delete_node("~/.Trash/b.txt", &alice).unwrap();
        assert_eq!(tree.len(), before - 1);
        assert!(matches!(
            tree.delete_node("~/.Trash", &alice),
            Err(FsError::Protected(_))
        ));

        assert_eq!(tree.empty_trash(&alice), Ok(2));
        assert!(tree.node(dir).is_none());
        assert!(tree.trash_contents(&alice).is_empty());
    }

    #[test]
    fn protected_nodes_cannot_be_deleted_or_moved() {
        let (mut tree, _) = tree_with_homes(&["alice"]);
        let root = Principal::root();
        assert!(matches!(tree.delete_node("/", &root), Err(FsError::Protected(_))));
        assert!(matches!(
            tree.delete_node("/home/alice", &root),
            Err(FsError::Protected(_))
        ));
        let home = tree.resolve("/home/alice", PathContext::ROOT).unwrap().unwrap();
        assert!(matches!(
            tree.move_node_by_id(home, "/tmp", &root),
            Err(FsError::Protected(_))
        ));
        assert!(matches!(
            tree.erase_node(tree.root_id(), &root),
            Err(FsError::Protected(_))
        ));
    }

    #[test]
    fn admins_cannot_trash_or_move_the_home_root() {
        let (mut tree, _) = tree_with_homes(&["ada"]);
        let ada = Principal {
            is_root: true,
            ..user("ada", &["admin"])
        };
        assert!(matches!(tree.delete_node("/home", &ada), Err(FsError::Protected(_))));
        let home_root = tree.resolve("/home", PathContext::ROOT).unwrap().unwrap();
        assert!(matches!(
            tree.move_node_by_id(home_root, "/tmp", &ada),
            Err(FsError::Protected(_))
        ));
        assert_eq!(tree.path_of(home_root).as_deref(), Some("/home"));
        assert_tree_invariants(&tree);
    }

    #[test]
    fn trashing_an_ancestor_of_the_actors_home_is_a_cycle() {
        let (mut tree, _) = tree_with_homes(&[]);
        let tmp = tree.resolve("/tmp", PathContext::ROOT).unwrap().unwrap();
        tree.provision_directory(tmp, "ada", "ada", "admin", Mode::DIRECTORY_DEFAULT)
            .unwrap();
        let ada = Principal {
            is_root: true,
            home: Some("/tmp/ada".to_string()),
            ..user("ada", &["admin"])
        };

        assert_eq!(
            tree.delete_node("/tmp", &ada),
            Err(FsError::WouldCreateCycle("/tmp".to_string()))
        );
        assert_eq!(tree.path_of(tmp).as_deref(), Some("/tmp"));
        assert!(tree.get_node_at_path("/tmp/ada/.Trash", PathContext::ROOT).is_none());
        assert_tree_invariants(&tree);
    }

    fn assert_tree_invariants(tree: &FsTree) {
        let mut seen = BTreeSet::new();
        let mut stack = vec![tree.root_id()];
        while let Some(id) = stack.pop() {
            assert!(seen.insert(id), "node {id} reachable twice");
            let node = tree.node(id).expect("listed child exists");
            for child in node.children() {
                assert_eq!(tree.node(*child).and_then(FileNode::parent), Some(id));
                stack.push(*child);
            }
        }
        assert_eq!(seen.len(), tree.len(), "every node reachable exactly once");
        assert!(tree.iter().all(|n| n.id().0 < tree.next_id));
    }

    #[derive(Debug, Clone)]
    enum Op {
        CreateFile(usize, u8),
        CreateDir(usize, u8),
        Move(usize, usize),
        Delete(usize),
        Restore(usize),
        Erase(usize),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<usize>(), 0u8..6).prop_map(|(d, n)| Op::CreateFile(d, n)),
            (any::<usize>(), 0u8..6).prop_map(|(d, n)| Op::CreateDir(d, n)),
            (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Move(a, b)),
            any::<usize>().prop_map(Op::Delete),
            any::<usize>().prop_map(Op::Restore),
            any::<usize>().prop_map(Op::Erase),
        ]
    }

    fn pick(tree: &FsTree, index: usize, dirs_only: bool) -> Option<NodeId> {
        let home = tree.resolve("/home/alice", PathContext::ROOT).ok()??;
        let mut ids: Vec<NodeId> = tree
            .iter()
            .filter(|n| !dirs_only || n.is_dir())
            .filter(|n| tree.is_ancestor_or_self(home, n.id()))
            .map(FileNode::id)
            .collect();
        ids.sort();
        if ids.is_empty() {
            None
        } else {
            Some(ids[index % ids.len()])
        }
    }

    proptest! {
        #[test]
        fn random_operation_sequences_keep_the_tree_well_formed(ops in prop::collection::vec(arb_op(), 1..40)) {
            let (mut tree, _) = tree_with_homes(&["alice"]);
            let alice = user("alice", &["users"]);
            for op in ops {
                match op {
                    Op::CreateFile(dir, n) => {
                        if let Some(dir) = pick(&tree, dir, true) {
                            let path = tree.path_of(dir).unwrap();
                            let _ = tree.create_file(&path, &format!("f{n}"), "x", &alice);
                        }
                    }
                    Op::CreateDir(dir, n) => {
                        if let Some(dir) = pick(&tree, dir, true) {
                            let path = tree.path_of(dir).unwrap();
                            let _ = tree.create_directory(&path, &format!("d{n}"), &alice);
                        }
                    }
                    Op::Move(a, b) => {
                        if let (Some(node), Some(dest)) = (pick(&tree, a, false), pick(&tree, b, true)) {
                            let dest_path = tree.path_of(dest).unwrap();
                            let cycle = tree.is_ancestor_or_self(node, dest);
                            let result = tree.move_node_by_id(node, &dest_path, &alice);
                            if cycle {
                                prop_assert!(result.is_err());
                            }
                        }
                    }
                    Op::Delete(a) => {
                        if let Some(node) = pick(&tree, a, false) {
                            let path = tree.path_of(node).unwrap();
                            let _ = tree.delete_node(&path, &alice);
                        }
                    }
                    Op::Restore(a) => {
                        if let Some(node) = pick(&tree, a, false) {
                            let _ = tree.restore_from_trash(node, &alice);
                        }
                    }
                    Op::Erase(a) => {
                        if let Some(node) = pick(&tree, a, false) {
                            let _ = tree.erase_node(node, &alice);
                        }
                    }
                }
                assert_tree_invariants(&tree);
            }
        }

        #[test]
        fn write_succeeds_iff_mode_grants_write(bits in 0u16..0o1000, relation in 0u8..3) {
            let (mut tree, _) = tree_with_homes(&["alice"]);
            let alice = user("alice", &["users"]);
            tree.create_file("/tmp", "shared.txt", "x", &alice).unwrap();
            tree.chown("/tmp/shared.txt", "alice", "staff", &alice).unwrap();
            tree.chmod("/tmp/shared.txt", Mode::from_bits(bits), &alice).unwrap();
            let (actor, class) = match relation {
                0 => (alice.clone(), AccessClass::Owner),
                1 => (user("carol", &["staff"]), AccessClass::Group),
                _ => (user("dave", &["other"]), AccessClass::Other),
            };
            let expected = Mode::from_bits(bits).allows(class, Access::Write);
            prop_assert_eq!(tree.write_file("/tmp/shared.txt", "y", &actor).is_ok(), expected);
            prop_assert!(tree.write_file("/tmp/shared.txt", "z", &Principal::root()).is_ok());
        }

        #[test]
        fn create_succeeds_iff_parent_grants_write(bits in 0u16..0o1000, relation in 0u8..3) {
            let (mut tree, _) = tree_with_homes(&["alice"]);
            let alice = user("alice", &["users"]);
            tree.create_directory("/tmp", "box", &alice).unwrap();
            tree.chown("/tmp/box", "alice", "staff", &alice).unwrap();
            tree.chmod("/tmp/box", Mode::from_bits(bits), &alice).unwrap();
            let (actor, class) = match relation {
                0 => (alice.clone(), AccessClass::Owner),
                1 => (user("carol", &["staff"]), AccessClass::Group),
                _ => (user("dave", &["other"]), AccessClass::Other),
            };
            let expected = Mode::from_bits(bits).allows(class, Access::Write);
            prop_assert_eq!(tree.create_file("/tmp/box", "new.txt", "", &actor).is_ok(), expected);
        }
    }
}
