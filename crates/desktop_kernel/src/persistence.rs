//! Store keys and load/persist adapters for every durable kernel component.
//!
//! Loads never fail: absent, unparseable, or mis-shaped documents resolve to defaults with a
//! warning, and every document that was present but untrusted is pushed onto the caller's
//! `issues`. Persist helpers return the host's `Err(String)` so the caller can stay dirty.

use std::{collections::BTreeMap, rc::Rc};

use platform_host::{load_json_with, save_json_with, Clock, KvStore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    accounts::{AccountRegistry, AccountsDocument},
    desktop_grid::{DesktopLayout, StoredPlacement},
    error::CorruptDocument,
    model::WindowRecord,
    session::{SessionManager, SessionRecord},
    vfs::{FsDocument, FsTree},
};

/// Whole filesystem tree.
pub const FS_KEY: &str = "retrodesk.fs.v1";
/// Account registry.
pub const ACCOUNTS_KEY: &str = "retrodesk.accounts.v1";
/// Session and lock flags.
pub const SESSION_KEY: &str = "retrodesk.session.v1";
/// Desktop icon placements for every user.
pub const DESKTOP_GRID_KEY: &str = "retrodesk.desktop.grid.v1";
/// Operator configuration.
pub const CONFIG_KEY: &str = "retrodesk.config.v1";

/// Schema version of the stored window list and desktop grid documents.
pub const LAYOUT_SCHEMA_VERSION: u32 = 1;

/// Key of the window list persisted for `user`.
pub fn windows_key(user: &str) -> String {
    format!("retrodesk.windows.{user}.v1")
}

/// Reads `key`, recording a present-but-unparseable document in `issues`.
fn load_checked<S: KvStore, T: DeserializeOwned>(
    store: &S,
    key: &str,
    issues: &mut Vec<CorruptDocument>,
) -> Option<T> {
    let document = load_json_with(store, key);
    if document.is_none() && store.get(key).is_some() {
        issues.push(CorruptDocument::new(key, "unparseable"));
    }
    document
}

/// Loads the filesystem, falling back to the seeded tree.
///
/// The boolean is `true` when the stored document was absent or corrupt, meaning the returned
/// tree has not been persisted yet.
pub fn load_filesystem<S: KvStore>(
    store: &S,
    clock: Rc<dyn Clock>,
    issues: &mut Vec<CorruptDocument>,
) -> (FsTree, bool) {
    let Some(document) = load_checked::<_, FsDocument>(store, FS_KEY, issues) else {
        return (FsTree::seeded(clock), true);
    };
    match FsTree::from_document(document, Rc::clone(&clock)) {
        Some((tree, repairs)) => {
            if repairs.reassigned_ids > 0 || repairs.renamed > 0 {
                log::warn!(
                    "repaired stored filesystem: {} ids reassigned, {} nodes renamed",
                    repairs.reassigned_ids,
                    repairs.renamed
                );
            }
            (tree, false)
        }
        None => {
            log::warn!("stored filesystem root is not a directory; using the seeded tree");
            issues.push(CorruptDocument::new(FS_KEY, "rooted at a file"));
            (FsTree::seeded(clock), true)
        }
    }
}

pub fn persist_filesystem<S: KvStore>(store: &S, tree: &FsTree) -> Result<(), String> {
    save_json_with(store, FS_KEY, &tree.to_document())
}

/// Loads accounts, or a registry holding only root.
pub fn load_accounts<S: KvStore>(
    store: &S,
    tree: &mut FsTree,
    issues: &mut Vec<CorruptDocument>,
) -> AccountRegistry {
    match load_checked::<_, AccountsDocument>(store, ACCOUNTS_KEY, issues) {
        Some(document) if document.users.iter().any(|u| u.username == "root") => {
            AccountRegistry::from_document(document)
        }
        Some(_) => {
            log::warn!("stored accounts lack the root account; starting from a fresh registry");
            issues.push(CorruptDocument::new(ACCOUNTS_KEY, "missing the root account"));
            AccountRegistry::with_root(tree)
        }
        None => AccountRegistry::with_root(tree),
    }
}

pub fn persist_accounts<S: KvStore>(store: &S, accounts: &AccountRegistry) -> Result<(), String> {
    save_json_with(store, ACCOUNTS_KEY, &accounts.to_document())
}

pub fn load_session<S: KvStore>(store: &S, issues: &mut Vec<CorruptDocument>) -> SessionManager {
    SessionManager::from_record(
        load_checked::<_, SessionRecord>(store, SESSION_KEY, issues).unwrap_or_default(),
    )
}

pub fn persist_session<S: KvStore>(store: &S, session: &SessionManager) -> Result<(), String> {
    save_json_with(store, SESSION_KEY, session.record())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Stored window list of one user.
pub struct WindowsDocument {
    pub schema_version: u32,
    pub windows: Vec<WindowRecord>,
}

pub fn load_windows<S: KvStore>(
    store: &S,
    user: &str,
    issues: &mut Vec<CorruptDocument>,
) -> Vec<WindowRecord> {
    let key = windows_key(user);
    match load_checked::<_, WindowsDocument>(store, &key, issues) {
        Some(document) if document.schema_version <= LAYOUT_SCHEMA_VERSION => document.windows,
        Some(document) => {
            log::warn!(
                "ignoring windows of `{user}` stored with newer schema {}",
                document.schema_version
            );
            issues.push(CorruptDocument::new(key, "from a newer schema"));
            Vec::new()
        }
        None => Vec::new(),
    }
}

/// Persists the window list of `user`, removing the key when the list is empty.
pub fn persist_windows<S: KvStore>(store: &S, user: &str, windows: Vec<WindowRecord>) -> Result<(), String> {
    if windows.is_empty() {
        return store.remove(&windows_key(user));
    }
    save_json_with(
        store,
        &windows_key(user),
        &WindowsDocument {
            schema_version: LAYOUT_SCHEMA_VERSION,
            windows,
        },
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Stored icon placements for every user's desktop.
pub struct DesktopGridDocument {
    pub schema_version: u32,
    pub desktops: BTreeMap<String, Vec<StoredPlacement>>,
}

pub fn load_desktop_layouts<S: KvStore>(
    store: &S,
    issues: &mut Vec<CorruptDocument>,
) -> BTreeMap<String, DesktopLayout> {
    load_checked::<_, DesktopGridDocument>(store, DESKTOP_GRID_KEY, issues)
        .map(|document| {
            document
                .desktops
                .into_iter()
                .map(|(user, placements)| (user, DesktopLayout::from_placements(placements)))
                .collect()
        })
        .unwrap_or_default()
}

pub fn persist_desktop_layouts<S: KvStore>(
    store: &S,
    layouts: &BTreeMap<String, DesktopLayout>,
) -> Result<(), String> {
    let document = DesktopGridDocument {
        schema_version: LAYOUT_SCHEMA_VERSION,
        desktops: layouts
            .iter()
            .map(|(user, layout)| (user.clone(), layout.to_placements()))
            .collect(),
    };
    save_json_with(store, DESKTOP_GRID_KEY, &document)
}

#[cfg(test)]
mod tests {
    use platform_host::{ManualClock, MemoryKvStore};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        error::ErrorKind,
        vfs::{PathContext, Principal},
    };

    fn clock() -> Rc<dyn Clock> {
        Rc::new(ManualClock::starting_at(10))
    }

    #[test]
    fn missing_or_corrupt_filesystem_falls_back_to_seed() {
        let store = MemoryKvStore::default();
        let mut issues = Vec::new();
        let (tree, fresh) = load_filesystem(&store, clock(), &mut issues);
        assert!(fresh);
        assert!(tree.get_node_at_path("/home", PathContext::ROOT).is_some());
        assert!(issues.is_empty());

        store.set(FS_KEY, "[1, 2").unwrap();
        let (_, fresh) = load_filesystem(&store, clock(), &mut issues);
        assert!(fresh);
        assert_eq!(issues, vec![CorruptDocument::new(FS_KEY, "unparseable")]);

        store
            .set(
                FS_KEY,
                r#"{"version":1,"root":{"id":1,"name":"","type":"file","content":"x"}}"#,
            )
            .unwrap();
        let (tree, fresh) = load_filesystem(&store, clock(), &mut issues);
        assert!(fresh);
        assert!(tree.get_node_at_path("/tmp", PathContext::ROOT).is_some());
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|issue| issue.kind() == ErrorKind::CorruptPersistence));
    }

    #[test]
    fn filesystem_round_trips_through_store() {
        let store = MemoryKvStore::default();
        let mut issues = Vec::new();
        let (mut tree, _) = load_filesystem(&store, clock(), &mut issues);
        tree.create_file("/tmp", "a.txt", "alpha", &Principal::root())
            .unwrap();
        persist_filesystem(&store, &tree).unwrap();

        let (loaded, fresh) = load_filesystem(&store, clock(), &mut issues);
        assert!(!fresh);
        assert_eq!(loaded.read_file("/tmp/a.txt", &Principal::root()), Ok("alpha"));
    }

    #[test]
    fn stored_documents_with_reserved_keys_are_sanitized() {
        let store = MemoryKvStore::default();
        store
            .set(
                SESSION_KEY,
                r#"{"active_user":"alice","constructor":{"x":1},"saved_sessions":["alice"]}"#,
            )
            .unwrap();
        let session = load_session(&store, &mut Vec::new());
        assert_eq!(session.active_user(), Some("alice"));
    }

    #[test]
    fn empty_window_lists_remove_their_key() {
        let store = MemoryKvStore::default();
        store.set(&windows_key("alice"), "stale").unwrap();
        persist_windows(&store, "alice", Vec::new()).unwrap();
        assert!(!store.contains(&windows_key("alice")));
        let mut issues = Vec::new();
        assert!(load_windows(&store, "alice", &mut issues).is_empty());
        assert!(issues.is_empty());
    }

    #[test]
    fn desktop_layouts_round_trip() {
        let store = MemoryKvStore::default();
        let layouts = BTreeMap::from([(
            "alice".to_string(),
            DesktopLayout::from_placements([StoredPlacement {
                id: crate::vfs::NodeId(7),
                col: 1,
                row: 2,
            }]),
        )]);
        persist_desktop_layouts(&store, &layouts).unwrap();
        assert_eq!(load_desktop_layouts(&store, &mut Vec::new()), layouts);
    }

    #[test]
    fn untrusted_documents_are_reported() {
        let store = MemoryKvStore::default();
        let (mut tree, _) = load_filesystem(&store, clock(), &mut Vec::new());
        store.set(ACCOUNTS_KEY, r#"{"schema_version":1,"next_uid":1000,"users":[]}"#).unwrap();
        store.set(SESSION_KEY, "nope").unwrap();
        store
            .set(&windows_key("alice"), r#"{"schema_version":99,"windows":[]}"#)
            .unwrap();

        let mut issues = Vec::new();
        let accounts = load_accounts(&store, &mut tree, &mut issues);
        assert!(accounts.user("root").is_some());
        load_session(&store, &mut issues);
        load_windows(&store, "alice", &mut issues);
        load_desktop_layouts(&store, &mut issues);

        assert_eq!(
            issues.iter().map(|issue| issue.key.as_str()).collect::<Vec<_>>(),
            vec![ACCOUNTS_KEY, SESSION_KEY, "retrodesk.windows.alice.v1"]
        );
    }
}
