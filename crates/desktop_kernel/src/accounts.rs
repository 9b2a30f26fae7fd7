//! User accounts, group membership, and home-directory provisioning.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    error::{AccountError, FsError},
    vfs::{path, FsTree, Mode, PathContext, Principal, TRASH_DIR_NAME},
};

/// Schema version of the persisted accounts document.
pub const ACCOUNTS_SCHEMA_VERSION: u32 = 1;
/// Uid of the built-in superuser.
pub const ROOT_UID: u32 = 0;
/// First uid handed to created accounts.
pub const FIRST_USER_UID: u32 = 1000;
/// Group every admin account joins.
pub const ADMIN_GROUP: &str = "admin";
/// Group used when an account is created without one.
pub const DEFAULT_GROUP: &str = "users";
/// Directories created inside every new home, besides the trash.
pub const HOME_SUBDIRECTORIES: [&str; 3] = ["Desktop", "Documents", "Downloads"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A user account.
pub struct User {
    /// Numeric id, unique and never reused.
    pub uid: u32,
    /// Unique login name; also the home directory name.
    pub username: String,
    /// Display name.
    pub full_name: String,
    secret: String,
    /// Hint the presentation layer may show after a failed login.
    pub password_hint: String,
    /// Absolute home directory path.
    pub home_path: String,
    /// Group assigned to files this user creates.
    pub home_group: String,
    /// All groups, including `home_group`.
    pub groups: BTreeSet<String>,
    /// Admin accounts bypass permission checks like root.
    pub is_admin: bool,
    /// Accounts that cannot start a session (the built-in root).
    #[serde(default)]
    pub login_disabled: bool,
}

impl User {
    /// Builds the principal used for filesystem checks on behalf of this user.
    pub fn principal(&self) -> Principal {
        Principal {
            username: self.username.clone(),
            primary_group: self.home_group.clone(),
            groups: self.groups.clone(),
            is_root: self.is_admin || self.uid == ROOT_UID,
            home: Some(self.home_path.clone()),
        }
    }

    fn matches_secret(&self, password: &str) -> bool {
        !self.login_disabled && self.secret == password
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Input for [`AccountRegistry::add_user`].
pub struct NewUser {
    /// Login name.
    pub username: String,
    /// Display name.
    pub full_name: String,
    /// Login secret.
    pub password: String,
    /// Password hint.
    pub hint: String,
    /// Primary group; [`DEFAULT_GROUP`] when empty.
    pub home_group: String,
    /// Whether the account is an administrator.
    pub is_admin: bool,
}

impl NewUser {
    /// Convenience constructor for a standard account in [`DEFAULT_GROUP`].
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            full_name: username.clone(),
            username,
            password: password.into(),
            hint: String::new(),
            home_group: DEFAULT_GROUP.to_string(),
            is_admin: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Persisted accounts document.
pub struct AccountsDocument {
    /// Document schema version.
    pub schema_version: u32,
    /// Next uid to allocate.
    pub next_uid: u32,
    /// Every account.
    pub users: Vec<User>,
}

#[derive(Debug, Clone)]
/// The set of accounts.
pub struct AccountRegistry {
    users: Vec<User>,
    next_uid: u32,
    dirty: bool,
}

impl AccountRegistry {
    /// Creates a registry holding only the built-in root account and ensures `/root` exists.
    pub fn with_root(tree: &mut FsTree) -> Self {
        let root_home = tree.root_id();
        if let Err(err) = tree.provision_directory(
            root_home,
            "root",
            "root",
            "root",
            Mode::PRIVATE_DIRECTORY,
        ) {
            log::warn!("could not provision /root: {err}");
        }
        Self {
            users: vec![User {
                uid: ROOT_UID,
                username: "root".to_string(),
                full_name: "System Administrator".to_string(),
                secret: String::new(),
                password_hint: String::new(),
                home_path: "/root".to_string(),
                home_group: "root".to_string(),
                groups: BTreeSet::from(["root".to_string(), ADMIN_GROUP.to_string()]),
                is_admin: true,
                login_disabled: true,
            }],
            next_uid: FIRST_USER_UID,
            dirty: true,
        }
    }

    /// Rebuilds the registry from a stored document.
    ///
    /// Later duplicates of a username are dropped, and the uid counter is raised above every
    /// stored uid.
    pub fn from_document(document: AccountsDocument) -> Self {
        let mut seen = BTreeSet::new();
        let mut users = Vec::with_capacity(document.users.len());
        for user in document.users {
            if seen.insert(user.username.clone()) {
                users.push(user);
            } else {
                log::warn!("dropping duplicate stored account `{}`", user.username);
            }
        }
        let max_uid = users.iter().map(|u| u.uid).max().unwrap_or(ROOT_UID);
        Self {
            next_uid: document
                .next_uid
                .max(max_uid.saturating_add(1))
                .max(FIRST_USER_UID),
            users,
            dirty: false,
        }
    }

    /// Serializes the registry.
    pub fn to_document(&self) -> AccountsDocument {
        AccountsDocument {
            schema_version: ACCOUNTS_SCHEMA_VERSION,
            next_uid: self.next_uid,
            users: self.users.clone(),
        }
    }

    /// Returns `true` when the registry changed since it was last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Every account, in creation order.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Looks up an account by exact username.
    pub fn user(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }

    /// Returns the principal for `username`, or a guest principal when no account exists.
    pub fn principal_for(&self, username: &str) -> Principal {
        self.user(username)
            .map(User::principal)
            .unwrap_or_else(|| Principal::guest(username))
    }

    /// Returns the stored hint for `username`.
    pub fn password_hint(&self, username: &str) -> Option<&str> {
        self.user(username).map(|u| u.password_hint.as_str())
    }

    /// Creates an account and provisions its home directory.
    ///
    /// Nothing is changed when the username is taken or invalid, or when the home location is
    /// blocked by an existing file.
    pub fn add_user(&mut self, new: NewUser, tree: &mut FsTree) -> Result<&User, AccountError> {
        validate_username(&new.username)?;
        if self.user(&new.username).is_some() {
            return Err(AccountError::DuplicateUser(new.username));
        }
        let home_group = if new.home_group.trim().is_empty() {
            DEFAULT_GROUP.to_string()
        } else {
            new.home_group.trim().to_string()
        };
        let home_path = path::join(crate::vfs::HOME_ROOT, &new.username);
        check_home_location(tree, &home_path)?;

        let root = tree.root_id();
        let homes = tree.provision_directory(root, "home", "root", "root", Mode::DIRECTORY_DEFAULT)?;
        let home = tree.provision_directory(
            homes,
            &new.username,
            &new.username,
            &home_group,
            Mode::DIRECTORY_DEFAULT,
        )?;
        for name in HOME_SUBDIRECTORIES {
            tree.provision_directory(home, name, &new.username, &home_group, Mode::DIRECTORY_DEFAULT)?;
        }
        tree.provision_directory(
            home,
            TRASH_DIR_NAME,
            &new.username,
            &home_group,
            Mode::PRIVATE_DIRECTORY,
        )?;

        let mut groups = BTreeSet::from([home_group.clone()]);
        if new.is_admin {
            groups.insert(ADMIN_GROUP.to_string());
        }
        let uid = self.next_uid;
        self.next_uid = self.next_uid.saturating_add(1);
        log::info!("created account `{}` (uid {uid})", new.username);
        self.users.push(User {
            uid,
            username: new.username,
            full_name: new.full_name,
            secret: new.password,
            password_hint: new.hint,
            home_path,
            home_group,
            groups,
            is_admin: new.is_admin,
            login_disabled: false,
        });
        self.dirty = true;
        Ok(&self.users[self.users.len() - 1])
    }

    /// Returns `true` when `username` exists, may log in, and `password` matches.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        self.user(username)
            .is_some_and(|user| user.matches_secret(password))
    }

    /// Replaces the password after verifying the current one.
    pub fn change_password(
        &mut self,
        username: &str,
        current: &str,
        new_password: &str,
        new_hint: Option<&str>,
    ) -> Result<(), AccountError> {
        if !self.authenticate(username, current) {
            return Err(AccountError::AuthenticationFailed);
        }
        let user = self
            .users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| AccountError::UnknownUser(username.to_string()))?;
        user.secret = new_password.to_string();
        if let Some(hint) = new_hint {
            user.password_hint = hint.to_string();
        }
        self.dirty = true;
        Ok(())
    }

    /// Adds `username` to `group`. Returns `false` when it was already a member.
    pub fn add_to_group(&mut self, username: &str, group: &str) -> Result<bool, AccountError> {
        if group.trim().is_empty() {
            return Err(AccountError::InvalidUsername(group.to_string()));
        }
        let user = self
            .users
            .iter_mut()
            .find(|u| u.username == username)
            .ok_or_else(|| AccountError::UnknownUser(username.to_string()))?;
        let added = user.groups.insert(group.to_string());
        self.dirty |= added;
        Ok(added)
    }
}

fn validate_username(username: &str) -> Result<(), AccountError> {
    let valid = path::validate_name(username).is_ok()
        && !username.starts_with('~')
        && !username.starts_with('.')
        && !username.chars().any(char::is_whitespace);
    if valid {
        Ok(())
    } else {
        Err(AccountError::InvalidUsername(username.to_string()))
    }
}

fn check_home_location(tree: &FsTree, home_path: &str) -> Result<(), FsError> {
    let blocked = |p: &str| {
        tree.get_node_at_path(p, PathContext::ROOT)
            .is_some_and(|node| !node.is_dir())
    };
    if blocked(crate::vfs::HOME_ROOT) || blocked(home_path) {
        return Err(FsError::AlreadyExists(home_path.to_string()));
    }
    for name in HOME_SUBDIRECTORIES.iter().chain([&TRASH_DIR_NAME]) {
        let sub = path::join(home_path, name);
        if blocked(&sub) {
            return Err(FsError::AlreadyExists(sub));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use platform_host::ManualClock;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ErrorKind;

    fn setup() -> (FsTree, AccountRegistry) {
        let mut tree = FsTree::seeded(Rc::new(ManualClock::starting_at(1)));
        let accounts = AccountRegistry::with_root(&mut tree);
        (tree, accounts)
    }

    #[test]
    fn add_user_provisions_home_layout() {
        let (mut tree, mut accounts) = setup();
        let mut new = NewUser::new("alice", "secret1");
        new.full_name = "Alice Liddell".to_string();
        let user = accounts.add_user(new, &mut tree).expect("add user").clone();

        assert_eq!(user.uid, FIRST_USER_UID);
        assert_eq!(user.home_path, "/home/alice");
        assert_eq!(user.groups, BTreeSet::from(["users".to_string()]));
        let listing: Vec<_> = tree
            .list_directory("/home/alice", PathContext::ROOT)
            .expect("home exists")
            .into_iter()
            .map(|n| (n.name().to_string(), n.owner().to_string(), n.mode()))
            .collect();
        assert_eq!(
            listing,
            vec![
                ("Desktop".to_string(), "alice".to_string(), Mode::DIRECTORY_DEFAULT),
                ("Documents".to_string(), "alice".to_string(), Mode::DIRECTORY_DEFAULT),
                ("Downloads".to_string(), "alice".to_string(), Mode::DIRECTORY_DEFAULT),
                (".Trash".to_string(), "alice".to_string(), Mode::PRIVATE_DIRECTORY),
            ]
        );
    }

    #[test]
    fn duplicate_usernames_are_rejected_case_sensitively() {
        let (mut tree, mut accounts) = setup();
        accounts.add_user(NewUser::new("alice", "a"), &mut tree).unwrap();
        let err = accounts
            .add_user(NewUser::new("alice", "b"), &mut tree)
            .unwrap_err();
        assert_eq!(err, AccountError::DuplicateUser("alice".to_string()));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        accounts.add_user(NewUser::new("Alice", "c"), &mut tree).unwrap();
        assert_eq!(accounts.users().len(), 3);
    }

    #[test]
    fn invalid_or_blocked_usernames_leave_no_state() {
        let (mut tree, mut accounts) = setup();
        let root = Principal::root();
        tree.create_file("/home", "bob", "not a dir", &root).unwrap();
        let nodes = tree.len();

        for bad in ["", "a/b", "..", "~x", "with space", ".hidden"] {
            assert!(matches!(
                accounts.add_user(NewUser::new(bad, "p"), &mut tree),
                Err(AccountError::InvalidUsername(_))
            ));
        }
        assert!(matches!(
            accounts.add_user(NewUser::new("bob", "p"), &mut tree),
            Err(AccountError::Filesystem(FsError::AlreadyExists(_)))
        ));
        assert_eq!(tree.len(), nodes);
        assert_eq!(accounts.users().len(), 1);
    }

    #[test]
    fn authenticate_compares_secret_and_never_admits_root() {
        let (mut tree, mut accounts) = setup();
        accounts
            .add_user(NewUser::new("alice", "secret1"), &mut tree)
            .unwrap();
        assert!(accounts.authenticate("alice", "secret1"));
        assert!(!accounts.authenticate("alice", "wrong"));
        assert!(!accounts.authenticate("nobody", "secret1"));
        assert!(!accounts.authenticate("root", ""));
    }

    #[test]
    fn change_password_requires_current_secret() {
        let (mut tree, mut accounts) = setup();
        accounts.add_user(NewUser::new("alice", "old"), &mut tree).unwrap();
        assert_eq!(
            accounts.change_password("alice", "bad", "new", None),
            Err(AccountError::AuthenticationFailed)
        );
        accounts
            .change_password("alice", "old", "new", Some("rhymes with blue"))
            .unwrap();
        assert!(accounts.authenticate("alice", "new"));
        assert_eq!(accounts.password_hint("alice"), Some("rhymes with blue"));
    }

    #[test]
    fn admin_principals_bypass_checks_and_guests_do_not() {
        let (mut tree, mut accounts) = setup();
        let mut admin = NewUser::new("ada", "p");
        admin.is_admin = true;
        accounts.add_user(admin, &mut tree).unwrap();
        let principal = accounts.principal_for("ada");
        assert!(principal.is_root);
        assert!(principal.groups.contains(ADMIN_GROUP));

        let guest = accounts.principal_for("ghost");
        assert!(!guest.is_root);
        assert_eq!(guest.home, None);
    }

    #[test]
    fn document_round_trip_keeps_uid_counter_ahead() {
        let (mut tree, mut accounts) = setup();
        accounts.add_user(NewUser::new("alice", "p"), &mut tree).unwrap();
        let mut document = accounts.to_document();
        document.next_uid = 0;
        document.users.push(document.users[1].clone());

        let mut restored = AccountRegistry::from_document(document);
        assert_eq!(restored.users().len(), 2);
        let bob = restored
            .add_user(NewUser::new("bob", "p"), &mut tree)
            .unwrap();
        assert_eq!(bob.uid, FIRST_USER_UID + 1);
    }
}
