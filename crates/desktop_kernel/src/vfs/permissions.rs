//! Unix-style mode bits and the acting-principal model used for every access check.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use super::node::FileNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
/// Permission bits (read/write/execute for owner, group, and other).
pub struct Mode(u16);

impl Mode {
    /// `rwxr-xr-x`, used for new directories.
    pub const DIRECTORY_DEFAULT: Mode = Mode(0o755);
    /// `rw-r--r--`, used for new files.
    pub const FILE_DEFAULT: Mode = Mode(0o644);
    /// `rwx------`, used for trash directories.
    pub const PRIVATE_DIRECTORY: Mode = Mode(0o700);
    /// `rwxrwxrwx`, used for shared scratch directories.
    pub const WORLD_WRITABLE: Mode = Mode(0o777);

    /// Builds a mode from octal bits; anything above `0o777` is discarded.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & 0o777)
    }

    /// Returns the raw octal bits.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Parses an octal string such as `"750"` or `"0o644"`.
    pub fn from_octal_str(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
        if digits.is_empty() || digits.len() > 4 {
            return None;
        }
        u16::from_str_radix(digits, 8)
            .ok()
            .filter(|bits| *bits <= 0o777)
            .map(Self)
    }

    /// Returns `true` when `class` is granted `access`.
    pub fn allows(self, class: AccessClass, access: Access) -> bool {
        let shift = match class {
            AccessClass::Owner => 6,
            AccessClass::Group => 3,
            AccessClass::Other => 0,
        };
        (self.0 >> shift) & access.bit() != 0
    }
}

impl From<u16> for Mode {
    fn from(bits: u16) -> Self {
        Self::from_bits(bits)
    }
}

impl From<Mode> for u16 {
    fn from(mode: Mode) -> Self {
        mode.0
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for class in [AccessClass::Owner, AccessClass::Group, AccessClass::Other] {
            for (access, symbol) in [
                (Access::Read, 'r'),
                (Access::Write, 'w'),
                (Access::Execute, 'x'),
            ] {
                let ch = if self.allows(class, access) { symbol } else { '-' };
                write!(f, "{ch}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Kind of access being checked.
pub enum Access {
    /// Read file content.
    Read,
    /// Mutate content or directory entries.
    Write,
    /// Execute / traverse.
    Execute,
}

impl Access {
    const fn bit(self) -> u16 {
        match self {
            Self::Read => 0o4,
            Self::Write => 0o2,
            Self::Execute => 0o1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Which triple of mode bits applies to an actor.
pub enum AccessClass {
    /// Actor owns the node.
    Owner,
    /// Actor belongs to the node's group.
    Group,
    /// Everyone else.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The user an operation is performed on behalf of.
pub struct Principal {
    /// Account name; compared against node owners.
    pub username: String,
    /// Group assigned to nodes this principal creates.
    pub primary_group: String,
    /// Every group the principal belongs to, including the primary group.
    pub groups: BTreeSet<String>,
    /// Root and admin principals bypass every mode check.
    pub is_root: bool,
    /// Home directory used for `~` expansion, relative paths, and trash.
    pub home: Option<String>,
}

impl Principal {
    /// The superuser principal.
    pub fn root() -> Self {
        Self {
            username: "root".to_string(),
            primary_group: "root".to_string(),
            groups: BTreeSet::from(["root".to_string()]),
            is_root: true,
            home: Some("/root".to_string()),
        }
    }

    /// A principal with no account: no groups, no home, always the `other` class for foreign nodes.
    pub fn guest(username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            primary_group: username.clone(),
            username,
            groups: BTreeSet::new(),
            is_root: false,
            home: None,
        }
    }

    /// Returns which triple of mode bits applies to this principal for `owner`/`group`.
    pub fn access_class(&self, owner: &str, group: &str) -> AccessClass {
        if self.username == owner {
            AccessClass::Owner
        } else if self.groups.contains(group) {
            AccessClass::Group
        } else {
            AccessClass::Other
        }
    }

    /// Returns `true` when this principal may perform `access` on `node`.
    pub fn can(&self, node: &FileNode, access: Access) -> bool {
        self.is_root
            || node
                .mode()
                .allows(self.access_class(node.owner(), node.group()), access)
    }

    /// Returns `true` when this principal may chmod/chown `node`.
    pub fn can_administer(&self, node: &FileNode) -> bool {
        self.is_root || self.username == node.owner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bits_select_the_right_triple() {
        let mode = Mode::from_bits(0o750);
        assert!(mode.allows(AccessClass::Owner, Access::Write));
        assert!(mode.allows(AccessClass::Group, Access::Read));
        assert!(!mode.allows(AccessClass::Group, Access::Write));
        assert!(!mode.allows(AccessClass::Other, Access::Read));
        assert_eq!(mode.to_string(), "rwxr-x---");
    }

    #[test]
    fn octal_parsing_rejects_out_of_range_values() {
        assert_eq!(Mode::from_octal_str("644"), Some(Mode::FILE_DEFAULT));
        assert_eq!(Mode::from_octal_str("0o700"), Some(Mode::PRIVATE_DIRECTORY));
        assert_eq!(Mode::from_octal_str("1777"), None);
        assert_eq!(Mode::from_octal_str("9"), None);
        assert_eq!(Mode::from_octal_str(""), None);
    }

    #[test]
    fn mode_deserialization_masks_extra_bits() {
        let mode: Mode = serde_json::from_str("4095").expect("deserialize");
        assert_eq!(mode.bits(), 0o777);
        assert_eq!(serde_json::to_string(&Mode::FILE_DEFAULT).expect("serialize"), "420");
    }

    #[test]
    fn access_class_prefers_owner_then_group() {
        let mut alice = Principal::guest("alice");
        alice.groups.insert("staff".to_string());
        assert_eq!(alice.access_class("alice", "staff"), AccessClass::Owner);
        assert_eq!(alice.access_class("bob", "staff"), AccessClass::Group);
        assert_eq!(alice.access_class("bob", "wheel"), AccessClass::Other);
    }
}
