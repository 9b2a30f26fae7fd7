//! Error types for every kernel component.
//!
//! Expected failures (missing paths, denied access, name conflicts, admission refusals) are plain
//! values. Each error maps onto a coarse [`ErrorKind`] so the presentation layer can choose an
//! actionable message without matching every variant.

use thiserror::Error;

use crate::model::WindowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Coarse failure categories surfaced to callers.
pub enum ErrorKind {
    /// Path, user, or window does not exist.
    NotFound,
    /// Owner/group/mode check failed, or no authenticated session.
    PermissionDenied,
    /// Duplicate name or username, or a move that would create a cycle.
    Conflict,
    /// Simulated memory budget exceeded.
    AdmissionDenied,
    /// A stored document could not be trusted.
    CorruptPersistence,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Path resolution failures.
pub enum PathError {
    /// A segment before the last one names a file.
    #[error("path segment `{0}` is not a directory")]
    NotADirectory(String),
    /// A `~` path was used without a home directory in context.
    #[error("home-relative path used without a home directory")]
    NoHomeDirectory,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Filesystem tree failures.
pub enum FsError {
    /// The path or node does not exist.
    #[error("no such file or directory: {0}")]
    NotFound(String),
    /// The acting user lacks the required permission bit.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// A sibling with the same name already exists.
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    /// The destination is the node itself or one of its descendants.
    #[error("cannot move `{0}` into itself or one of its descendants")]
    WouldCreateCycle(String),
    /// A directory was required.
    #[error("not a directory: {0}")]
    NotADirectory(String),
    /// A regular file was required.
    #[error("not a file: {0}")]
    NotAFile(String),
    /// The name is empty, reserved, or contains a separator.
    #[error("invalid name `{0}`")]
    InvalidName(String),
    /// The root, a home directory, or a trash directory cannot be removed or relocated.
    #[error("`{0}` is protected")]
    Protected(String),
    /// Restore was requested for a node that is not in a trash directory.
    #[error("`{0}` is not in the trash")]
    NotInTrash(String),
    /// The path itself could not be resolved.
    #[error(transparent)]
    Path(#[from] PathError),
}

impl FsError {
    /// Maps the error onto the coarse failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::NotInTrash(_) | Self::Path(_) => ErrorKind::NotFound,
            Self::PermissionDenied(_) | Self::Protected(_) => ErrorKind::PermissionDenied,
            Self::AlreadyExists(_)
            | Self::WouldCreateCycle(_)
            | Self::NotADirectory(_)
            | Self::NotAFile(_)
            | Self::InvalidName(_) => ErrorKind::Conflict,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Account and session failures.
pub enum AccountError {
    /// The username is already taken.
    #[error("user `{0}` already exists")]
    DuplicateUser(String),
    /// No account exists with that username.
    #[error("no such user: {0}")]
    UnknownUser(String),
    /// The username cannot be used as a path segment.
    #[error("invalid username `{0}`")]
    InvalidUsername(String),
    /// Username or password did not match. Deliberately does not say which.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// The operation needs an active, unlocked session.
    #[error("no authenticated session")]
    NotAuthenticated,
    /// Provisioning the home directory failed.
    #[error(transparent)]
    Filesystem(#[from] FsError),
}

impl AccountError {
    /// Maps the error onto the coarse failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateUser(_) | Self::InvalidUsername(_) => ErrorKind::Conflict,
            Self::UnknownUser(_) => ErrorKind::NotFound,
            Self::AuthenticationFailed | Self::NotAuthenticated => ErrorKind::PermissionDenied,
            Self::Filesystem(err) => err.kind(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Window registry failures.
pub enum WindowError {
    /// The window id is not registered.
    #[error("window not found: {0}")]
    NotFound(WindowId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "insufficient memory to open {app}: needs {requested_mb} MB, {current_mb} of {budget_mb} MB in use"
)]
/// Admission refusal carrying enough detail for an "insufficient memory" message.
pub struct AdmissionDenied {
    /// App token that was refused.
    pub app: String,
    /// Weighted cost of the candidate window.
    pub requested_mb: u32,
    /// Usage before the candidate.
    pub current_mb: u32,
    /// Usage including the candidate.
    pub projected_mb: u32,
    /// Configured total budget.
    pub budget_mb: u32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
/// Reasons [`crate::DesktopKernel::open_window`] can refuse a window.
pub enum OpenWindowError {
    /// No owner was given and no user is active and unlocked.
    #[error("no authenticated session")]
    NotAuthenticated,
    /// The simulated memory budget would be exceeded.
    #[error(transparent)]
    Admission(#[from] AdmissionDenied),
}

impl OpenWindowError {
    /// Maps the error onto the coarse failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotAuthenticated => ErrorKind::PermissionDenied,
            Self::Admission(_) => ErrorKind::AdmissionDenied,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("stored document `{key}` is {reason}; defaults were used")]
/// A stored document that could not be trusted and was replaced by defaults at load time.
pub struct CorruptDocument {
    /// Store key of the document.
    pub key: String,
    /// What was wrong with it.
    pub reason: String,
}

impl CorruptDocument {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Always [`ErrorKind::CorruptPersistence`].
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::CorruptPersistence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_errors_map_to_distinguishable_kinds() {
        assert_eq!(
            FsError::AlreadyExists("/a".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            FsError::PermissionDenied("/a".into()).kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(FsError::NotFound("/a".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            FsError::from(PathError::NoHomeDirectory).kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn admission_denied_message_mentions_memory() {
        let err = AdmissionDenied {
            app: "browser".to_string(),
            requested_mb: 300,
            current_mb: 900,
            projected_mb: 1200,
            budget_mb: 1024,
        };
        assert!(err.to_string().contains("insufficient memory"));
        assert_eq!(
            OpenWindowError::from(err).kind(),
            ErrorKind::AdmissionDenied
        );
    }
}
