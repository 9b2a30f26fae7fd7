//! Process-wide session record and its login/lock/suspend state machine.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{accounts::AccountRegistry, error::AccountError, resources::SessionLoad};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Persisted session flags.
pub struct SessionRecord {
    /// Foreground user, if any.
    pub active_user: Option<String>,
    /// Whether the foreground user is behind the lock screen.
    pub is_locked: bool,
    /// Users whose desktop survives logout until explicitly cleared.
    pub saved_sessions: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Derived session state.
pub enum SessionState<'a> {
    NoUser,
    Authenticated(&'a str),
    Locked(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What a successful login did.
pub struct LoginOutcome {
    /// The user had a saved session that was resumed.
    pub resumed: bool,
    /// A different user that was active and is now suspended.
    pub suspended: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionManager {
    record: SessionRecord,
    dirty: bool,
}

impl SessionManager {
    /// Restores a manager from stored flags. An active user without a saved marker gets one.
    pub fn from_record(mut record: SessionRecord) -> Self {
        if let Some(user) = &record.active_user {
            record.saved_sessions.insert(user.clone());
        } else {
            record.is_locked = false;
        }
        Self {
            record,
            dirty: false,
        }
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn state(&self) -> SessionState<'_> {
        match (&self.record.active_user, self.record.is_locked) {
            (None, _) => SessionState::NoUser,
            (Some(user), false) => SessionState::Authenticated(user),
            (Some(user), true) => SessionState::Locked(user),
        }
    }

    /// Foreground user, locked or not.
    pub fn active_user(&self) -> Option<&str> {
        self.record.active_user.as_deref()
    }

    /// Foreground user if unlocked.
    pub fn authenticated_user(&self) -> Option<&str> {
        match self.state() {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.record.is_locked
    }

    pub fn has_saved_session(&self, username: &str) -> bool {
        self.record.saved_sessions.contains(username)
    }

    /// Users with a saved session that are not in the foreground.
    pub fn background_users(&self) -> impl Iterator<Item = &str> {
        let active = self.active_user();
        self.record
            .saved_sessions
            .iter()
            .map(String::as_str)
            .filter(move |user| Some(*user) != active)
    }

    /// Session roles for the memory model.
    pub fn load(&self) -> SessionLoad {
        SessionLoad {
            active: self.record.active_user.clone(),
            background: self.background_users().map(str::to_string).collect(),
        }
    }

    /// Authenticates and brings `username` to the foreground.
    ///
    /// Logging in as the locked user unlocks; logging in as anyone else suspends the current
    /// user. Failures never say whether the username or the password was wrong.
    pub fn login(
        &mut self,
        username: &str,
        password: &str,
        accounts: &AccountRegistry,
    ) -> Result<LoginOutcome, AccountError> {
        if !accounts.authenticate(username, password) {
            log::info!("login failed for `{username}`");
            return Err(AccountError::AuthenticationFailed);
        }
        let suspended = self
            .record
            .active_user
            .take()
            .filter(|previous| previous != username);
        let resumed = !self.record.saved_sessions.insert(username.to_string());
        self.record.active_user = Some(username.to_string());
        self.record.is_locked = false;
        self.dirty = true;
        match &suspended {
            Some(previous) => log::info!("`{username}` logged in, `{previous}` suspended"),
            None => log::info!("`{username}` logged in (resumed: {resumed})"),
        }
        Ok(LoginOutcome { resumed, suspended })
    }

    /// Locks the foreground session. Locking twice is a no-op.
    pub fn lock(&mut self) -> Result<(), AccountError> {
        let user = self.active_user().ok_or(AccountError::NotAuthenticated)?;
        if !self.record.is_locked {
            log::info!("session of `{user}` locked");
            self.record.is_locked = true;
            self.dirty = true;
        }
        Ok(())
    }

    /// Leaves the foreground session while keeping its saved marker. Returns the user.
    pub fn logout(&mut self) -> Option<String> {
        let user = self.record.active_user.take()?;
        self.record.is_locked = false;
        self.dirty = true;
        log::info!("`{user}` logged out, session kept");
        Some(user)
    }

    /// Forgets the saved session of `username`, logging it out if it is active.
    ///
    /// Returns `true` when there was anything to clear.
    pub fn clear_session(&mut self, username: &str) -> bool {
        let was_saved = self.record.saved_sessions.remove(username);
        let was_active = self.active_user() == Some(username);
        if was_active {
            self.record.active_user = None;
            self.record.is_locked = false;
        }
        let cleared = was_saved || was_active;
        if cleared {
            self.dirty = true;
            log::info!("session of `{username}` cleared");
        }
        cleared
    }
}
