//! The kernel context: owns every component and exposes the operations the presentation layer
//! calls.
//!
//! Lifecycle is `boot` (load or default every component), mutate, `flush` whenever
//! [`DesktopKernel::is_dirty`] reports pending changes, and `shutdown`. The kernel never schedules
//! anything on its own.

use std::{
    collections::{BTreeMap, BTreeSet},
    rc::Rc,
};

use platform_host::{
    delete_app_state_with, load_app_state_with, save_app_state_with, AppStateEnvelope, Clock,
    KvStore, SystemClock,
};
use serde::Serialize;

use crate::{
    accounts::{AccountRegistry, NewUser, User},
    config::KernelConfig,
    desktop_grid::{
        self, DesktopIcon, DesktopLayout, DropOutcome, GridConfig, GridPosition, PixelPoint,
    },
    error::{AccountError, AdmissionDenied, CorruptDocument, FsError, OpenWindowError, WindowError},
    model::{AppId, OpenWindowRequest, WindowId, WindowRecord, WindowRect},
    persistence,
    resources::{self, MemoryUsage},
    session::{LoginOutcome, SessionManager, SessionState},
    vfs::{FileNode, FsTree, Mode, NodeId, PathContext, Principal},
    window_manager::{CloseGuard, CloseOutcome, WindowRegistry},
};

/// Name of the directory inside each home whose children are shown as desktop icons.
pub const DESKTOP_DIR_NAME: &str = "Desktop";

#[derive(Debug, Clone, PartialEq, Eq)]
/// A desktop icon with its committed cell and pixel origin.
pub struct PlacedIcon {
    pub id: NodeId,
    pub name: String,
    pub is_dir: bool,
    pub cell: GridPosition,
    pub pixel: PixelPoint,
}

/// Owns the filesystem, accounts, session, windows, and desktop layouts of one machine.
pub struct DesktopKernel<S: KvStore> {
    store: S,
    config: KernelConfig,
    fs: FsTree,
    accounts: AccountRegistry,
    session: SessionManager,
    windows: WindowRegistry,
    /// Owners whose stored window list has been read; their in-memory list is authoritative.
    hydrated: BTreeSet<String>,
    layouts: BTreeMap<String, DesktopLayout>,
    layouts_dirty: bool,
    load_issues: Vec<CorruptDocument>,
}

impl<S: KvStore> DesktopKernel<S> {
    /// Boots with the config stored in `store` (or defaults) and the system clock.
    pub fn boot(store: S) -> Self {
        let config = KernelConfig::load_with(&store);
        Self::boot_with_config(store, config)
    }

    pub fn boot_with_config(store: S, config: KernelConfig) -> Self {
        Self::boot_with_clock(store, config, Rc::new(SystemClock))
    }

    /// Boots with an explicit clock for node timestamps.
    pub fn boot_with_clock(store: S, config: KernelConfig, clock: Rc<dyn Clock>) -> Self {
        let mut issues = Vec::new();
        let (mut fs, fresh_fs) = persistence::load_filesystem(&store, clock, &mut issues);
        let accounts = persistence::load_accounts(&store, &mut fs, &mut issues);
        let session = persistence::load_session(&store, &mut issues);

        let mut windows = WindowRegistry::new(config.windows.clone());
        let mut hydrated = BTreeSet::new();
        for user in session.record().saved_sessions.iter() {
            windows.hydrate(user, persistence::load_windows(&store, user, &mut issues));
            hydrated.insert(user.clone());
        }
        let layouts = persistence::load_desktop_layouts(&store, &mut issues);

        log::info!(
            "kernel booted: {} nodes{}, {} accounts, {} windows, active user {:?}, {} corrupt documents",
            fs.len(),
            if fresh_fs { " (seeded)" } else { "" },
            accounts.users().len(),
            windows.all().len(),
            session.active_user(),
            issues.len()
        );
        Self {
            store,
            config,
            fs,
            accounts,
            session,
            windows,
            hydrated,
            layouts,
            layouts_dirty: false,
            load_issues: issues,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Stored documents that were replaced by defaults since boot.
    pub fn load_issues(&self) -> &[CorruptDocument] {
        &self.load_issues
    }

    /// Read-only view of the filesystem.
    pub fn filesystem(&self) -> &FsTree {
        &self.fs
    }

    /// Principal for `username`; unknown names act as guests with no groups and no home.
    pub fn principal(&self, username: &str) -> Principal {
        self.accounts.principal_for(username)
    }

    fn home_of(&self, acting_user: Option<&str>) -> Option<String> {
        let user = acting_user.or_else(|| self.session.active_user())?;
        self.accounts.user(user).map(|u| u.home_path.clone())
    }

    // Filesystem

    /// Looks up a node. `~` and relative paths use the home of `acting_user`, or of the active
    /// user when none is given.
    pub fn get_node_at_path(&self, path: &str, acting_user: Option<&str>) -> Option<&FileNode> {
        let home = self.home_of(acting_user);
        self.fs.get_node_at_path(path, context(home.as_deref()))
    }

    /// Lists a directory in insertion order; `None` when missing or not a directory.
    pub fn list_directory(&self, path: &str, acting_user: Option<&str>) -> Option<Vec<&FileNode>> {
        let home = self.home_of(acting_user);
        self.fs.list_directory(path, context(home.as_deref()))
    }

    pub fn node(&self, id: NodeId) -> Option<&FileNode> {
        self.fs.node(id)
    }

    pub fn path_of(&self, id: NodeId) -> Option<String> {
        self.fs.path_of(id)
    }

    pub fn create_file(
        &mut self,
        dir: &str,
        name: &str,
        content: &str,
        acting_user: &str,
    ) -> Result<NodeId, FsError> {
        let actor = self.principal(acting_user);
        self.fs.create_file(dir, name, content, &actor)
    }

    pub fn create_directory(&mut self, dir: &str, name: &str, acting_user: &str) -> Result<NodeId, FsError> {
        let actor = self.principal(acting_user);
        self.fs.create_directory(dir, name, &actor)
    }

    pub fn read_file(&self, path: &str, acting_user: &str) -> Result<&str, FsError> {
        let actor = self.principal(acting_user);
        self.fs.read_file(path, &actor)
    }

    /// Overwrites an existing file; use [`DesktopKernel::create_file`] for new ones.
    pub fn write_file(&mut self, path: &str, content: &str, acting_user: &str) -> Result<(), FsError> {
        let actor = self.principal(acting_user);
        self.fs.write_file(path, content, &actor)
    }

    pub fn move_node_by_id(&mut self, id: NodeId, dest: &str, acting_user: &str) -> Result<(), FsError> {
        let actor = self.principal(acting_user);
        self.fs.move_node_by_id(id, dest, &actor)
    }

    pub fn rename_node(&mut self, path: &str, new_name: &str, acting_user: &str) -> Result<(), FsError> {
        let actor = self.principal(acting_user);
        self.fs.rename_node(path, new_name, &actor)
    }

    pub fn chmod(&mut self, path: &str, mode: Mode, acting_user: &str) -> Result<(), FsError> {
        let actor = self.principal(acting_user);
        self.fs.chmod(path, mode, &actor)
    }

    pub fn chown(&mut self, path: &str, owner: &str, group: &str, acting_user: &str) -> Result<(), FsError> {
        let actor = self.principal(acting_user);
        self.fs.chown(path, owner, group, &actor)
    }

    /// Moves a node into the acting user's trash, or erases it if it is already trashed.
    pub fn delete_node(&mut self, path: &str, acting_user: &str) -> Result<NodeId, FsError> {
        let actor = self.principal(acting_user);
        self.fs.delete_node(path, &actor)
    }

    pub fn restore_from_trash(&mut self, id: NodeId, acting_user: &str) -> Result<String, FsError> {
        let actor = self.principal(acting_user);
        self.fs.restore_from_trash(id, &actor)
    }

    pub fn erase_node(&mut self, id: NodeId, acting_user: &str) -> Result<usize, FsError> {
        let actor = self.principal(acting_user);
        self.fs.erase_node(id, &actor)
    }

    pub fn empty_trash(&mut self, acting_user: &str) -> Result<usize, FsError> {
        let actor = self.principal(acting_user);
        self.fs.empty_trash(&actor)
    }

    pub fn trash_contents(&self, acting_user: &str) -> Vec<&FileNode> {
        let actor = self.principal(acting_user);
        self.fs.trash_contents(&actor)
    }

    // Accounts and session

    /// Creates an account with its home directory.
    pub fn add_user(&mut self, new: NewUser) -> Result<&User, AccountError> {
        self.accounts.add_user(new, &mut self.fs)
    }

    pub fn user(&self, username: &str) -> Option<&User> {
        self.accounts.user(username)
    }

    pub fn users(&self) -> &[User] {
        self.accounts.users()
    }

    pub fn password_hint(&self, username: &str) -> Option<&str> {
        self.accounts.password_hint(username)
    }

    pub fn change_password(
        &mut self,
        username: &str,
        current: &str,
        new_password: &str,
        new_hint: Option<&str>,
    ) -> Result<(), AccountError> {
        self.accounts
            .change_password(username, current, new_password, new_hint)
    }

    /// Adds `username` to `group`; the membership applies to the next permission check.
    pub fn add_to_group(&mut self, username: &str, group: &str) -> Result<bool, AccountError> {
        self.accounts.add_to_group(username, group)
    }

    /// Authenticates and brings `username` to the foreground, resuming its saved windows.
    pub fn login(&mut self, username: &str, password: &str) -> Result<LoginOutcome, AccountError> {
        let outcome = self.session.login(username, password, &self.accounts)?;
        if self.hydrated.insert(username.to_string()) {
            let stored = persistence::load_windows(&self.store, username, &mut self.load_issues);
            self.windows.hydrate(username, stored);
        }
        Ok(outcome)
    }

    /// Leaves the foreground session. Windows and the saved marker are kept.
    pub fn logout(&mut self) -> Option<String> {
        self.session.logout()
    }

    pub fn lock(&mut self) -> Result<(), AccountError> {
        self.session.lock()
    }

    /// Discards the saved session of `username`: closes its windows and deletes its stored window
    /// list and app state right away.
    pub fn clear_session(&mut self, username: &str) -> bool {
        let cleared = self.session.clear_session(username);
        let closed = self.windows.close_all_for(username);
        self.hydrated.insert(username.to_string());
        if let Err(err) = self.store.remove(&persistence::windows_key(username)) {
            log::warn!("could not delete stored windows of `{username}`: {err}");
            self.windows.mark_owner_dirty(username);
        }
        for app in AppId::ALL {
            if let Err(err) = delete_app_state_with(&self.store, app.token(), username) {
                log::warn!("could not delete {app} state of `{username}`: {err}");
            }
        }
        cleared || !closed.is_empty()
    }

    pub fn session_state(&self) -> SessionState<'_> {
        self.session.state()
    }

    pub fn active_user(&self) -> Option<&str> {
        self.session.active_user()
    }

    pub fn has_saved_session(&self, username: &str) -> bool {
        self.session.has_saved_session(username)
    }

    /// Suspended users: saved sessions that are not in the foreground.
    pub fn background_users(&self) -> Vec<String> {
        self.session.background_users().map(str::to_string).collect()
    }

    // Windows

    /// Opens a window for `owner`, or for the authenticated user when no owner is given.
    ///
    /// Either a fully formed window is registered and its id returned, or nothing changes.
    pub fn open_window(
        &mut self,
        request: OpenWindowRequest,
        owner: Option<&str>,
    ) -> Result<WindowId, OpenWindowError> {
        let owner = match owner {
            Some(owner) if self.accounts.user(owner).is_some() => owner.to_string(),
            Some(_) => return Err(OpenWindowError::NotAuthenticated),
            None => self
                .session
                .authenticated_user()
                .ok_or(OpenWindowError::NotAuthenticated)?
                .to_string(),
        };
        let load = self.session.load();
        Ok(self
            .windows
            .open_window(&owner, request, &self.config.resources, &load)?)
    }

    pub fn focus_window(&mut self, id: &WindowId) -> Result<(), WindowError> {
        self.windows.focus_window(id)
    }

    pub fn minimize_window(&mut self, id: &WindowId) -> Result<(), WindowError> {
        self.windows.minimize_window(id)
    }

    pub fn maximize_window(&mut self, id: &WindowId, viewport: WindowRect) -> Result<(), WindowError> {
        self.windows.maximize_window(id, viewport)
    }

    pub fn restore_window(&mut self, id: &WindowId) -> Result<(), WindowError> {
        self.windows.restore_window(id)
    }

    pub fn move_window(&mut self, id: &WindowId, x: i32, y: i32) -> Result<(), WindowError> {
        self.windows.move_window(id, x, y)
    }

    pub fn resize_window(&mut self, id: &WindowId, w: i32, h: i32) -> Result<(), WindowError> {
        self.windows.resize_window(id, w, h)
    }

    /// Closes a window immediately, bypassing its close guard.
    pub fn close_window(&mut self, id: &WindowId) -> Result<WindowRecord, WindowError> {
        self.windows.close_window(id)
    }

    pub fn set_close_guard(&mut self, id: &WindowId, guard: Rc<dyn CloseGuard>) -> Result<(), WindowError> {
        self.windows.set_close_guard(id, guard)
    }

    /// Closes a window once its close guard agrees. The window stays open until then.
    pub async fn request_close_window(&mut self, id: &WindowId) -> Result<CloseOutcome, WindowError> {
        self.windows.request_close(id).await
    }

    pub fn window(&self, id: &WindowId) -> Option<&WindowRecord> {
        self.windows.window(id)
    }

    pub fn windows_for(&self, user: &str) -> Vec<&WindowRecord> {
        self.windows.windows_for(user)
    }

    pub fn top_window(&self, user: &str) -> Option<&WindowRecord> {
        self.windows.top_window(user)
    }

    // Resource accounting

    pub fn memory_usage(&self) -> MemoryUsage {
        resources::compute_usage(&self.config.resources, self.windows.all(), &self.session.load())
    }

    /// Pure admission query; returns projected usage when `owner` may open one more `app`.
    pub fn check_admission(&self, app: AppId, owner: &str) -> Result<u32, AdmissionDenied> {
        resources::check_admission(
            &self.config.resources,
            self.windows.all(),
            &self.session.load(),
            app,
            owner,
        )
    }

    // App-local state

    /// Writes app-local state for `user` straight through to the store.
    pub fn save_app_state<T: Serialize>(
        &self,
        user: &str,
        app: AppId,
        schema_version: u32,
        payload: &T,
    ) -> Result<AppStateEnvelope, String> {
        save_app_state_with(&self.store, app.token(), user, schema_version, payload)
    }

    pub fn load_app_state(&self, user: &str, app: AppId) -> Option<AppStateEnvelope> {
        load_app_state_with(&self.store, app.token(), user)
    }

    // Desktop grid

    pub fn get_grid_config(&self, viewport: WindowRect) -> GridConfig {
        desktop_grid::get_grid_config(
            viewport.w.max(0) as u32,
            viewport.h.max(0) as u32,
            &self.config.desktop,
        )
    }

    fn desktop_icons(&self, user: &str) -> Result<Vec<DesktopIcon>, FsError> {
        let home = self
            .home_of(Some(user))
            .ok_or_else(|| FsError::NotFound(format!("home of {user}")))?;
        let desktop = crate::vfs::path::join(&home, DESKTOP_DIR_NAME);
        let children = self
            .fs
            .list_directory(&desktop, PathContext::ROOT)
            .ok_or(FsError::NotFound(desktop))?;
        Ok(children
            .into_iter()
            .map(|node| DesktopIcon {
                id: node.id(),
                is_dir: node.is_dir(),
            })
            .collect())
    }

    fn refresh_layout(&mut self, user: &str, config: &GridConfig) -> Result<Vec<DesktopIcon>, FsError> {
        let icons = self.desktop_icons(user)?;
        let layout = self.layouts.entry(user.to_string()).or_default();
        if layout.recompute(&icons, config) {
            self.layouts_dirty = true;
        }
        Ok(icons)
    }

    /// Recomputes and returns the icons on `user`'s desktop in scan order.
    pub fn desktop_layout(&mut self, user: &str, viewport: WindowRect) -> Result<Vec<PlacedIcon>, FsError> {
        let config = self.get_grid_config(viewport);
        self.refresh_layout(user, &config)?;
        let Some(layout) = self.layouts.get(user) else {
            return Ok(Vec::new());
        };
        let mut placed: Vec<PlacedIcon> = layout
            .positions()
            .iter()
            .filter_map(|(id, cell)| {
                let node = self.fs.node(*id)?;
                Some(PlacedIcon {
                    id: *id,
                    name: node.name().to_string(),
                    is_dir: node.is_dir(),
                    cell: *cell,
                    pixel: desktop_grid::grid_to_pixel(*cell, &config),
                })
            })
            .collect();
        placed.sort_by_key(|icon| desktop_grid::scan_index(icon.cell, &config));
        Ok(placed)
    }

    /// Drops desktop icon `id` at `point`.
    ///
    /// A drop onto a folder's center moves the node into that folder through the filesystem and
    /// removes its placement. If that move fails the icon keeps its cell and the error is returned.
    pub fn drop_desktop_icon(
        &mut self,
        user: &str,
        id: NodeId,
        point: PixelPoint,
        viewport: WindowRect,
    ) -> Result<DropOutcome, FsError> {
        let config = self.get_grid_config(viewport);
        let icons = self.refresh_layout(user, &config)?;
        let radius = self.config.desktop.drop_into_folder_radius;
        let layout = self.layouts.entry(user.to_string()).or_default();
        let outcome = layout.drop_icon(id, point, &icons, &config, radius);
        match &outcome {
            DropOutcome::MoveIntoFolder { folder } => {
                let dest = self
                    .fs
                    .path_of(*folder)
                    .ok_or_else(|| FsError::NotFound(folder.to_string()))?;
                let actor = self.principal(user);
                self.fs.move_node_by_id(id, &dest, &actor)?;
                if let Some(layout) = self.layouts.get_mut(user) {
                    layout.forget(id);
                }
                self.layouts_dirty = true;
            }
            DropOutcome::Placed { .. } => self.layouts_dirty = true,
            DropOutcome::Unchanged => {}
        }
        Ok(outcome)
    }

    // Lifecycle

    /// Returns `true` when any component has changes not yet written to the store.
    pub fn is_dirty(&self) -> bool {
        self.fs.is_dirty()
            || self.accounts.is_dirty()
            || self.session.is_dirty()
            || self.windows.is_dirty()
            || self.layouts_dirty
    }

    /// Writes every dirty component. Components whose write fails stay dirty; the first failure
    /// is returned after every component has been attempted.
    pub fn flush(&mut self) -> Result<(), String> {
        let mut first_error: Option<String> = None;
        let mut record = |what: &str, result: Result<(), String>| -> bool {
            match result {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("failed to persist {what}: {err}");
                    first_error.get_or_insert(err);
                    false
                }
            }
        };

        if self.fs.is_dirty() && record("filesystem", persistence::persist_filesystem(&self.store, &self.fs)) {
            self.fs.mark_clean();
        }
        if self.accounts.is_dirty()
            && record("accounts", persistence::persist_accounts(&self.store, &self.accounts))
        {
            self.accounts.mark_clean();
        }
        if self.session.is_dirty() && record("session", persistence::persist_session(&self.store, &self.session)) {
            self.session.mark_clean();
        }
        for owner in self.windows.take_dirty_owners() {
            let snapshot = self.windows.snapshot_for(&owner);
            if !record("windows", persistence::persist_windows(&self.store, &owner, snapshot)) {
                self.windows.mark_owner_dirty(&owner);
            }
        }
        if self.layouts_dirty
            && record("desktop layout", persistence::persist_desktop_layouts(&self.store, &self.layouts))
        {
            self.layouts_dirty = false;
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                log::debug!("kernel state flushed");
                Ok(())
            }
        }
    }

    /// Flushes and hands the store back. A failed flush is logged, not returned.
    pub fn shutdown(mut self) -> S {
        if let Err(err) = self.flush() {
            log::warn!("shutdown flush incomplete: {err}");
        }
        log::info!("kernel shut down");
        self.store
    }
}

fn context(home: Option<&str>) -> PathContext<'_> {
    match home {
        Some(home) => PathContext::at_home(home),
        None => PathContext::ROOT,
    }
}
