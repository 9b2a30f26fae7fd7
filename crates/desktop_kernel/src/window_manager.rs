//! Window registry: per-user window lists, stacking order, and close interception.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    rc::Rc,
};

use futures::future::{self, FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AdmissionDenied, WindowError},
    model::{OpenWindowRequest, WindowId, WindowRecord, WindowRect},
    resources::{self, ResourceBudget, SessionLoad},
};

/// Minimum allowed managed window width.
pub const MIN_WINDOW_WIDTH: i32 = 220;
/// Minimum allowed managed window height.
pub const MIN_WINDOW_HEIGHT: i32 = 140;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Geometry used for windows opened without an explicit rectangle.
pub struct WindowDefaults {
    pub width: i32,
    pub height: i32,
    pub min_width: i32,
    pub min_height: i32,
    /// Top-left corner of the first cascaded window.
    pub origin_x: i32,
    pub origin_y: i32,
    /// Offset between consecutive cascaded windows.
    pub cascade_step: i32,
    /// Number of cascade positions before wrapping back to the origin.
    pub cascade_slots: u32,
}

impl Default for WindowDefaults {
    fn default() -> Self {
        Self {
            width: crate::model::DEFAULT_WINDOW_WIDTH,
            height: crate::model::DEFAULT_WINDOW_HEIGHT,
            min_width: MIN_WINDOW_WIDTH,
            min_height: MIN_WINDOW_HEIGHT,
            origin_x: 40,
            origin_y: 48,
            cascade_step: 20,
            cascade_slots: 8,
        }
    }
}

/// Largest stored window instance kept on load; anything above gets a fresh id.
pub const MAX_RESTORED_INSTANCE: u64 = u32::MAX as u64;

fn restorable_instance(id: &WindowId) -> Option<u64> {
    id.instance()
        .filter(|instance| (1..=MAX_RESTORED_INSTANCE).contains(instance))
}

/// "May I close?" hook installed by the app that owns a window.
pub trait CloseGuard {
    /// Resolves to `true` when the window may close. May await user confirmation.
    fn may_close(&self, window: &WindowRecord) -> LocalBoxFuture<'static, bool>;
}

impl<F> CloseGuard for F
where
    F: Fn(&WindowRecord) -> LocalBoxFuture<'static, bool>,
{
    fn may_close(&self, window: &WindowRecord) -> LocalBoxFuture<'static, bool> {
        self(window)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Result of [`WindowRegistry::request_close`].
pub enum CloseOutcome {
    /// The window was removed.
    Closed(WindowRecord),
    /// The close guard refused; the window is still registered.
    Vetoed,
}

/// Every open window across all sessions.
pub struct WindowRegistry {
    windows: Vec<WindowRecord>,
    next_instance: u64,
    next_z: u64,
    guards: HashMap<WindowId, Rc<dyn CloseGuard>>,
    dirty_owners: BTreeSet<String>,
    defaults: WindowDefaults,
}

impl fmt::Debug for WindowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowRegistry")
            .field("windows", &self.windows)
            .field("next_instance", &self.next_instance)
            .field("next_z", &self.next_z)
            .field("guarded", &self.guards.len())
            .field("dirty_owners", &self.dirty_owners)
            .finish_non_exhaustive()
    }
}

impl Default for WindowRegistry {
    fn default() -> Self {
        Self::new(WindowDefaults::default())
    }
}

impl WindowRegistry {
    pub fn new(defaults: WindowDefaults) -> Self {
        Self {
            windows: Vec::new(),
            next_instance: 1,
            next_z: 1,
            guards: HashMap::new(),
            dirty_owners: BTreeSet::new(),
            defaults,
        }
    }

    /// Every registered window, in registration order.
    pub fn all(&self) -> &[WindowRecord] {
        &self.windows
    }

    pub fn window(&self, id: &WindowId) -> Option<&WindowRecord> {
        self.windows.iter().find(|w| &w.id == id)
    }

    /// Windows owned by `owner`, bottom of the stack first.
    pub fn windows_for(&self, owner: &str) -> Vec<&WindowRecord> {
        let mut windows: Vec<_> = self.windows.iter().filter(|w| w.owner == owner).collect();
        windows.sort_by_key(|w| w.z_index);
        windows
    }

    /// The focused window of `owner`: the highest non-minimized one.
    pub fn top_window(&self, owner: &str) -> Option<&WindowRecord> {
        self.windows
            .iter()
            .filter(|w| w.owner == owner && !w.minimized)
            .max_by_key(|w| w.z_index)
    }

    /// Usernames that own at least one window.
    pub fn owners(&self) -> BTreeSet<&str> {
        self.windows.iter().map(|w| w.owner.as_str()).collect()
    }

    /// Returns `true` when any owner's window list changed since it was last persisted.
    pub fn is_dirty(&self) -> bool {
        !self.dirty_owners.is_empty()
    }

    pub(crate) fn take_dirty_owners(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.dirty_owners)
    }

    pub(crate) fn mark_owner_dirty(&mut self, owner: &str) {
        self.dirty_owners.insert(owner.to_string());
    }

    /// Admits and registers a window for `owner`, focused on top of every other window.
    ///
    /// The admission check and the registration happen in one call, so nothing is registered
    /// when the budget would be exceeded.
    pub fn open_window(
        &mut self,
        owner: &str,
        request: OpenWindowRequest,
        budget: &ResourceBudget,
        load: &SessionLoad,
    ) -> Result<WindowId, AdmissionDenied> {
        if let Err(denied) =
            resources::check_admission(budget, &self.windows, load, request.app_id, owner)
        {
            log::warn!("refused to open window for `{owner}`: {denied}");
            return Err(denied);
        }

        let instance = self.take_instance();
        let id = WindowId::new(request.app_id, instance);
        let defaults = &self.defaults;
        let slot = ((instance - 1) % u64::from(defaults.cascade_slots.max(1))) as i32;
        let offset = slot * defaults.cascade_step;
        let rect = request
            .rect
            .unwrap_or(WindowRect {
                x: defaults.origin_x + offset,
                y: defaults.origin_y + offset,
                w: defaults.width,
                h: defaults.height,
            })
            .clamped_min(defaults.min_width, defaults.min_height);
        let z_index = self.bump_z();

        log::debug!("opened window {id} for `{owner}` at z {z_index}");
        self.windows.push(WindowRecord {
            id: id.clone(),
            app_id: request.app_id,
            title: request
                .title
                .unwrap_or_else(|| request.app_id.title().to_string()),
            owner: owner.to_string(),
            rect,
            restore_rect: None,
            z_index,
            minimized: false,
            maximized: false,
            data: request.data,
        });
        self.mark_owner_dirty(owner);
        Ok(id)
    }

    /// Raises a window above every other window and un-minimizes it.
    pub fn focus_window(&mut self, id: &WindowId) -> Result<(), WindowError> {
        let top = self.next_z - 1;
        let window = self.window_mut(id)?;
        if window.z_index == top && !window.minimized {
            return Ok(());
        }
        let owner = window.owner.clone();
        let z_index = self.bump_z();
        let window = self.window_mut(id)?;
        window.z_index = z_index;
        window.minimized = false;
        self.mark_owner_dirty(&owner);
        Ok(())
    }

    /// Hides a window without changing its z-index.
    pub fn minimize_window(&mut self, id: &WindowId) -> Result<(), WindowError> {
        self.update(id, |window| window.minimized = true)
    }

    /// Fills `viewport`, remembering the previous geometry. Stacking order is unchanged.
    pub fn maximize_window(&mut self, id: &WindowId, viewport: WindowRect) -> Result<(), WindowError> {
        let (min_w, min_h) = (self.defaults.min_width, self.defaults.min_height);
        self.update(id, |window| {
            if !window.maximized {
                window.restore_rect = Some(window.rect);
            }
            window.rect = viewport.clamped_min(min_w, min_h);
            window.maximized = true;
            window.minimized = false;
        })
    }

    /// Un-minimizes and un-maximizes a window, then focuses it.
    pub fn restore_window(&mut self, id: &WindowId) -> Result<(), WindowError> {
        self.update(id, |window| {
            if window.maximized {
                if let Some(rect) = window.restore_rect.take() {
                    window.rect = rect;
                }
                window.maximized = false;
            }
            window.minimized = false;
        })?;
        self.focus_window(id)
    }

    pub fn move_window(&mut self, id: &WindowId, x: i32, y: i32) -> Result<(), WindowError> {
        self.update(id, |window| {
            window.rect.x = x;
            window.rect.y = y;
            window.maximized = false;
            window.restore_rect = None;
        })
    }

    /// Resizes a window, clamped to the configured minimum size.
    pub fn resize_window(&mut self, id: &WindowId, w: i32, h: i32) -> Result<(), WindowError> {
        let (min_w, min_h) = (self.defaults.min_width, self.defaults.min_height);
        self.update(id, |window| {
            window.rect = WindowRect { w, h, ..window.rect }.clamped_min(min_w, min_h);
            window.maximized = false;
            window.restore_rect = None;
        })
    }

    /// Removes a window unconditionally, bypassing its close guard.
    pub fn close_window(&mut self, id: &WindowId) -> Result<WindowRecord, WindowError> {
        let index = self
            .windows
            .iter()
            .position(|w| &w.id == id)
            .ok_or_else(|| WindowError::NotFound(id.clone()))?;
        let record = self.windows.remove(index);
        self.guards.remove(id);
        self.mark_owner_dirty(&record.owner);
        log::debug!("closed window {id}");
        Ok(record)
    }

    /// Installs the close guard consulted by [`WindowRegistry::request_close`].
    pub fn set_close_guard(&mut self, id: &WindowId, guard: Rc<dyn CloseGuard>) -> Result<(), WindowError> {
        self.window_mut(id)?;
        self.guards.insert(id.clone(), guard);
        Ok(())
    }

    /// Removes a close guard. Returns `true` when one was installed.
    pub fn clear_close_guard(&mut self, id: &WindowId) -> bool {
        self.guards.remove(id).is_some()
    }

    /// Starts the close decision for a window without borrowing the registry while it is pending.
    ///
    /// Windows without a guard resolve to `true` immediately.
    pub fn close_decision(&self, id: &WindowId) -> Result<LocalBoxFuture<'static, bool>, WindowError> {
        let window = self
            .window(id)
            .ok_or_else(|| WindowError::NotFound(id.clone()))?;
        Ok(match self.guards.get(id) {
            Some(guard) => guard.may_close(window),
            None => future::ready(true).boxed_local(),
        })
    }

    /// Asks the close guard, then removes the window if it agreed.
    ///
    /// The window stays registered until the guard resolves.
    pub async fn request_close(&mut self, id: &WindowId) -> Result<CloseOutcome, WindowError> {
        let decision = self.close_decision(id)?;
        if decision.await {
            self.close_window(id).map(CloseOutcome::Closed)
        } else {
            log::debug!("close of window {id} vetoed");
            Ok(CloseOutcome::Vetoed)
        }
    }

    /// Removes every window owned by `owner`.
    pub fn close_all_for(&mut self, owner: &str) -> Vec<WindowRecord> {
        let (closed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.windows)
            .into_iter()
            .partition(|w| w.owner == owner);
        self.windows = kept;
        for window in &closed {
            self.guards.remove(&window.id);
        }
        if !closed.is_empty() {
            self.mark_owner_dirty(owner);
        }
        closed
    }

    /// Windows of `owner`, cloned in stacking order, for persistence.
    pub fn snapshot_for(&self, owner: &str) -> Vec<WindowRecord> {
        self.windows_for(owner).into_iter().cloned().collect()
    }

    /// Registers windows loaded from storage for `owner`.
    ///
    /// Records are re-owned by `owner` and ids already registered are skipped. Loaded windows are
    /// renumbered on top of the stack in their stored relative order, so stored z-indexes never
    /// drive the counter. Stored instances above [`MAX_RESTORED_INSTANCE`], or ids without one,
    /// get a fresh id.
    pub fn hydrate(&mut self, owner: &str, mut records: Vec<WindowRecord>) -> usize {
        records.sort_by_key(|record| record.z_index);
        for record in &records {
            if let Some(instance) = restorable_instance(&record.id) {
                self.next_instance = self.next_instance.max(instance + 1);
            }
        }

        let mut added = 0;
        for mut record in records {
            if restorable_instance(&record.id).is_none() {
                let fresh = WindowId::new(record.app_id, self.take_instance());
                log::warn!("stored window {} renamed to {fresh}", record.id);
                record.id = fresh;
            }
            if self.window(&record.id).is_some() {
                log::warn!("skipping duplicate stored window {}", record.id);
                continue;
            }
            record.owner = owner.to_string();
            record.rect = record
                .rect
                .clamped_min(self.defaults.min_width, self.defaults.min_height);
            record.z_index = self.bump_z();
            self.windows.push(record);
            added += 1;
        }
        added
    }

    fn take_instance(&mut self) -> u64 {
        let instance = self.next_instance;
        self.next_instance = instance.saturating_add(1);
        instance
    }

    fn bump_z(&mut self) -> u64 {
        let z = self.next_z;
        self.next_z = z.saturating_add(1);
        z
    }

    fn window_mut(&mut self, id: &WindowId) -> Result<&mut WindowRecord, WindowError> {
        self.windows
            .iter_mut()
            .find(|w| &w.id == id)
            .ok_or_else(|| WindowError::NotFound(id.clone()))
    }

    fn update(
        &mut self,
        id: &WindowId,
        apply: impl FnOnce(&mut WindowRecord),
    ) -> Result<(), WindowError> {
        let window = self.window_mut(id)?;
        apply(window);
        let owner = window.owner.clone();
        self.mark_owner_dirty(&owner);
        Ok(())
    }
}
