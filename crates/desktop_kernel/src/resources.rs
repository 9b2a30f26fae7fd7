//! Simulated memory-pressure model used to admit or refuse new windows.
//!
//! Every function here is pure over a snapshot of window records and session roles, so the same
//! inputs always produce the same report and the same admission decision.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{error::AdmissionDenied, model::AppId, model::WindowRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Cost of one app inside one session.
pub struct AppCost {
    /// Cost of the first window of this app.
    pub first_mb: u32,
    /// Cost of each further window of the same app.
    pub additional_mb: u32,
}

impl AppCost {
    pub const fn new(first_mb: u32, additional_mb: u32) -> Self {
        Self {
            first_mb,
            additional_mb,
        }
    }

    /// Cost of `count` windows of this app.
    pub fn for_windows(self, count: u32) -> u32 {
        match count {
            0 => 0,
            n => self
                .first_mb
                .saturating_add(self.additional_mb.saturating_mul(n - 1)),
        }
    }
}

impl Default for AppCost {
    fn default() -> Self {
        Self::new(48, 16)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Tunables of the memory model.
pub struct ResourceBudget {
    /// Total simulated memory.
    pub total_mb: u32,
    /// Fixed cost of every counted session.
    pub session_base_mb: u32,
    /// Weight applied to background sessions, in percent of their raw cost.
    pub background_weight_percent: u32,
    /// Cost for apps missing from `app_costs`.
    pub default_app_cost: AppCost,
    /// Per-app costs keyed by [`AppId::token`].
    pub app_costs: BTreeMap<String, AppCost>,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        let app_costs = [
            (AppId::Calculator, AppCost::new(16, 8)),
            (AppId::Explorer, AppCost::new(48, 16)),
            (AppId::Notepad, AppCost::new(24, 8)),
            (AppId::Paint, AppCost::new(96, 48)),
            (AppId::Terminal, AppCost::new(32, 16)),
            (AppId::Browser, AppCost::new(256, 128)),
            (AppId::Settings, AppCost::new(32, 16)),
            (AppId::Dialup, AppCost::new(16, 8)),
        ]
        .into_iter()
        .map(|(app, cost)| (app.token().to_string(), cost))
        .collect();
        Self {
            total_mb: 1024,
            session_base_mb: 128,
            background_weight_percent: 50,
            default_app_cost: AppCost::default(),
            app_costs,
        }
    }
}

impl ResourceBudget {
    /// Cost entry for `app`.
    pub fn cost_of(&self, app: AppId) -> AppCost {
        self.app_costs
            .get(app.token())
            .copied()
            .unwrap_or(self.default_app_cost)
    }

    fn weigh(&self, raw_mb: u32, active: bool) -> u32 {
        if active {
            raw_mb
        } else {
            let weighted = u64::from(raw_mb) * u64::from(self.background_weight_percent) / 100;
            u32::try_from(weighted).unwrap_or(u32::MAX)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Which sessions count toward usage and how.
pub struct SessionLoad {
    /// Foreground user, weighted at 100%.
    pub active: Option<String>,
    /// Suspended users, weighted at the background percentage.
    pub background: BTreeSet<String>,
}

impl SessionLoad {
    fn is_active(&self, user: &str) -> bool {
        self.active.as_deref() == Some(user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One session's contribution.
pub struct SessionUsage {
    pub user: String,
    pub active: bool,
    pub windows: usize,
    /// Unweighted cost.
    pub raw_mb: u32,
    /// Cost counted toward the budget.
    pub weighted_mb: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Usage report for the whole machine.
pub struct MemoryUsage {
    pub used_mb: u32,
    pub budget_mb: u32,
    /// Per-session breakdown ordered by username.
    pub sessions: Vec<SessionUsage>,
}

impl MemoryUsage {
    pub fn free_mb(&self) -> u32 {
        self.budget_mb.saturating_sub(self.used_mb)
    }

    /// Used share of the budget, in whole percent.
    pub fn pressure_percent(&self) -> u32 {
        if self.budget_mb == 0 {
            return 100;
        }
        let percent = u64::from(self.used_mb) * 100 / u64::from(self.budget_mb);
        u32::try_from(percent).unwrap_or(u32::MAX)
    }
}

type AppCounts = BTreeMap<AppId, u32>;

fn tally<'a>(
    windows: impl IntoIterator<Item = &'a WindowRecord>,
    load: &SessionLoad,
) -> BTreeMap<String, AppCounts> {
    let mut per_user: BTreeMap<String, AppCounts> = BTreeMap::new();
    for user in load.active.iter().chain(load.background.iter()) {
        per_user.entry(user.clone()).or_default();
    }
    for window in windows {
        *per_user
            .entry(window.owner.clone())
            .or_default()
            .entry(window.app_id)
            .or_default() += 1;
    }
    per_user
}

fn raw_cost(budget: &ResourceBudget, counts: &AppCounts) -> u32 {
    counts
        .iter()
        .map(|(app, count)| budget.cost_of(*app).for_windows(*count))
        .fold(budget.session_base_mb, u32::saturating_add)
}

fn usage_from(budget: &ResourceBudget, load: &SessionLoad, per_user: &BTreeMap<String, AppCounts>) -> MemoryUsage {
    let sessions: Vec<SessionUsage> = per_user
        .iter()
        .map(|(user, counts)| {
            let active = load.is_active(user);
            let raw_mb = raw_cost(budget, counts);
            SessionUsage {
                user: user.clone(),
                active,
                windows: counts.values().map(|n| *n as usize).sum(),
                raw_mb,
                weighted_mb: budget.weigh(raw_mb, active),
            }
        })
        .collect();
    MemoryUsage {
        used_mb: sessions
            .iter()
            .map(|s| s.weighted_mb)
            .fold(0, u32::saturating_add),
        budget_mb: budget.total_mb,
        sessions,
    }
}

/// Computes current usage.
///
/// Counted sessions are the active user, every background user, and any other owner that still
/// has windows (weighted as background).
pub fn compute_usage<'a>(
    budget: &ResourceBudget,
    windows: impl IntoIterator<Item = &'a WindowRecord>,
    load: &SessionLoad,
) -> MemoryUsage {
    usage_from(budget, load, &tally(windows, load))
}

/// Decides whether `owner` may open one more `app` window.
///
/// Returns the projected usage on success. Never mutates anything, so repeated checks with the
/// same snapshot agree.
pub fn check_admission<'a>(
    budget: &ResourceBudget,
    windows: impl IntoIterator<Item = &'a WindowRecord>,
    load: &SessionLoad,
    app: AppId,
    owner: &str,
) -> Result<u32, AdmissionDenied> {
    let mut per_user = tally(windows, load);
    let current_mb = usage_from(budget, load, &per_user).used_mb;
    *per_user
        .entry(owner.to_string())
        .or_default()
        .entry(app)
        .or_default() += 1;
    let projected_mb = usage_from(budget, load, &per_user).used_mb;

    if projected_mb > budget.total_mb {
        return Err(AdmissionDenied {
            app: app.token().to_string(),
            requested_mb: projected_mb.saturating_sub(current_mb),
            current_mb,
            projected_mb,
            budget_mb: budget.total_mb,
        });
    }
    Ok(projected_mb)
}
