//! Window records and the app catalogue they are opened from.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default window width in pixels.
pub const DEFAULT_WINDOW_WIDTH: i32 = 420;
/// Default window height in pixels.
pub const DEFAULT_WINDOW_HEIGHT: i32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Apps a window can host.
pub enum AppId {
    Calculator,
    Explorer,
    Notepad,
    Paint,
    Terminal,
    Browser,
    Settings,
    Dialup,
}

impl AppId {
    /// Every app, in catalogue order.
    pub const ALL: [AppId; 8] = [
        Self::Calculator,
        Self::Explorer,
        Self::Notepad,
        Self::Paint,
        Self::Terminal,
        Self::Browser,
        Self::Settings,
        Self::Dialup,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Calculator => "Calculator",
            Self::Explorer => "Explorer",
            Self::Notepad => "Notepad",
            Self::Paint => "Paint",
            Self::Terminal => "Terminal",
            Self::Browser => "Browser",
            Self::Settings => "Settings",
            Self::Dialup => "Dial-up",
        }
    }

    /// Stable lowercase token used in window ids, cost tables, and storage keys.
    pub fn token(self) -> &'static str {
        match self {
            Self::Calculator => "calculator",
            Self::Explorer => "explorer",
            Self::Notepad => "notepad",
            Self::Paint => "paint",
            Self::Terminal => "terminal",
            Self::Browser => "browser",
            Self::Settings => "settings",
            Self::Dialup => "dialup",
        }
    }

    /// Parses a token produced by [`AppId::token`].
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|app| app.token() == token)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Window identifier of the form `<app>-<instance>`.
pub struct WindowId(String);

impl WindowId {
    /// Builds the id for the `instance`-th window ever opened.
    pub fn new(app_id: AppId, instance: u64) -> Self {
        Self(format!("{}-{instance}", app_id.token()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Instance counter encoded in the id, if the id is well-formed.
    pub fn instance(&self) -> Option<u64> {
        self.0.rsplit_once('-')?.1.parse().ok()
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl WindowRect {
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..self
        }
    }

    pub fn clamped_min(self, min_w: i32, min_h: i32) -> Self {
        Self {
            w: self.w.max(min_w),
            h: self.h.max(min_h),
            ..self
        }
    }
}

impl Default for WindowRect {
    fn default() -> Self {
        Self {
            x: 48,
            y: 48,
            w: DEFAULT_WINDOW_WIDTH,
            h: DEFAULT_WINDOW_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A registered window. Owned by exactly one user session.
pub struct WindowRecord {
    pub id: WindowId,
    pub app_id: AppId,
    pub title: String,
    pub owner: String,
    pub rect: WindowRect,
    #[serde(default)]
    pub restore_rect: Option<WindowRect>,
    /// Stacking order; raised from a monotonic counter, never reused.
    pub z_index: u64,
    #[serde(default)]
    pub minimized: bool,
    #[serde(default)]
    pub maximized: bool,
    /// Launch data handed to the app.
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenWindowRequest {
    pub app_id: AppId,
    pub title: Option<String>,
    pub rect: Option<WindowRect>,
    pub data: Value,
}

impl OpenWindowRequest {
    pub fn new(app_id: AppId) -> Self {
        Self {
            app_id,
            title: None,
            rect: None,
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_ids_encode_app_and_instance() {
        let id = WindowId::new(AppId::Notepad, 7);
        assert_eq!(id.as_str(), "notepad-7");
        assert_eq!(id.instance(), Some(7));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"notepad-7\"");
    }

    #[test]
    fn app_tokens_round_trip() {
        for app in AppId::ALL {
            assert_eq!(AppId::from_token(app.token()), Some(app));
        }
        assert_eq!(AppId::from_token("solitaire"), None);
    }

    #[test]
    fn rect_clamps_to_minimum() {
        let rect = WindowRect {
            x: 0,
            y: 0,
            w: 10,
            h: 500,
        };
        assert_eq!(rect.clamped_min(220, 140).w, 220);
        assert_eq!(rect.clamped_min(220, 140).h, 500);
        assert_eq!(rect.offset(3, 4).x, 3);
    }
}
