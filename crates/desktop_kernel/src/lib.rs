//! Headless kernel of a simulated multi-user desktop.
//!
//! [`DesktopKernel`] owns a permissioned virtual filesystem, the account registry, the session
//! state machine, per-user window registries with simulated memory admission, and desktop icon
//! layouts. Everything durable goes through a [`platform_host::KvStore`]; the presentation layer
//! only calls kernel operations and renders what they return.

pub mod accounts;
pub mod config;
pub mod desktop_grid;
pub mod error;
pub mod kernel;
pub mod model;
pub mod persistence;
pub mod resources;
pub mod session;
pub mod vfs;
pub mod window_manager;

pub use accounts::{AccountRegistry, NewUser, User};
pub use config::KernelConfig;
pub use desktop_grid::{DropOutcome, GridConfig, GridPosition, GridSettings, PixelPoint};
pub use error::{
    AccountError, AdmissionDenied, CorruptDocument, ErrorKind, FsError, OpenWindowError, PathError,
    WindowError,
};
pub use kernel::{DesktopKernel, PlacedIcon, DESKTOP_DIR_NAME};
pub use model::*;
pub use resources::{AppCost, MemoryUsage, ResourceBudget, SessionUsage};
pub use session::{LoginOutcome, SessionState};
pub use vfs::{FileNode, FsTree, Mode, NodeId, NodeKind, PathContext, Principal};
pub use window_manager::{CloseGuard, CloseOutcome, WindowDefaults, WindowRegistry};
