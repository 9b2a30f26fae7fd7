//! Host-boundary contracts shared by the desktop kernel.
//!
//! This crate is the API boundary between the kernel and whatever persists its state. It exposes
//! the key/value store contract with in-memory and no-op adapters, the sanitizer that every stored
//! document passes through before it is trusted, clock helpers, and versioned app-state envelopes.

#![warn(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod kv;
pub mod sanitize;
pub mod storage;
pub mod time;

pub use kv::{load_json_with, save_json_with, KvStore, MemoryKvStore, NoopKvStore};
pub use sanitize::{is_reserved_key, parse_document, parse_sanitized, sanitize_value, RESERVED_KEYS};
pub use storage::app_state::{
    app_state_key, delete_app_state_with, load_app_state_with, save_app_state_with,
    AppStateEnvelope, APP_STATE_ENVELOPE_VERSION,
};
pub use time::{next_monotonic_timestamp_ms, unix_time_ms_now, Clock, ManualClock, SystemClock};
