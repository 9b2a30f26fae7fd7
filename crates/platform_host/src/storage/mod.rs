//! Typed persistence helpers layered over [`crate::KvStore`].

pub mod app_state;
