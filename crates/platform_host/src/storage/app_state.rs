//! Per-app, per-user state envelopes stored through a [`KvStore`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::kv::{load_json_with, save_json_with, KvStore};

/// Version for [`AppStateEnvelope`] metadata serialization.
pub const APP_STATE_ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Versioned envelope for persisted app-local state.
pub struct AppStateEnvelope {
    /// Envelope schema version.
    pub envelope_version: u32,
    /// Namespace identifying the owning app.
    pub namespace: String,
    /// User the state belongs to.
    pub owner: String,
    /// App-defined schema version for the payload.
    pub schema_version: u32,
    /// Last update time in unix milliseconds.
    pub updated_at_unix_ms: u64,
    /// Serialized app payload.
    pub payload: Value,
}

impl AppStateEnvelope {
    /// Creates a new envelope and stamps it with a monotonic timestamp.
    pub fn new(
        namespace: impl Into<String>,
        owner: impl Into<String>,
        schema_version: u32,
        payload: Value,
    ) -> Self {
        Self {
            envelope_version: APP_STATE_ENVELOPE_VERSION,
            namespace: namespace.into(),
            owner: owner.into(),
            schema_version,
            updated_at_unix_ms: crate::time::next_monotonic_timestamp_ms(),
            payload,
        }
    }

    /// Deserializes the payload into a target type.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(self.payload.clone()).map_err(|e| e.to_string())
    }
}

/// Builds the store key for an app namespace owned by `owner`.
pub fn app_state_key(namespace: &str, owner: &str) -> String {
    format!("retrodesk.app.{namespace}.{owner}.v1")
}

/// Serializes `payload` into an envelope and saves it.
///
/// # Errors
///
/// Returns an error when serialization or the store write fails.
pub fn save_app_state_with<S: KvStore + ?Sized, T: Serialize>(
    store: &S,
    namespace: &str,
    owner: &str,
    schema_version: u32,
    payload: &T,
) -> Result<AppStateEnvelope, String> {
    let payload = serde_json::to_value(payload).map_err(|e| e.to_string())?;
    let envelope = AppStateEnvelope::new(namespace, owner, schema_version, payload);
    save_json_with(store, &app_state_key(namespace, owner), &envelope)?;
    Ok(envelope)
}

/// Loads the envelope for `namespace`/`owner`.
///
/// Envelopes written by a newer envelope version, or stored under another owner's key, are
/// ignored.
pub fn load_app_state_with<S: KvStore + ?Sized>(
    store: &S,
    namespace: &str,
    owner: &str,
) -> Option<AppStateEnvelope> {
    let envelope: AppStateEnvelope = load_json_with(store, &app_state_key(namespace, owner))?;
    if envelope.envelope_version > APP_STATE_ENVELOPE_VERSION
        || envelope.namespace != namespace
        || envelope.owner != owner
    {
        log::warn!("ignoring mismatched app state envelope for {namespace}/{owner}");
        return None;
    }
    Some(envelope)
}

/// Deletes the envelope for `namespace`/`owner`.
///
/// # Errors
///
/// Returns an error when the store removal fails.
pub fn delete_app_state_with<S: KvStore + ?Sized>(
    store: &S,
    namespace: &str,
    owner: &str,
) -> Result<(), String> {
    store.remove(&app_state_key(namespace, owner))
}
