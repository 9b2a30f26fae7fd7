//! Kernel tunables: memory budget, desktop grid, and window defaults.

use platform_host::{load_json_with, KvStore};
use serde::{Deserialize, Serialize};

use crate::{
    desktop_grid::GridSettings, persistence::CONFIG_KEY, resources::ResourceBudget,
    window_manager::WindowDefaults,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
/// Every tunable the kernel reads. Missing sections and fields fall back to defaults.
pub struct KernelConfig {
    pub resources: ResourceBudget,
    pub desktop: GridSettings,
    pub windows: WindowDefaults,
}

impl KernelConfig {
    /// Parses operator-provided TOML.
    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|err| format!("invalid kernel config: {err}"))
    }

    /// Loads the config document stored under [`CONFIG_KEY`], or the defaults.
    pub fn load_with<S: KvStore>(store: &S) -> Self {
        load_json_with(store, CONFIG_KEY).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use platform_host::MemoryKvStore;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = KernelConfig::from_toml_str(
            r#"
            [resources]
            total_mb = 4096

            [resources.app_costs.browser]
            first_mb = 512
            additional_mb = 256

            [desktop]
            drop_into_folder_radius = 40
            "#,
        )
        .expect("valid toml");

        assert_eq!(config.resources.total_mb, 4096);
        assert_eq!(config.resources.app_costs.len(), 1);
        assert_eq!(config.resources.session_base_mb, ResourceBudget::default().session_base_mb);
        assert_eq!(config.desktop.drop_into_folder_radius, 40);
        assert_eq!(config.desktop.cell_width, GridSettings::default().cell_width);
        assert_eq!(config.windows, WindowDefaults::default());
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(KernelConfig::from_toml_str("resources = 3").is_err());
    }

    #[test]
    fn stored_json_config_is_sanitized_and_defaulted() {
        let store = MemoryKvStore::default();
        assert_eq!(KernelConfig::load_with(&store), KernelConfig::default());

        store
            .set(
                CONFIG_KEY,
                r#"{"windows":{"width":640,"__proto__":{"width":1}},"unknown":true}"#,
            )
            .unwrap();
        let config = KernelConfig::load_with(&store);
        assert_eq!(config.windows.width, 640);
        assert_eq!(config.windows.height, WindowDefaults::default().height);

        store.set(CONFIG_KEY, "{not json").unwrap();
        assert_eq!(KernelConfig::load_with(&store), KernelConfig::default());
    }
}
