//! Global configuration models for `.cytoflow/config.toml`.
//!
//! This module defines the structure of the project configuration file that
//! controls serialization and workflow execution defaults.

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use ts_rs::TS;

/// Represents global settings from `.cytoflow/config.toml`.
///
/// # Example
///
/// ```toml
/// # .cytoflow/config.toml
/// [serialization]
/// lock_versions = { "workflow-item" = 3 }
///
/// [workflow]
/// estimate_on_load = true
/// plot = false
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct GlobalConfig {
    #[serde(default)]
    pub serialization: SerializationConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,
}

/// Settings for saving workflow documents.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, TS)]
pub struct SerializationConfig {
    /// Pin a tag to an older dumper version when saving.
    ///
    /// Tags that are not listed are written with their newest version.
    #[serde(default)]
    pub lock_versions: BTreeMap<String, u32>,
}

/// Settings for running workflows outside the GUI.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS)]
pub struct WorkflowConfig {
    /// Run the estimate step of estimate-requiring operations after loading.
    #[serde(default = "default_true")]
    pub estimate_on_load: bool,

    /// Plot the selected item's current view after it changes.
    #[serde(default = "default_true")]
    pub plot: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            estimate_on_load: true,
            plot: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert!(config.serialization.lock_versions.is_empty());
        assert!(config.workflow.estimate_on_load);
        assert!(config.workflow.plot);
    }

    #[test]
    fn test_lock_versions_parse() {
        let config: GlobalConfig = toml::from_str(
            r#"
[serialization]
lock_versions = { "workflow-item" = 3, "threshold-view" = 1 }

[workflow]
plot = false
"#,
        )
        .unwrap();
        assert_eq!(config.serialization.lock_versions["workflow-item"], 3);
        assert_eq!(config.serialization.lock_versions["threshold-view"], 1);
        assert!(!config.workflow.plot);
        assert!(config.workflow.estimate_on_load);
    }
}
