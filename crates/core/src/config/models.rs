//! Configuration models that aggregate all settings.

use cf_protocol::config_models::GlobalConfig;
use std::path::PathBuf;

use crate::serialization::VersionLocks;

/// Project configuration loaded from the `.cytoflow/` directory.
///
/// - `config.toml`: Global settings
/// - `workflows/**/*.flow`: Workflow documents
///
/// # Example
///
/// ```rust,no_run
/// use cf_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new(".")).await?;
/// println!("Found {} workflows", config.workflows.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    /// Global settings from `config.toml`.
    pub global: GlobalConfig,

    /// Workflow documents, sorted by path.
    pub workflows: Vec<PathBuf>,
}

impl AppConfig {
    /// Dumper version pins from `[serialization] lock_versions`.
    pub fn version_locks(&self) -> VersionLocks {
        VersionLocks::from(self.global.serialization.lock_versions.clone())
    }
}
