//! Configuration file loader for the `.cytoflow/` directory structure.
//!
//! This module loads:
//! - `config.toml`: Global settings
//! - `workflows/**/*.flow`: Workflow documents to run in batch

use crate::config::error::ConfigError;
use crate::config::error::ConfigResult;
use crate::config::models::AppConfig;
use crate::config::TRACING_TARGET;
use cf_protocol::config_models::GlobalConfig;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File extension of saved workflows.
pub const WORKFLOW_EXTENSION: &str = "flow";

/// Loads all configuration from the `.cytoflow/` directory.
///
/// # Arguments
///
/// * `root` - Root directory containing the `.cytoflow/` folder
///
/// # Returns
///
/// An `AppConfig` with the global settings and every workflow document
/// found. A missing `.cytoflow/` directory, `config.toml` or `workflows/`
/// directory yields the defaults rather than an error.
///
/// # Errors
///
/// Returns `ConfigError` if a file exists but cannot be read, `config.toml`
/// is not valid TOML, or the workflows directory cannot be walked.
pub async fn load_config(root: &Path) -> ConfigResult<AppConfig> {
    let cf_dir = root.join(".cytoflow");

    if !cf_dir.exists() {
        return Ok(AppConfig::default());
    }

    let global = load_global_config(&cf_dir)?;
    let workflows = find_workflows(&cf_dir.join("workflows"))?;

    tracing::debug!(
        target: TRACING_TARGET,
        dir = %cf_dir.display(),
        workflows = workflows.len(),
        "loaded configuration"
    );

    Ok(AppConfig { global, workflows })
}

/// Loads global configuration from `config.toml`.
fn load_global_config(cf_dir: &Path) -> ConfigResult<GlobalConfig> {
    let config_path = cf_dir.join("config.toml");

    if !config_path.exists() {
        return Ok(GlobalConfig::default());
    }

    let content =
        std::fs::read_to_string(&config_path).map_err(|source| ConfigError::FileRead {
            path: config_path.clone(),
            source,
        })?;

    toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: config_path,
        source,
    })
}

/// Finds every `*.flow` file below `dir`, at any depth.
fn find_workflows(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut workflows = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| ConfigError::DirectoryWalk {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().and_then(|s| s.to_str()) == Some(WORKFLOW_EXTENSION)
        {
            workflows.push(path.to_path_buf());
        }
    }
    workflows.sort();

    Ok(workflows)
}
