// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in the working
//! directory and the user's home directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{ServerConfig, SupervisorSettings, WorkspaceConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    ".toolhost.json",
    ".toolhost/config.json",
    "toolhost.yaml",
    "toolhost.yml",
];

/// Local config file name (for personal overrides, usually gitignored).
pub const LOCAL_CONFIG_FILE: &str = ".toolhost.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".toolhost";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.toolhost/config.json.
pub fn load_global_config() -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Find the first workspace config file present under `workspace_root`.
pub fn find_workspace_config(workspace_root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| workspace_root.join(name))
        .find(|path| path.exists())
}

/// Load workspace configuration from the workspace root.
///
/// Searches `CONFIG_FILES` in order and loads the first match.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    match find_workspace_config(workspace_root) {
        Some(path) => load_config_file(&path).map(Some),
        None => Ok(None),
    }
}

/// Load local configuration from .toolhost.local.json.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WorkspaceConfig>, ConfigError> {
    let path = workspace_root.join(LOCAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Save workspace configuration to a file.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WorkspaceConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(CONFIG_FILES[0]);
    let path = workspace_root.join(filename);

    let content = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::to_string(config)?,
        _ => serde_json::to_string_pretty(config)?,
    };
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Initialize a new config file with the example or provided configuration.
///
/// Refuses to overwrite an existing workspace config.
pub fn init_config(
    workspace_root: &Path,
    config: Option<WorkspaceConfig>,
) -> Result<PathBuf, ConfigError> {
    if let Some(existing) = find_workspace_config(workspace_root) {
        return Err(ConfigError::InvalidFormat(format!(
            "config already exists: {}",
            existing.display()
        )));
    }
    let config = config.unwrap_or_else(get_example_config);
    save_workspace_config(workspace_root, &config, None)
}

/// Get an example configuration.
pub fn get_example_config() -> WorkspaceConfig {
    let mut servers = BTreeMap::new();
    servers.insert(
        "docs".to_string(),
        ServerConfig::new("docs-tool-server")
            .with_args(["--stdio"])
            .with_env([("DOCS_TOKEN", "${DOCS_TOKEN}")])
            .with_tool_category("lookup", "search"),
    );

    WorkspaceConfig {
        servers: Some(servers),
        supervisor: Some(SupervisorSettings::default()),
        ..Default::default()
    }
}
