// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for toolhost.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.toolhost/config.json
//! - Workspace config: .toolhost.json, .toolhost/config.json, toolhost.yaml or toolhost.yml
//! - Local config: .toolhost.local.json (gitignored, for personal overrides)
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > local > workspace > global > defaults).
//! An explicit config path replaces the workspace search.

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_config, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_local_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, CliOptions};

pub use types::{
    expand_env_vars, CatalogSettings, ConnectionSettings, HostConfig, MonitorSettings,
    ServerConfig, SupervisorSettings, WorkspaceConfig,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load, merge and validate all configuration sources for a workspace.
///
/// When `explicit` is given it replaces the workspace file search and must exist.
pub fn load_config(
    workspace_root: &Path,
    explicit: Option<&Path>,
    cli_options: CliOptions,
) -> Result<HostConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            Some(load_config_file(path)?)
        }
        None => load_workspace_config(workspace_root)?,
    };
    let local = load_local_config(workspace_root)?;

    let config = merge_config(global, workspace, local, cli_options);
    config.validate()?;
    Ok(config)
}
