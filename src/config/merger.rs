// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use super::types::{HostConfig, WorkspaceConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    /// Restrict the host to these server ids (empty means all).
    pub only_servers: Vec<String>,
    pub no_auto_restart: bool,
    pub no_auto_reconnect: bool,
}

/// Default configuration values.
pub fn default_config() -> HostConfig {
    HostConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.toolhost.local.json)
/// 3. Workspace config (.toolhost.json and friends)
/// 4. Global config (~/.toolhost/config.json)
/// 5. Default values
///
/// Server maps are merged by id; settings sections replace wholesale.
pub fn merge_config(
    global: Option<WorkspaceConfig>,
    workspace: Option<WorkspaceConfig>,
    local: Option<WorkspaceConfig>,
    cli: CliOptions,
) -> HostConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_workspace_config(&mut result, config);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_workspace_config(result: &mut HostConfig, config: WorkspaceConfig) {
    if let Some(servers) = config.servers {
        result.servers.extend(servers);
    }
    if let Some(supervisor) = config.supervisor {
        result.supervisor = supervisor;
    }
    if let Some(connection) = config.connection {
        result.connection = connection;
    }
    if let Some(catalog) = config.catalog {
        result.catalog = catalog;
    }
    if let Some(monitor) = config.monitor {
        result.monitor = monitor;
    }
}

fn apply_cli_options(result: &mut HostConfig, cli: &CliOptions) {
    if !cli.only_servers.is_empty() {
        for (id, server) in result.servers.iter_mut() {
            if !cli.only_servers.contains(id) {
                server.enabled = false;
            }
        }
    }
    if cli.no_auto_restart {
        result.supervisor.enable_auto_restart = false;
    }
    if cli.no_auto_reconnect {
        result.connection.auto_reconnect = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ConnectionSettings, ServerConfig};
    use std::collections::BTreeMap;

    fn servers(entries: &[(&str, &str)]) -> Option<BTreeMap<String, ServerConfig>> {
        Some(
            entries
                .iter()
                .map(|(id, cmd)| (id.to_string(), ServerConfig::new(*cmd)))
                .collect(),
        )
    }

    #[test]
    fn test_merge_empty() {
        let config = merge_config(None, None, None, CliOptions::default());
        assert_eq!(config, HostConfig::default());
    }

    #[test]
    fn test_servers_merge_by_id() {
        let global = WorkspaceConfig {
            servers: servers(&[("docs", "global-docs"), ("search", "global-search")]),
            ..Default::default()
        };
        let workspace = WorkspaceConfig {
            servers: servers(&[("docs", "workspace-docs")]),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), None, CliOptions::default());
        assert_eq!(config.servers["docs"].command, "workspace-docs");
        assert_eq!(config.servers["search"].command, "global-search");
    }

    #[test]
    fn test_local_section_wins() {
        let workspace = WorkspaceConfig {
            connection: Some(ConnectionSettings {
                reconnect_delay_ms: 100,
                ..Default::default()
            }),
            ..Default::default()
        };
        let local = WorkspaceConfig {
            connection: Some(ConnectionSettings {
                reconnect_delay_ms: 200,
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = merge_config(None, Some(workspace), Some(local), CliOptions::default());
        assert_eq!(config.connection.reconnect_delay_ms, 200);
    }

    #[test]
    fn test_cli_overrides() {
        let workspace = WorkspaceConfig {
            servers: servers(&[("docs", "docs"), ("search", "search")]),
            ..Default::default()
        };
        let cli = CliOptions {
            only_servers: vec!["docs".to_string()],
            no_auto_restart: true,
            no_auto_reconnect: true,
        };

        let config = merge_config(None, Some(workspace), None, cli);
        assert_eq!(config.enabled_servers(), vec!["docs".to_string()]);
        assert!(!config.supervisor.enable_auto_restart);
        assert!(!config.connection.auto_reconnect);
    }
}
