// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of workspace (on-disk) and resolved configuration,
//! supporting JSON and YAML formats.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::monitor::AlertRule;

// ============================================================================
// Server Configuration
// ============================================================================

/// Configuration for a single tool server process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Command to execute.
    pub command: String,

    /// Arguments passed to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    /// Environment overlay (supports ${ENV_VAR} expansion).
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Whether this server is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Namespace for discovered tools (defaults to the server id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// List of enabled tools (if empty, all tools are enabled).
    #[serde(default)]
    pub enabled_tools: Vec<String>,

    /// List of disabled tools.
    #[serde(default)]
    pub disabled_tools: Vec<String>,

    /// Category overrides keyed by tool name.
    #[serde(default)]
    pub tool_categories: HashMap<String, String>,

    /// Startup timeout in seconds.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_sec: u64,

    /// Protocol request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_sec: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    60
}

impl ServerConfig {
    /// Create a configuration for the given command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            enabled: true,
            namespace: None,
            enabled_tools: Vec::new(),
            disabled_tools: Vec::new(),
            tool_categories: HashMap::new(),
            startup_timeout_sec: default_startup_timeout(),
            request_timeout_sec: default_request_timeout(),
        }
    }

    /// Add command arguments.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Set environment variables.
    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Set working directory.
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the tool namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set enabled tools.
    pub fn with_enabled_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.enabled_tools = tools.into_iter().map(|s| s.into()).collect();
        self
    }

    /// Override the category of one tool.
    pub fn with_tool_category(mut self, tool: impl Into<String>, category: impl Into<String>) -> Self {
        self.tool_categories.insert(tool.into(), category.into());
        self
    }

    /// Set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Namespace for tools, falling back to the server id.
    pub fn namespace_for<'a>(&'a self, server_id: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(server_id)
    }

    /// Check if a tool is enabled.
    pub fn is_tool_enabled(&self, tool_name: &str) -> bool {
        if self.disabled_tools.iter().any(|t| t == tool_name) {
            return false;
        }
        self.enabled_tools.is_empty() || self.enabled_tools.iter().any(|t| t == tool_name)
    }

    /// Startup timeout as a duration.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_sec)
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    /// Environment with ${VAR} references expanded from the host environment.
    pub fn expanded_env(&self) -> HashMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect()
    }
}

/// Simple ${VAR} expansion; unknown variables expand to the empty string.
pub fn expand_env_vars(value: &str) -> String {
    let mut result = value.to_string();
    while let Some(start) = result.find("${") {
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let replacement = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], replacement, &result[start + end + 1..]);
    }
    result
}

// ============================================================================
// Subsystem Settings
// ============================================================================

/// Process supervisor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Time to wait after a graceful termination signal before killing.
    pub kill_timeout_ms: u64,
    /// Delay between stop and start during a restart.
    pub restart_delay_ms: u64,
    /// Maximum number of restarts before the server is left failed.
    pub max_restart_attempts: u32,
    /// Interval between process liveness checks.
    pub health_check_interval_ms: u64,
    /// Restart processes that crash or become unhealthy.
    pub enable_auto_restart: bool,
    /// Overall grace period when shutting down every process.
    pub shutdown_grace_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            kill_timeout_ms: 5_000,
            restart_delay_ms: 1_000,
            max_restart_attempts: 3,
            health_check_interval_ms: 10_000,
            enable_auto_restart: true,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl SupervisorSettings {
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Connection manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Interval between heartbeats on a connected session.
    pub heartbeat_interval_ms: u64,
    /// Fixed delay before a reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Schedule reconnects after failures.
    pub auto_reconnect: bool,
    /// Consecutive scheduled reconnects before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 15_000,
            reconnect_delay_ms: 5_000,
            auto_reconnect: true,
            max_reconnect_attempts: 5,
        }
    }
}

impl ConnectionSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Tool catalog settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Lifetime of a cached invocation result.
    pub cache_ttl_secs: u64,
    /// Maximum number of cached results.
    pub cache_capacity: usize,
    /// Categories whose results may be cached.
    pub cacheable_categories: Vec<String>,
    /// Interval between health rollups.
    pub health_check_interval_ms: u64,
    /// Execution history kept per tool.
    pub history_limit: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            cache_capacity: 1_000,
            cacheable_categories: vec![
                "search".to_string(),
                "analysis".to_string(),
                "utility".to_string(),
            ],
            health_check_interval_ms: 60_000,
            history_limit: 100,
        }
    }
}

impl CatalogSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Whether results of this category may be served from cache.
    pub fn is_cacheable(&self, category: &str) -> bool {
        self.cacheable_categories.iter().any(|c| c == category)
    }
}

/// Monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Interval between per-server health checks.
    pub health_check_interval_ms: u64,
    /// Interval between metric aggregation and alert evaluation.
    pub metrics_interval_ms: u64,
    /// Alert rules replacing the defaults when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<AlertRule>>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 30_000,
            metrics_interval_ms: 60_000,
            rules: None,
        }
    }
}

impl MonitorSettings {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }
}

// ============================================================================
// Workspace / Resolved Configuration
// ============================================================================

/// Configuration as written on disk; every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Server definitions keyed by server id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servers: Option<BTreeMap<String, ServerConfig>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<SupervisorSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<CatalogSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSettings>,
}

/// Fully resolved configuration used to build a host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub servers: BTreeMap<String, ServerConfig>,
    pub supervisor: SupervisorSettings,
    pub connection: ConnectionSettings,
    pub catalog: CatalogSettings,
    pub monitor: MonitorSettings,
}

impl HostConfig {
    /// Create an empty configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server definition.
    pub fn with_server(mut self, id: impl Into<String>, config: ServerConfig) -> Self {
        self.servers.insert(id.into(), config);
        self
    }

    /// Look up an enabled server.
    pub fn server(&self, id: &str) -> Result<&ServerConfig, ConfigError> {
        let config = self
            .servers
            .get(id)
            .ok_or_else(|| ConfigError::UnknownServer(id.to_string()))?;
        if !config.enabled {
            return Err(ConfigError::ServerDisabled(id.to_string()));
        }
        Ok(config)
    }

    /// Ids of enabled servers, in sorted order.
    pub fn enabled_servers(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (id, server) in &self.servers {
            if server.command.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("servers.{}.command", id),
                    "must not be empty",
                ));
            }
            if server.request_timeout_sec == 0 {
                return Err(ConfigError::invalid(
                    format!("servers.{}.request_timeout_sec", id),
                    "must be greater than zero",
                ));
            }
        }
        if self.supervisor.health_check_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "supervisor.health_check_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.connection.heartbeat_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "connection.heartbeat_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.catalog.history_limit == 0 {
            return Err(ConfigError::invalid("catalog.history_limit", "must be greater than zero"));
        }
        if self.monitor.health_check_interval_ms == 0 || self.monitor.metrics_interval_ms == 0 {
            return Err(ConfigError::invalid("monitor", "intervals must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_builders() {
        let config = ServerConfig::new("python")
            .with_args(["-m", "docs_server"])
            .with_cwd("/tmp")
            .with_env([("MODE", "test")])
            .with_namespace("documents");

        assert_eq!(config.command, "python");
        assert_eq!(config.args.len(), 2);
        assert_eq!(config.cwd.as_deref(), Some("/tmp"));
        assert_eq!(config.env.get("MODE").map(|s| s.as_str()), Some("test"));
        assert_eq!(config.namespace_for("docs"), "documents");
        assert_eq!(ServerConfig::new("x").namespace_for("docs"), "docs");
    }

    #[test]
    fn test_tool_filtering() {
        let config = ServerConfig::new("test").with_enabled_tools(["search", "fetch"]);
        assert!(config.is_tool_enabled("search"));
        assert!(!config.is_tool_enabled("delete"));

        let mut config = ServerConfig::new("test");
        assert!(config.is_tool_enabled("anything"));
        config.disabled_tools.push("anything".to_string());
        assert!(!config.is_tool_enabled("anything"));
    }

    #[test]
    fn test_env_var_expansion() {
        // SAFETY: This test uses a unique variable name and cleans up after itself
        unsafe {
            std::env::set_var("TOOLHOST_TEST_TOKEN", "secret");
        }

        assert_eq!(expand_env_vars("Bearer ${TOOLHOST_TEST_TOKEN}"), "Bearer secret");
        assert_eq!(expand_env_vars("${TOOLHOST_TEST_MISSING_VAR}"), "");
        assert_eq!(expand_env_vars("no vars"), "no vars");
        assert_eq!(expand_env_vars("broken ${VAR"), "broken ${VAR");

        // SAFETY: Cleanup after test
        unsafe {
            std::env::remove_var("TOOLHOST_TEST_TOKEN");
        }
    }

    #[test]
    fn test_server_lookup() {
        let config = HostConfig::new()
            .with_server("docs", ServerConfig::new("docs-server"))
            .with_server("off", ServerConfig::new("off-server").with_enabled(false));

        assert!(config.server("docs").is_ok());
        assert!(matches!(config.server("missing"), Err(ConfigError::UnknownServer(_))));
        assert!(matches!(config.server("off"), Err(ConfigError::ServerDisabled(_))));
        assert_eq!(config.enabled_servers(), vec!["docs".to_string()]);
    }

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.supervisor.max_restart_attempts, 3);
        assert_eq!(config.catalog.cache_ttl(), Duration::from_secs(300));
        assert!(config.catalog.is_cacheable("search"));
        assert!(!config.catalog.is_cacheable("mutation"));
        assert_eq!(config.monitor.health_check_interval(), Duration::from_secs(30));
        assert_eq!(config.monitor.metrics_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_validate() {
        let config = HostConfig::new().with_server("docs", ServerConfig::new(""));
        assert!(config.validate().is_err());

        let config = HostConfig::new().with_server("docs", ServerConfig::new("docs-server"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_settings() {
        let json = r#"{
            "servers": {
                "docs": { "command": "docs-server", "args": ["--stdio"] }
            },
            "supervisor": { "max_restart_attempts": 2 }
        }"#;
        let config: WorkspaceConfig = serde_json::from_str(json).unwrap();
        let supervisor = config.supervisor.unwrap();
        assert_eq!(supervisor.max_restart_attempts, 2);
        assert_eq!(supervisor.kill_timeout_ms, 5_000);

        let servers = config.servers.unwrap();
        let docs = servers.get("docs").unwrap();
        assert!(docs.enabled);
        assert_eq!(docs.startup_timeout_sec, 30);
    }
}
