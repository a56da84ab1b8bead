// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connection error types.

use thiserror::Error;

use super::types::ConnectionStatus;
use crate::error::ConfigError;
use crate::process::SupervisorError;
use crate::rpc::RpcError;
use crate::schema::ValidationIssue;

/// Errors that can occur during connection operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Missing or disabled server configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The process could not be brought up.
    #[error("Process error: {0}")]
    Process(#[from] SupervisorError),

    /// No connected session for this server.
    #[error("Server '{0}' is not connected")]
    NotConnected(String),

    /// The underlying process is not running.
    #[error("Process for '{0}' is not running")]
    ProcessNotRunning(String),

    /// Tool not found on server.
    #[error("Tool not found: {server}:{tool}")]
    UnknownTool { server: String, tool: String },

    /// Arguments did not match the tool's input schema.
    #[error("Invalid arguments for '{tool}': {}", format_issues(.issues))]
    InvalidArguments {
        tool: String,
        issues: Vec<ValidationIssue>,
    },

    /// Handshake did not complete in time.
    #[error("Handshake with '{server}' timed out after {timeout_ms}ms")]
    HandshakeTimeout { server: String, timeout_ms: u64 },

    /// Protocol failure during handshake, discovery or a call.
    #[error("Protocol error with '{server}': {source}")]
    Protocol {
        server: String,
        #[source]
        source: RpcError,
    },

    /// The state machine does not allow this change.
    #[error("Invalid transition for '{server}': {from} -> {to}")]
    InvalidTransition {
        server: String,
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConnectionError {
    pub fn protocol(server: impl Into<String>, source: RpcError) -> Self {
        Self::Protocol {
            server: server.into(),
            source,
        }
    }

    /// Configuration problems are fatal to the server and never retried.
    pub fn is_config_error(&self) -> bool {
        match self {
            Self::Config(_) => true,
            Self::Process(e) => e.is_config_error(),
            _ => false,
        }
    }

    /// Whether the handshake timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::HandshakeTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_detection() {
        let err: ConnectionError = ConfigError::ServerDisabled("docs".to_string()).into();
        assert!(err.is_config_error());

        let err: ConnectionError =
            SupervisorError::Config(ConfigError::UnknownServer("docs".to_string())).into();
        assert!(err.is_config_error());

        let err: ConnectionError = SupervisorError::spawn_failed("docs", "enoent").into();
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_invalid_arguments_display() {
        let err = ConnectionError::InvalidArguments {
            tool: "search".to_string(),
            issues: vec![
                ValidationIssue {
                    path: "$.query".to_string(),
                    message: "required field missing".to_string(),
                },
                ValidationIssue {
                    path: "$.limit".to_string(),
                    message: "expected integer, got string".to_string(),
                },
            ],
        };
        let display = err.to_string();
        assert!(display.contains("$.query: required field missing"));
        assert!(display.contains("; $.limit"));
    }

    #[test]
    fn test_protocol_error_source() {
        let err = ConnectionError::protocol("docs", RpcError::Closed("docs".to_string()));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_timeout());
    }
}
