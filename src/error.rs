// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for toolhost.
//!
//! Each subsystem owns a strongly-typed error (`SupervisorError`,
//! `RpcError`, `ConnectionError`, `MonitorError`) defined next to the code
//! that raises it. This module holds the configuration error shared by
//! every subsystem and the `HostError` umbrella used at the assembly edge,
//! with `anyhow` for propagation in the binary.

use thiserror::Error;

use crate::connection::ConnectionError;
use crate::monitor::MonitorError;
use crate::process::SupervisorError;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Server not configured: {0}")]
    UnknownServer(String),

    #[error("Server is disabled: {0}")]
    ServerDisabled(String),

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors surfaced by the assembled host.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Ambiguous tool name '{name}': matches {candidates:?}")]
    AmbiguousTool {
        name: String,
        candidates: Vec<String>,
    },
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
