// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for process supervision.

use thiserror::Error;

use crate::error::ConfigError;

/// Errors raised by the process supervisor.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Missing or disabled server configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The process could not be spawned.
    #[error("Failed to spawn {server}: {message}")]
    SpawnFailed { server: String, message: String },

    /// The process did not become ready in time.
    #[error("{server} did not start within {timeout_ms}ms")]
    StartupTimeout { server: String, timeout_ms: u64 },

    /// The restart ceiling has been reached.
    #[error("{server} reached its restart limit ({attempts} restarts)")]
    RestartLimitReached { server: String, attempts: u32 },

    /// No live process for this server.
    #[error("{0} is not running")]
    NotRunning(String),

    /// Protocol pipes were already handed out for this generation.
    #[error("Pipes for {0} have already been taken")]
    PipesTaken(String),
}

impl SupervisorError {
    pub fn spawn_failed(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Configuration errors are never retried.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Whether retrying later might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed { .. } | Self::StartupTimeout { .. } | Self::NotRunning(_) | Self::PipesTaken(_)
        )
    }
}
