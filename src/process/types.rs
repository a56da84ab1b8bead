// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process supervisor types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::ChildStdin;
use tokio::sync::mpsc;

/// Lifecycle state of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ProcessStatus {
    /// Whether the process is alive or about to be.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of the last liveness check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Snapshot of one supervised process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub server_id: String,
    pub pid: Option<u32>,
    pub status: ProcessStatus,
    pub health: HealthStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub exit_code: Option<i32>,
    /// Spawn epoch; exit notifications from older generations are ignored.
    pub generation: u64,
}

impl ProcessRecord {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            pid: None,
            status: ProcessStatus::Stopped,
            health: HealthStatus::Unknown,
            started_at: None,
            last_health_check: None,
            restart_count: 0,
            last_restart_at: None,
            error_count: 0,
            last_error: None,
            exit_code: None,
            generation: 0,
        }
    }

    /// Time since the process was started.
    pub fn uptime(&self) -> Option<chrono::Duration> {
        match (self.status, self.started_at) {
            (ProcessStatus::Running, Some(started)) => Some(Utc::now() - started),
            _ => None,
        }
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
    }
}

/// How a process exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitState {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitState {
    /// Exited on its own with status zero.
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }

    pub(crate) fn from_status(status: std::io::Result<std::process::ExitStatus>) -> Self {
        match status {
            Ok(status) => Self {
                code: status.code(),
                signal: exit_signal(&status),
            },
            Err(_) => Self::default(),
        }
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Events published by the supervisor.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Started(ProcessRecord),
    Stopped(ProcessRecord),
    Failed(ProcessRecord),
    Restarted(ProcessRecord),
    HealthChanged {
        record: ProcessRecord,
        previous: HealthStatus,
    },
    RestartLimitReached(ProcessRecord),
}

impl ProcessEvent {
    pub fn record(&self) -> &ProcessRecord {
        match self {
            Self::Started(r)
            | Self::Stopped(r)
            | Self::Failed(r)
            | Self::Restarted(r)
            | Self::RestartLimitReached(r) => r,
            Self::HealthChanged { record, .. } => record,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.record().server_id
    }

    /// Event name used in logs and trace sinks.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::Stopped(_) => "stopped",
            Self::Failed(_) => "failed",
            Self::Restarted(_) => "restarted",
            Self::HealthChanged { .. } => "health:changed",
            Self::RestartLimitReached(_) => "restart:limit:reached",
        }
    }
}

/// Protocol pipes of a running process, handed out once per generation.
#[derive(Debug)]
pub struct ProcessPipes {
    pub stdin: ChildStdin,
    /// Lines read from the process's stdout. Lines written before the pipes
    /// were taken are buffered up to a fixed count, then dropped.
    pub stdout: mpsc::Receiver<String>,
    pub generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ProcessStatus::Running.to_string(), "running");
        assert_eq!(HealthStatus::Unhealthy.to_string(), "unhealthy");
        assert!(ProcessStatus::Starting.is_active());
        assert!(!ProcessStatus::Failed.is_active());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ProcessStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
    }

    #[test]
    fn test_record_error() {
        let mut record = ProcessRecord::new("docs");
        record.record_error("spawn failed");
        record.record_error("exit code 2");
        assert_eq!(record.error_count, 2);
        assert_eq!(record.last_error.as_deref(), Some("exit code 2"));
        assert!(record.uptime().is_none());
    }

    #[test]
    fn test_exit_state() {
        let clean = ExitState {
            code: Some(0),
            signal: None,
        };
        assert!(clean.is_clean());
        let killed = ExitState {
            code: None,
            signal: Some(9),
        };
        assert!(!killed.is_clean());
        assert_eq!(killed.to_string(), "signal 9");
    }

    #[test]
    fn test_event_accessors() {
        let event = ProcessEvent::RestartLimitReached(ProcessRecord::new("docs"));
        assert_eq!(event.server_id(), "docs");
        assert_eq!(event.name(), "restart:limit:reached");
    }
}
