// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Monitor types: alert rules, alerts, health checks and metric snapshots.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::{duration_ms, ConnectionStatus};
use crate::telemetry::MetricsSnapshot;

/// Metric an alert rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    /// Percentage of failed executions inside the window.
    ErrorRate,
    /// Connected servers whose last health check passed.
    HealthyServers,
    /// Mean execution time in milliseconds inside the window.
    AvgExecutionTime,
    /// Percentage of failed connection attempts inside the window.
    ConnectionFailureRate,
}

impl fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ErrorRate => "error_rate",
            Self::HealthyServers => "healthy_servers",
            Self::AvgExecutionTime => "avg_execution_time",
            Self::ConnectionFailureRate => "connection_failure_rate",
        };
        f.write_str(s)
    }
}

/// Comparison between an observed value and a rule's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Operator {
    pub fn holds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => observed > threshold,
            Self::Gte => observed >= threshold,
            Self::Lt => observed < threshold,
            Self::Lte => observed <= threshold,
            Self::Eq => (observed - threshold).abs() < f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

fn default_true() -> bool {
    true
}

fn default_window() -> u64 {
    300
}

/// A threshold condition over one metric.
///
/// Rules are plain data: they load from configuration and can be edited at
/// runtime through the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub metric: AlertMetric,
    pub operator: Operator,
    pub threshold: f64,
    /// Evaluation window in seconds.
    #[serde(default = "default_window")]
    pub window_secs: u64,
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub trigger_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
}

impl AlertRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        metric: AlertMetric,
        operator: Operator,
        threshold: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            metric,
            operator,
            threshold,
            window_secs: default_window(),
            severity: Severity::Medium,
            enabled: true,
            trigger_count: 0,
            last_triggered: None,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_secs = window.as_secs();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Whether `observed` breaches this rule.
    pub fn breached_by(&self, observed: f64) -> bool {
        self.operator.holds(observed, self.threshold)
    }
}

/// One breach of an alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub severity: Severity,
    pub description: String,
    pub observed: f64,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

impl Alert {
    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Result of one health check against a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub server_id: String,
    pub status: ConnectionStatus,
    pub healthy: bool,
    /// Protocol round trip, when the server answered.
    pub response_time_ms: Option<u64>,
    /// Success rate over the server's most recent executions.
    pub success_rate: f64,
    #[serde(with = "duration_ms")]
    pub avg_execution_time: Duration,
    pub checked_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// One tool execution as seen by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSample {
    pub tool_id: String,
    pub server_id: Option<String>,
    pub success: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

/// One error as seen by the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSample {
    /// Subsystem that reported it, e.g. `process` or `connection`.
    pub source: String,
    pub server_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorSample {
    pub fn new(source: impl Into<String>, server_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            server_id: server_id.map(str::to_string),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCounts {
    pub total: usize,
    pub connected: usize,
    pub failed: usize,
    pub attempts: u64,
    pub failures: u64,
}

/// Aggregated view produced by the metrics loop.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorMetrics {
    pub timestamp: DateTime<Utc>,
    pub total_executions: usize,
    pub successful_executions: usize,
    pub failed_executions: usize,
    /// Percentage of failed executions.
    pub error_rate: f64,
    #[serde(with = "duration_ms")]
    pub avg_execution_time: Duration,
    pub connections: ConnectionCounts,
    /// Percentage of failed connection attempts.
    pub connection_failure_rate: f64,
    pub healthy_servers: usize,
    pub total_errors: usize,
    pub active_alerts: usize,
    pub telemetry: MetricsSnapshot,
}

/// Events published by the monitor.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    AlertTriggered(Alert),
    AlertResolved(Alert),
    HealthChecked(HealthCheck),
    MetricsCollected(Box<MonitorMetrics>),
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AlertTriggered(_) => "alert:triggered",
            Self::AlertResolved(_) => "alert:resolved",
            Self::HealthChecked(_) => "health:checked",
            Self::MetricsCollected(_) => "metrics:collected",
        }
    }
}
