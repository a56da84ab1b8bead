// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Monitoring and alerting.
//!
//! The [`Monitor`] runs two loops: periodic health checks of every
//! connection, and metric aggregation followed by alert-rule evaluation.
//! It learns about executions and failures by subscribing to the event
//! streams of the supervisor, the connection manager and the catalog.

mod error;
#[allow(clippy::module_inception)]
mod monitor;
mod rules;
mod types;

pub use error::MonitorError;
pub use monitor::{Monitor, ERROR_HISTORY, EXECUTION_HISTORY, HEALTH_SAMPLE};
pub use rules::default_rules;
pub use types::{
    Alert, AlertMetric, AlertRule, ConnectionCounts, ErrorSample, ExecutionSample, HealthCheck,
    MonitorEvent, MonitorMetrics, Operator, Severity,
};
