// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Built-in alert rules.

use std::time::Duration;

use super::types::{AlertMetric, AlertRule, Operator, Severity};

/// The rules a monitor starts with when configuration supplies none.
pub fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule::new(
            "high-error-rate",
            "High error rate",
            AlertMetric::ErrorRate,
            Operator::Gt,
            20.0,
        )
        .with_window(Duration::from_secs(5 * 60))
        .with_severity(Severity::High),
        AlertRule::new(
            "no-healthy-servers",
            "No healthy servers",
            AlertMetric::HealthyServers,
            Operator::Lt,
            1.0,
        )
        .with_window(Duration::from_secs(60))
        .with_severity(Severity::Critical),
        AlertRule::new(
            "slow-execution",
            "Slow average execution",
            AlertMetric::AvgExecutionTime,
            Operator::Gt,
            30_000.0,
        )
        .with_window(Duration::from_secs(10 * 60))
        .with_severity(Severity::Medium),
        AlertRule::new(
            "high-connection-failure-rate",
            "High connection failure rate",
            AlertMetric::ConnectionFailureRate,
            Operator::Gt,
            50.0,
        )
        .with_window(Duration::from_secs(5 * 60))
        .with_severity(Severity::High),
    ]
}
