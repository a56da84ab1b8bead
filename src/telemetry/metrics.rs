// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Latency and outcome metrics.
//!
//! A [`Metrics`] registry is created by the host and handed to every
//! component that records into it. Nothing here is global.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::connection::duration_ms;

/// Registry of per-tool and per-operation metrics.
#[derive(Debug)]
pub struct Metrics {
    /// Invocation metrics keyed by tool id.
    tools: RwLock<HashMap<String, ToolMetrics>>,

    /// Latency metrics keyed by operation name.
    operations: RwLock<HashMap<String, OperationMetrics>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record one tool invocation.
    pub fn record_tool(&self, tool_id: &str, duration: Duration, success: bool) {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        tools
            .entry(tool_id.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Record one timed operation (`connect`, `ping`, `execute`, ...).
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self
            .operations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        ops.entry(name.to_string()).or_default().record(duration);
    }

    pub fn tool_metrics(&self, tool_id: &str) -> Option<ToolMetrics> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_id)
            .cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tools: self
                .tools
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            operations: self
                .operations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            uptime: self.uptime(),
        }
    }

    pub fn reset(&self) {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.operations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome counters and latency for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetrics {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
    #[serde(with = "duration_ms")]
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl ToolMetrics {
    pub fn new() -> Self {
        Self {
            invocations: 0,
            successes: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration, success: bool) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.invocations == 0 {
            Duration::ZERO
        } else {
            self.total_duration.div_f64(self.invocations as f64)
        }
    }

    /// Fraction of successful invocations; 1.0 before the first call.
    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 {
            1.0
        } else {
            self.successes as f64 / self.invocations as f64
        }
    }
}

impl Default for ToolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency distribution of one operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationMetrics {
    pub count: u64,
    #[serde(with = "duration_ms")]
    pub total_duration: Duration,
    #[serde(with = "duration_ms")]
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration.div_f64(self.count as f64)
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    /// Upper bucket bounds in milliseconds; the last bucket is unbounded.
    bounds_ms: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    pub fn with_bounds(bounds_ms: Vec<u64>) -> Self {
        let counts = vec![0; bounds_ms.len() + 1];
        Self { bounds_ms, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let idx = self
            .bounds_ms
            .iter()
            .position(|&b| ms <= b)
            .unwrap_or(self.bounds_ms.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn bounds_ms(&self) -> &[u64] {
        &self.bounds_ms
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Upper bound of the bucket holding the `p`th percentile.
    pub fn percentile(&self, p: f64) -> Duration {
        let total = self.total();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = ((total as f64 * p / 100.0).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let ms = match self.bounds_ms.get(i) {
                    Some(&bound) => bound,
                    None => self.bounds_ms.last().copied().unwrap_or(0) * 2,
                };
                return Duration::from_millis(ms);
            }
        }
        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p90(&self) -> Duration {
        self.percentile(90.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Tool calls range from sub-millisecond cache hits to 30 s timeouts.
        Self::with_bounds(vec![1, 5, 10, 50, 100, 500, 1_000, 5_000, 30_000])
    }
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tools: HashMap<String, ToolMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    #[serde(with = "duration_ms")]
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Human-readable report, sorted by name.
    pub fn format_report(&self) -> String {
        let mut report = format!("Uptime: {:.0?}\n", self.uptime);

        if !self.tools.is_empty() {
            report.push_str("\nTools:\n");
            let mut tools: Vec<_> = self.tools.iter().collect();
            tools.sort_by(|a, b| a.0.cmp(b.0));
            for (name, m) in tools {
                report.push_str(&format!(
                    "  {}: {} calls, {:.1}% success, avg {:.2?}, p90 {:?}\n",
                    name,
                    m.invocations,
                    m.success_rate() * 100.0,
                    m.avg_duration(),
                    m.histogram.p90()
                ));
            }
        }

        if !self.operations.is_empty() {
            report.push_str("\nOperations:\n");
            let mut ops: Vec<_> = self.operations.iter().collect();
            ops.sort_by(|a, b| a.0.cmp(b.0));
            for (name, m) in ops {
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:?}\n",
                    name,
                    m.count,
                    m.avg_duration(),
                    m.histogram.p99()
                ));
            }
        }

        report
    }
}
