// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Span helpers for catalog invocations and timed operations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info_span, Span};

use super::correlation::CorrelationId;
use super::metrics::Metrics;

/// RAII guard timing one catalog invocation.
///
/// Records the duration and outcome on the span and, when a registry is
/// attached, in [`Metrics`].
pub struct InvocationSpan {
    tool_id: String,
    start: Instant,
    span: Span,
    metrics: Option<Arc<Metrics>>,
}

impl InvocationSpan {
    pub fn start(tool_id: &str, id: CorrelationId) -> Self {
        let span = info_span!(
            "invoke",
            tool = %tool_id,
            invocation = %id.short(),
            duration_ms = tracing::field::Empty,
            success = tracing::field::Empty,
            cache_hit = tracing::field::Empty,
        );

        Self {
            tool_id: tool_id.to_string(),
            start: Instant::now(),
            span,
            metrics: None,
        }
    }

    /// Also record the outcome into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn record_cache_hit(&self, hit: bool) {
        self.span.record("cache_hit", hit);
    }

    /// Close the span, returning the measured duration.
    pub fn finish(self, success: bool) -> Duration {
        let duration = self.start.elapsed();
        self.span
            .record("duration_ms", duration.as_secs_f64() * 1000.0);
        self.span.record("success", success);

        if let Some(metrics) = &self.metrics {
            metrics.record_tool(&self.tool_id, duration, success);
            metrics.record_operation("execute", duration);
        }

        tracing::debug!(parent: &self.span, "Invocation complete");
        duration
    }
}

/// Times an operation into a registry when dropped.
pub struct TimedOperation {
    name: &'static str,
    start: Instant,
    metrics: Arc<Metrics>,
}

impl TimedOperation {
    pub fn start(name: &'static str, metrics: Arc<Metrics>) -> Self {
        Self {
            name,
            start: Instant::now(),
            metrics,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TimedOperation {
    fn drop(&mut self) {
        self.metrics
            .record_operation(self.name, self.start.elapsed());
    }
}
