// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging, metrics and tracing infrastructure.
//!
//! - **Logging**: `tracing` with an `EnvFilter`-driven subscriber
//! - **Metrics**: an injected [`Metrics`] registry of per-tool and
//!   per-operation latency histograms
//! - **Correlation IDs**: one [`CorrelationId`] per invocation
//! - **Trace sink**: the optional [`TraceSink`] the monitor forwards to
//!
//! # Usage
//!
//! ```rust,ignore
//! use toolhost::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Public async entry points carry `#[instrument]` with structured fields
//! (`server = %id`, `tool = %name`). Use `debug!` for protocol chatter,
//! `info!` for lifecycle transitions and `warn!` for failures that the
//! subsystem recovers from.

mod correlation;
mod init;
pub mod metrics;
mod sink;
mod spans;

pub use correlation::CorrelationId;
pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{Histogram, Metrics, MetricsSnapshot, OperationMetrics, ToolMetrics};
#[cfg(test)]
pub use sink::MockTraceSink;
pub use sink::{LogTraceSink, TraceEvent, TraceSink};
pub use spans::{InvocationSpan, TimedOperation};
