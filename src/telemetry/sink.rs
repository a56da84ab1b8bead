// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Optional external tracing sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::correlation::CorrelationId;

/// One event forwarded to a [`TraceSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    /// Event name, e.g. `tool:executed` or `alert:triggered`.
    pub name: String,
    pub server_id: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub timestamp: DateTime<Utc>,
    pub attributes: Value,
}

impl TraceEvent {
    pub fn new(name: impl Into<String>, attributes: Value) -> Self {
        Self {
            name: name.into(),
            server_id: None,
            correlation_id: None,
            timestamp: Utc::now(),
            attributes,
        }
    }

    pub fn with_server(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

/// Destination for trace events. Delivery is best effort: callers log
/// failures and carry on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn record(&self, event: TraceEvent) -> anyhow::Result<()>;
}

/// Writes trace events to the log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTraceSink;

#[async_trait]
impl TraceSink for LogTraceSink {
    async fn record(&self, event: TraceEvent) -> anyhow::Result<()> {
        info!(
            target: "toolhost::trace",
            event = %event.name,
            server = event.server_id.as_deref().unwrap_or("-"),
            correlation = ?event.correlation_id,
            attributes = %event.attributes,
            "Trace event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_log_sink_accepts_events() {
        let event = TraceEvent::new("tool:executed", json!({"success": true}))
            .with_server("docs")
            .with_correlation(CorrelationId::new());
        assert!(LogTraceSink.record(event).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_sink() {
        let mut sink = MockTraceSink::new();
        sink.expect_record()
            .withf(|e| e.name == "alert:triggered" && e.server_id.is_none())
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("collector offline")));

        let result = sink
            .record(TraceEvent::new("alert:triggered", json!({})))
            .await;
        assert!(result.is_err());
    }
}
