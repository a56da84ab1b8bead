// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The seam between connections and their consumers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::error::ConnectionError;
use super::types::{ConnectionEvent, ConnectionRecord, ToolCallResult};

/// What the catalog and monitor need from the connection layer.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Snapshots of every connection, sorted by server id.
    async fn connections(&self) -> Vec<ConnectionRecord>;

    /// Snapshot of one connection.
    async fn connection(&self, server_id: &str) -> Option<ConnectionRecord>;

    /// Rediscover tools and resources on a connected session.
    async fn discover(&self, server_id: &str) -> Result<ConnectionRecord, ConnectionError>;

    /// Invoke a tool. Downstream failures come back as a failed result.
    async fn execute_tool(
        &self,
        server_id: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, ConnectionError>;

    /// Protocol round trip.
    async fn ping(&self, server_id: &str) -> Result<Duration, ConnectionError>;

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;
}
