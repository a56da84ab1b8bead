// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Assembly of the four components.
//!
//! The supervisor owns processes, the connection manager owns sessions on
//! top of them, the catalog serves tools from the connections and the
//! monitor watches all three. Each is constructed once and injected into
//! the next; nothing is global.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{InvocationRequest, InvocationResult, ToolCatalog};
use crate::config::HostConfig;
use crate::connection::{ConnectionError, ConnectionManager, ConnectionRecord, ToolBackend};
use crate::monitor::{Alert, HealthCheck, Monitor, MonitorMetrics};
use crate::process::{ProcessRecord, ProcessSupervisor};
use crate::telemetry::{Metrics, TimedOperation, TraceSink};

/// Point-in-time view of the whole host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    pub connections: Vec<ConnectionRecord>,
    pub processes: Vec<ProcessRecord>,
    pub health: Vec<HealthCheck>,
    pub metrics: MonitorMetrics,
    pub active_alerts: Vec<Alert>,
}

/// The assembled tool host.
pub struct ToolHost {
    config: Arc<HostConfig>,
    metrics: Arc<Metrics>,
    supervisor: Arc<ProcessSupervisor>,
    connections: Arc<ConnectionManager>,
    catalog: Arc<ToolCatalog>,
    monitor: Arc<Monitor>,
}

impl ToolHost {
    /// Wire the components together. Must be called inside a tokio runtime.
    pub fn build(config: HostConfig, sink: Option<Arc<dyn TraceSink>>) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());
        let supervisor = ProcessSupervisor::new(Arc::clone(&config));
        let connections = ConnectionManager::new(Arc::clone(&config), Arc::clone(&supervisor));
        let backend: Arc<dyn ToolBackend> = connections.clone();
        let catalog = ToolCatalog::new(Arc::clone(&config), Arc::clone(&backend), Arc::clone(&metrics));
        let monitor = Monitor::new(config.monitor.clone(), backend, Arc::clone(&metrics), sink);

        Self {
            config,
            metrics,
            supervisor,
            connections,
            catalog,
            monitor,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Connect every enabled server, build the catalog and start the
    /// monitor loops. Failed servers are reported, not fatal; they keep
    /// retrying under the reconnect policy.
    pub async fn start(&self) -> Vec<(String, Result<ConnectionRecord, ConnectionError>)> {
        let _timer = TimedOperation::start("host.start", Arc::clone(&self.metrics));
        self.monitor.observe(
            self.supervisor.subscribe(),
            self.connections.subscribe(),
            self.catalog.subscribe(),
        );

        let results = self.connections.connect_all().await;
        for (id, result) in &results {
            if let Err(e) = result {
                warn!(server = %id, error = %e, "Server failed to connect");
            }
        }

        let tools = self.catalog.initialize().await;
        self.monitor.start();
        info!(
            servers = results.len(),
            connected = results.iter().filter(|(_, r)| r.is_ok()).count(),
            tools,
            "Tool host started"
        );
        results
    }

    pub async fn execute(&self, request: InvocationRequest) -> InvocationResult {
        self.catalog.execute(request).await
    }

    pub async fn status(&self) -> HostStatus {
        HostStatus {
            connections: self.connections.all().await,
            processes: self.supervisor.all().await,
            health: self.monitor.get_health_status(),
            metrics: self.monitor.get_metrics().await,
            active_alerts: self.monitor.active_alerts(),
        }
    }

    /// Stop every loop, close every session and stop every process within
    /// the configured grace period.
    pub async fn shutdown(&self) {
        info!("Shutting down tool host");
        self.monitor.shutdown();
        self.catalog.shutdown();
        self.connections.shutdown().await;
        self.supervisor
            .shutdown(self.config.supervisor.shutdown_grace())
            .await;
    }
}
