// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Health checks, metric aggregation and alert evaluation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::error::MonitorError;
use super::rules::default_rules;
use super::types::{
    Alert, AlertMetric, AlertRule, ConnectionCounts, ErrorSample, ExecutionSample, HealthCheck,
    MonitorEvent, MonitorMetrics,
};
use crate::catalog::CatalogEvent;
use crate::config::MonitorSettings;
use crate::connection::{ConnectionEvent, ConnectionStatus, ToolBackend};
use crate::process::ProcessEvent;
use crate::scheduler::{InFlight, TaskKey, TaskPurpose, TaskScheduler};
use crate::telemetry::{Metrics, TraceEvent, TraceSink};

const EVENT_CAPACITY: usize = 256;
const TASK_ID: &str = "monitor";

/// Retained tool executions.
pub const EXECUTION_HISTORY: usize = 1_000;
/// Retained errors.
pub const ERROR_HISTORY: usize = 500;
/// Retained connection attempts.
pub const CONNECTION_HISTORY: usize = 1_000;
/// Retained alerts, active and resolved.
pub const ALERT_HISTORY: usize = 1_000;
/// Executions per server considered by a health check.
pub const HEALTH_SAMPLE: usize = 20;

#[derive(Debug, Clone, Copy)]
struct ConnectionAttempt {
    success: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct MonitorState {
    rules: Vec<AlertRule>,
    active: Vec<Alert>,
    alerts: VecDeque<Alert>,
    executions: VecDeque<ExecutionSample>,
    errors: VecDeque<ErrorSample>,
    attempts: VecDeque<ConnectionAttempt>,
    health: BTreeMap<String, HealthCheck>,
    last_metrics: Option<MonitorMetrics>,
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, limit: usize) {
    buffer.push_back(item);
    while buffer.len() > limit {
        buffer.pop_front();
    }
}

/// Earliest timestamp inside `window`, or `None` when the window reaches
/// further back than time can be represented.
fn window_start(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn mean_duration<'a>(samples: impl Iterator<Item = &'a ExecutionSample>) -> Duration {
    let (count, total) = samples.fold((0u32, Duration::ZERO), |(n, sum), s| (n + 1, sum + s.duration));
    if count == 0 {
        Duration::ZERO
    } else {
        total / count
    }
}

impl MonitorState {
    fn executions_since(&self, since: Option<DateTime<Utc>>) -> impl Iterator<Item = &ExecutionSample> {
        self.executions
            .iter()
            .filter(move |s| since.is_none_or(|t| s.timestamp >= t))
    }

    fn attempts_since(&self, since: Option<DateTime<Utc>>) -> impl Iterator<Item = &ConnectionAttempt> {
        self.attempts
            .iter()
            .filter(move |a| since.is_none_or(|t| a.timestamp >= t))
    }

    fn metric_value(&self, metric: AlertMetric, window: Duration, healthy_servers: usize) -> f64 {
        let since = window_start(Utc::now(), window);
        match metric {
            AlertMetric::ErrorRate => {
                let (total, failed) = self
                    .executions_since(since)
                    .fold((0, 0), |(t, f), s| (t + 1, f + usize::from(!s.success)));
                percentage(failed, total)
            }
            AlertMetric::HealthyServers => healthy_servers as f64,
            AlertMetric::AvgExecutionTime => {
                mean_duration(self.executions_since(since)).as_secs_f64() * 1000.0
            }
            AlertMetric::ConnectionFailureRate => {
                let (total, failed) = self
                    .attempts_since(since)
                    .fold((0, 0), |(t, f), a| (t + 1, f + usize::from(!a.success)));
                percentage(failed, total)
            }
        }
    }

    /// Connected servers whose last check, if any, passed.
    fn healthy_servers(&self, statuses: &[(String, ConnectionStatus)]) -> usize {
        statuses
            .iter()
            .filter(|(id, status)| {
                *status == ConnectionStatus::Connected
                    && self.health.get(id).is_none_or(|h| h.healthy)
            })
            .count()
    }
}

/// Observes the other components and raises alerts.
pub struct Monitor {
    settings: MonitorSettings,
    connections: Arc<dyn ToolBackend>,
    metrics: Arc<Metrics>,
    sink: Option<Arc<dyn TraceSink>>,
    state: Mutex<MonitorState>,
    scheduler: TaskScheduler,
    in_flight: InFlight,
    events: broadcast::Sender<MonitorEvent>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        connections: Arc<dyn ToolBackend>,
        metrics: Arc<Metrics>,
        sink: Option<Arc<dyn TraceSink>>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = MonitorState {
            rules: settings.rules.clone().unwrap_or_else(default_rules),
            ..MonitorState::default()
        };
        Arc::new(Self {
            settings,
            connections,
            metrics,
            sink,
            state: Mutex::new(state),
            scheduler: TaskScheduler::new(),
            in_flight: InFlight::new(),
            events,
            listeners: Mutex::new(Vec::new()),
        })
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: MonitorEvent) {
        debug!(event = event.name(), "Monitor event");
        let _ = self.events.send(event);
    }

    /// Forward to the trace sink, if any. Failures are logged and dropped.
    async fn trace(&self, event: TraceEvent) {
        let Some(sink) = &self.sink else {
            return;
        };
        let name = event.name.clone();
        if let Err(e) = sink.record(event).await {
            warn!(event = %name, error = %e, "Trace sink rejected event");
        }
    }

    /// Start the health-check and metrics loops.
    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::downgrade(self);
        self.scheduler.schedule_interval(
            TaskKey::new(TASK_ID, TaskPurpose::HealthCheck),
            self.settings.health_check_interval(),
            move || tick(monitor.clone(), TaskPurpose::HealthCheck),
        );

        let monitor = Arc::downgrade(self);
        self.scheduler.schedule_interval(
            TaskKey::new(TASK_ID, TaskPurpose::Metrics),
            self.settings.metrics_interval(),
            move || tick(monitor.clone(), TaskPurpose::Metrics),
        );
        info!(
            health_interval = ?self.settings.health_check_interval(),
            metrics_interval = ?self.settings.metrics_interval(),
            "Monitor started"
        );
    }

    /// Follow the event streams of the other components.
    pub fn observe(
        self: &Arc<Self>,
        processes: broadcast::Receiver<ProcessEvent>,
        connections: broadcast::Receiver<ConnectionEvent>,
        catalog: broadcast::Receiver<CatalogEvent>,
    ) {
        let handles = vec![
            tokio::spawn(follow(Arc::downgrade(self), processes, |m, e| async move {
                m.on_process_event(e).await
            })),
            tokio::spawn(follow(Arc::downgrade(self), connections, |m, e| async move {
                m.on_connection_event(e).await
            })),
            tokio::spawn(follow(Arc::downgrade(self), catalog, |m, e| async move {
                m.on_catalog_event(e).await
            })),
        ];
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
    }

    async fn on_process_event(&self, event: ProcessEvent) {
        match event {
            ProcessEvent::Failed(record) | ProcessEvent::RestartLimitReached(record) => {
                let message = record
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "process failed".to_string());
                self.track_error(ErrorSample::new("process", Some(&record.server_id), message))
                    .await;
            }
            _ => {}
        }
    }

    async fn on_connection_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Established(_) => self.record_connection_attempt(true),
            ConnectionEvent::Failed(record) => {
                self.record_connection_attempt(false);
                let message = record
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "connection failed".to_string());
                self.track_error(ErrorSample::new("connection", Some(&record.server_id), message))
                    .await;
            }
            ConnectionEvent::Lost(record) if record.status != ConnectionStatus::Disconnected => {
                self.track_error(ErrorSample::new(
                    "connection",
                    Some(&record.server_id),
                    "connection lost",
                ))
                .await;
            }
            ConnectionEvent::ReconnectExhausted(record) => {
                self.track_error(ErrorSample::new(
                    "connection",
                    Some(&record.server_id),
                    "reconnect attempts exhausted",
                ))
                .await;
            }
            _ => {}
        }
    }

    async fn on_catalog_event(&self, event: CatalogEvent) {
        if let CatalogEvent::ToolExecuted(result) = event {
            self.track_tool_execution(ExecutionSample {
                tool_id: result.tool_id,
                server_id: result.metadata.server_id,
                success: result.success,
                duration: result.execution_time,
                timestamp: result.timestamp,
            })
            .await;
        }
    }

    fn record_connection_attempt(&self, success: bool) {
        let attempt = ConnectionAttempt {
            success,
            timestamp: Utc::now(),
        };
        push_bounded(&mut self.state().attempts, attempt, CONNECTION_HISTORY);
    }

    /// Append an execution to the bounded history.
    pub async fn track_tool_execution(&self, sample: ExecutionSample) {
        let event = TraceEvent::new(
            "tool:executed",
            json!({
                "tool": sample.tool_id,
                "success": sample.success,
                "duration_ms": sample.duration.as_millis() as u64,
            }),
        );
        let event = match &sample.server_id {
            Some(server) => event.with_server(server),
            None => event,
        };
        push_bounded(&mut self.state().executions, sample, EXECUTION_HISTORY);
        self.trace(event).await;
    }

    /// Append an error to the bounded history.
    pub async fn track_error(&self, sample: ErrorSample) {
        debug!(source = %sample.source, server = ?sample.server_id, error = %sample.message, "Error tracked");
        let event = TraceEvent::new(
            "error",
            json!({"source": sample.source, "message": sample.message}),
        );
        let event = match &sample.server_id {
            Some(server) => event.with_server(server),
            None => event,
        };
        push_bounded(&mut self.state().errors, sample, ERROR_HISTORY);
        self.trace(event).await;
    }

    /// Check every connection and record the outcome.
    #[instrument(skip(self))]
    pub async fn check_health(&self) -> Vec<HealthCheck> {
        let mut checks = Vec::new();
        for record in self.connections.connections().await {
            let (response_time, error) = if record.is_connected() {
                match self.connections.ping(&record.server_id).await {
                    Ok(rtt) => (Some(rtt), None),
                    Err(e) => (None, Some(e.to_string())),
                }
            } else {
                (None, record.last_error.clone())
            };

            let (success_rate, avg_execution_time) = {
                let state = self.state();
                let recent: Vec<&ExecutionSample> = state
                    .executions
                    .iter()
                    .rev()
                    .filter(|s| s.server_id.as_deref() == Some(record.server_id.as_str()))
                    .take(HEALTH_SAMPLE)
                    .collect();
                let rate = if recent.is_empty() {
                    1.0
                } else {
                    recent.iter().filter(|s| s.success).count() as f64 / recent.len() as f64
                };
                (rate, mean_duration(recent.into_iter()))
            };

            let check = HealthCheck {
                server_id: record.server_id.clone(),
                status: record.status,
                healthy: record.is_connected() && response_time.is_some(),
                response_time_ms: response_time.map(|d| d.as_millis() as u64),
                success_rate,
                avg_execution_time,
                checked_at: Utc::now(),
                error,
            };
            if !check.healthy {
                debug!(server = %check.server_id, status = %check.status, "Server unhealthy");
            }
            self.state()
                .health
                .insert(check.server_id.clone(), check.clone());
            self.emit(MonitorEvent::HealthChecked(check.clone()));
            checks.push(check);
        }
        checks
    }

    async fn statuses(&self) -> Vec<(String, ConnectionStatus)> {
        self.connections
            .connections()
            .await
            .into_iter()
            .map(|r| (r.server_id, r.status))
            .collect()
    }

    /// Current aggregate view.
    pub async fn get_metrics(&self) -> MonitorMetrics {
        let statuses = self.statuses().await;
        let state = self.state();

        let total = state.executions.len();
        let successful = state.executions.iter().filter(|s| s.success).count();
        let attempts = state.attempts.len();
        let failures = state.attempts.iter().filter(|a| !a.success).count();

        MonitorMetrics {
            timestamp: Utc::now(),
            total_executions: total,
            successful_executions: successful,
            failed_executions: total - successful,
            error_rate: percentage(total - successful, total),
            avg_execution_time: mean_duration(state.executions.iter()),
            connections: ConnectionCounts {
                total: statuses.len(),
                connected: statuses
                    .iter()
                    .filter(|(_, s)| *s == ConnectionStatus::Connected)
                    .count(),
                failed: statuses
                    .iter()
                    .filter(|(_, s)| matches!(s, ConnectionStatus::Failed | ConnectionStatus::Timeout))
                    .count(),
                attempts: attempts as u64,
                failures: failures as u64,
            },
            connection_failure_rate: percentage(failures, attempts),
            healthy_servers: state.healthy_servers(&statuses),
            total_errors: state.errors.len(),
            active_alerts: state.active.len(),
            telemetry: self.metrics.snapshot(),
        }
    }

    /// Aggregate, publish, then evaluate the alert rules.
    #[instrument(skip(self))]
    pub async fn collect_metrics(&self) -> Vec<Alert> {
        let metrics = self.get_metrics().await;
        self.state().last_metrics = Some(metrics.clone());
        self.emit(MonitorEvent::MetricsCollected(Box::new(metrics)));
        self.evaluate_rules().await
    }

    /// Create one alert for every enabled rule whose condition holds.
    pub async fn evaluate_rules(&self) -> Vec<Alert> {
        let statuses = self.statuses().await;
        let triggered = {
            let mut state = self.state();
            let healthy = state.healthy_servers(&statuses);
            let now = Utc::now();

            let mut breaches = Vec::new();
            for i in 0..state.rules.len() {
                let rule = &state.rules[i];
                if !rule.enabled {
                    continue;
                }
                let observed = state.metric_value(rule.metric, rule.window(), healthy);
                if !rule.breached_by(observed) {
                    continue;
                }
                let alert = Alert {
                    id: Uuid::new_v4().to_string(),
                    rule_id: rule.id.clone(),
                    severity: rule.severity,
                    description: format!(
                        "{}: {} is {:.2} ({} {})",
                        rule.name,
                        rule.metric,
                        observed,
                        rule.operator.symbol(),
                        rule.threshold
                    ),
                    observed,
                    triggered_at: now,
                    resolved_at: None,
                    metadata: json!({
                        "metric": rule.metric,
                        "threshold": rule.threshold,
                        "windowSecs": rule.window_secs,
                        "healthyServers": healthy,
                    }),
                };
                let rule = &mut state.rules[i];
                rule.trigger_count += 1;
                rule.last_triggered = Some(now);
                breaches.push(alert);
            }
            for alert in &breaches {
                state.active.push(alert.clone());
                push_bounded(&mut state.alerts, alert.clone(), ALERT_HISTORY);
            }
            breaches
        };

        for alert in &triggered {
            warn!(
                rule = %alert.rule_id,
                severity = %alert.severity,
                observed = alert.observed,
                "{}",
                alert.description
            );
            self.emit(MonitorEvent::AlertTriggered(alert.clone()));
            self.trace(TraceEvent::new(
                "alert:triggered",
                json!({
                    "alert": alert.id,
                    "rule": alert.rule_id,
                    "severity": alert.severity,
                    "observed": alert.observed,
                }),
            ))
            .await;
        }
        triggered
    }

    /// Mark an active alert resolved.
    pub fn resolve_alert(&self, id: &str) -> Result<Alert, MonitorError> {
        let resolved = {
            let mut state = self.state();
            let index = state
                .active
                .iter()
                .position(|a| a.id == id)
                .ok_or_else(|| MonitorError::AlertNotFound(id.to_string()))?;
            let mut alert = state.active.remove(index);
            alert.resolved_at = Some(Utc::now());
            if let Some(past) = state.alerts.iter_mut().find(|a| a.id == id) {
                past.resolved_at = alert.resolved_at;
            }
            alert
        };
        info!(alert = %id, rule = %resolved.rule_id, "Alert resolved");
        self.emit(MonitorEvent::AlertResolved(resolved.clone()));
        Ok(resolved)
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state().active.clone()
    }

    /// Every retained alert, oldest first.
    pub fn alert_history(&self) -> Vec<Alert> {
        self.state().alerts.iter().cloned().collect()
    }

    /// Last health check per server, ordered by server id.
    pub fn get_health_status(&self) -> Vec<HealthCheck> {
        self.state().health.values().cloned().collect()
    }

    /// The snapshot taken by the most recent metrics cycle.
    pub fn last_metrics(&self) -> Option<MonitorMetrics> {
        self.state().last_metrics.clone()
    }

    pub fn recent_errors(&self) -> Vec<ErrorSample> {
        self.state().errors.iter().cloned().collect()
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.state().rules.clone()
    }

    pub fn rule(&self, id: &str) -> Option<AlertRule> {
        self.state().rules.iter().find(|r| r.id == id).cloned()
    }

    fn check_rule(rule: &AlertRule) -> Result<(), MonitorError> {
        if rule.id.trim().is_empty() {
            return Err(MonitorError::invalid_rule(&rule.id, "id must not be empty"));
        }
        if !rule.threshold.is_finite() {
            return Err(MonitorError::invalid_rule(&rule.id, "threshold must be finite"));
        }
        Ok(())
    }

    pub fn add_rule(&self, rule: AlertRule) -> Result<(), MonitorError> {
        Self::check_rule(&rule)?;
        let mut state = self.state();
        if state.rules.iter().any(|r| r.id == rule.id) {
            return Err(MonitorError::DuplicateRule(rule.id));
        }
        debug!(rule = %rule.id, "Alert rule added");
        state.rules.push(rule);
        Ok(())
    }

    /// Replace a rule's definition, keeping its trigger history.
    pub fn update_rule(&self, rule: AlertRule) -> Result<(), MonitorError> {
        Self::check_rule(&rule)?;
        let mut state = self.state();
        let existing = state
            .rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| MonitorError::RuleNotFound(rule.id.clone()))?;
        let (count, last) = (existing.trigger_count, existing.last_triggered);
        *existing = AlertRule {
            trigger_count: count,
            last_triggered: last,
            ..rule
        };
        Ok(())
    }

    pub fn remove_rule(&self, id: &str) -> Result<AlertRule, MonitorError> {
        let mut state = self.state();
        let index = state
            .rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| MonitorError::RuleNotFound(id.to_string()))?;
        Ok(state.rules.remove(index))
    }

    pub fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<(), MonitorError> {
        let mut state = self.state();
        let rule = state
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| MonitorError::RuleNotFound(id.to_string()))?;
        rule.enabled = enabled;
        Ok(())
    }

    /// Stop the loops and the event listeners.
    pub fn shutdown(&self) {
        self.scheduler.cancel_all();
        let listeners = std::mem::take(
            &mut *self.listeners.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for listener in listeners {
            listener.abort();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One loop iteration. Skipped while the previous one is still running.
async fn tick(monitor: Weak<Monitor>, purpose: TaskPurpose) {
    let Some(monitor) = monitor.upgrade() else {
        return;
    };
    let slot = match purpose {
        TaskPurpose::Metrics => "metrics",
        _ => "health",
    };
    let Some(_guard) = monitor.in_flight.try_acquire(slot) else {
        debug!(task = slot, "Previous monitor tick still running");
        return;
    };
    match purpose {
        TaskPurpose::Metrics => {
            monitor.collect_metrics().await;
        }
        _ => {
            monitor.check_health().await;
        }
    }
}

async fn follow<E, F, Fut>(monitor: Weak<Monitor>, mut events: broadcast::Receiver<E>, handle: F)
where
    E: Clone + Send + 'static,
    F: Fn(Arc<Monitor>, E) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Monitor lagged behind events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(monitor) = monitor.upgrade() else {
            break;
        };
        handle(monitor, event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;

    use crate::catalog::{InvocationMetadata, InvocationResult};
    use crate::connection::{ConnectionError, ConnectionRecord, ToolCallResult};
    use crate::monitor::{Operator, Severity};
    use crate::telemetry::{CorrelationId, MockTraceSink};

    struct FakeConnections {
        records: Vec<ConnectionRecord>,
    }

    impl FakeConnections {
        fn new(statuses: &[(&str, ConnectionStatus)]) -> Arc<Self> {
            let records = statuses
                .iter()
                .map(|(id, status)| {
                    let mut record = ConnectionRecord::new(*id);
                    record.status = *status;
                    record
                })
                .collect();
            Arc::new(Self { records })
        }
    }

    #[async_trait]
    impl ToolBackend for FakeConnections {
        async fn connections(&self) -> Vec<ConnectionRecord> {
            self.records.clone()
        }

        async fn connection(&self, server_id: &str) -> Option<ConnectionRecord> {
            self.records.iter().find(|r| r.server_id == server_id).cloned()
        }

        async fn discover(&self, server_id: &str) -> Result<ConnectionRecord, ConnectionError> {
            Err(ConnectionError::NotConnected(server_id.to_string()))
        }

        async fn execute_tool(
            &self,
            server_id: &str,
            _tool: &str,
            _arguments: Value,
        ) -> Result<ToolCallResult, ConnectionError> {
            Err(ConnectionError::NotConnected(server_id.to_string()))
        }

        async fn ping(&self, server_id: &str) -> Result<Duration, ConnectionError> {
            match self.connection(server_id).await {
                Some(r) if r.is_connected() => Ok(Duration::from_millis(3)),
                _ => Err(ConnectionError::NotConnected(server_id.to_string())),
            }
        }

        fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
            broadcast::channel(1).1
        }
    }

    fn monitor_with(
        statuses: &[(&str, ConnectionStatus)],
        rules: Vec<AlertRule>,
        sink: Option<Arc<dyn TraceSink>>,
    ) -> Arc<Monitor> {
        let settings = MonitorSettings {
            rules: Some(rules),
            ..MonitorSettings::default()
        };
        Monitor::new(
            settings,
            FakeConnections::new(statuses),
            Arc::new(Metrics::new()),
            sink,
        )
    }

    fn sample(server: &str, success: bool, ms: u64) -> ExecutionSample {
        ExecutionSample {
            tool_id: format!("{server}:search"),
            server_id: Some(server.to_string()),
            success,
            duration: Duration::from_millis(ms),
            timestamp: Utc::now(),
        }
    }

    fn error_rate_rule(threshold: f64) -> AlertRule {
        AlertRule::new("errors", "Errors", AlertMetric::ErrorRate, Operator::Gt, threshold)
            .with_severity(Severity::High)
    }

    #[test]
    fn test_defaults_when_unconfigured() {
        let monitor = Monitor::new(
            MonitorSettings::default(),
            FakeConnections::new(&[]),
            Arc::new(Metrics::new()),
            None,
        );
        assert_eq!(monitor.rules(), default_rules());
    }

    #[tokio::test]
    async fn test_gt_fires_only_strictly_above() {
        let monitor = monitor_with(&[], vec![error_rate_rule(20.0)], None);
        for i in 0..5 {
            monitor.track_tool_execution(sample("docs", i != 0, 10)).await;
        }
        // Exactly 20%.
        assert!(monitor.evaluate_rules().await.is_empty());

        monitor.track_tool_execution(sample("docs", false, 10)).await;
        let alerts = monitor.evaluate_rules().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
        assert!((alerts[0].observed - 100.0 * 2.0 / 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_each_breach_creates_an_alert() {
        let monitor = monitor_with(&[], vec![error_rate_rule(0.0)], None);
        let mut rx = monitor.subscribe();
        monitor.track_tool_execution(sample("docs", false, 10)).await;

        let first = monitor.evaluate_rules().await;
        monitor.evaluate_rules().await;
        assert_eq!(monitor.active_alerts().len(), 2);
        assert_eq!(monitor.rule("errors").unwrap().trigger_count, 2);
        assert!(matches!(rx.recv().await.unwrap(), MonitorEvent::AlertTriggered(_)));

        let resolved = monitor.resolve_alert(&first[0].id).unwrap();
        assert!(resolved.resolved_at.is_some());
        assert_eq!(monitor.active_alerts().len(), 1);
        assert_eq!(monitor.rule("errors").unwrap().trigger_count, 2);
        let history = monitor.alert_history();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_active());

        assert_eq!(
            monitor.resolve_alert(&first[0].id),
            Err(MonitorError::AlertNotFound(first[0].id.clone()))
        );
    }

    #[tokio::test]
    async fn test_no_healthy_servers() {
        let rule = default_rules()
            .into_iter()
            .find(|r| r.metric == AlertMetric::HealthyServers)
            .unwrap();
        let down = monitor_with(&[("docs", ConnectionStatus::Failed)], vec![rule.clone()], None);
        let alerts = down.evaluate_rules().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);

        let up = monitor_with(&[("docs", ConnectionStatus::Connected)], vec![rule], None);
        up.check_health().await;
        assert!(up.evaluate_rules().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_rules_are_skipped() {
        let monitor = monitor_with(&[], vec![error_rate_rule(0.0).disabled()], None);
        monitor.track_tool_execution(sample("docs", false, 10)).await;
        assert!(monitor.evaluate_rules().await.is_empty());

        monitor.set_rule_enabled("errors", true).unwrap();
        assert_eq!(monitor.evaluate_rules().await.len(), 1);
    }

    #[tokio::test]
    async fn test_window_excludes_old_samples() {
        let rule = AlertRule::new(
            "slow",
            "Slow",
            AlertMetric::AvgExecutionTime,
            Operator::Gt,
            1_000.0,
        )
        .with_window(Duration::from_secs(60));
        let monitor = monitor_with(&[], vec![rule], None);

        let mut old = sample("docs", true, 60_000);
        old.timestamp = Utc::now() - chrono::Duration::minutes(10);
        monitor.track_tool_execution(old).await;
        monitor.track_tool_execution(sample("docs", true, 20)).await;
        assert!(monitor.evaluate_rules().await.is_empty());

        monitor.track_tool_execution(sample("docs", true, 5_000)).await;
        assert_eq!(monitor.evaluate_rules().await.len(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure_rate() {
        let rule = AlertRule::new(
            "conn",
            "Connection failures",
            AlertMetric::ConnectionFailureRate,
            Operator::Gt,
            50.0,
        );
        let monitor = monitor_with(&[], vec![rule], None);
        monitor.record_connection_attempt(true);
        monitor.record_connection_attempt(false);
        assert!(monitor.evaluate_rules().await.is_empty());
        monitor.record_connection_attempt(false);
        assert_eq!(monitor.evaluate_rules().await.len(), 1);
    }

    #[tokio::test]
    async fn test_histories_are_bounded() {
        let monitor = monitor_with(&[], Vec::new(), None);
        for i in 0..(EXECUTION_HISTORY + 5) {
            monitor.track_tool_execution(sample("docs", i % 2 == 0, 1)).await;
        }
        for _ in 0..(ERROR_HISTORY + 5) {
            monitor
                .track_error(ErrorSample::new("process", Some("docs"), "exited"))
                .await;
        }
        let metrics = monitor.get_metrics().await;
        assert_eq!(metrics.total_executions, EXECUTION_HISTORY);
        assert_eq!(metrics.total_errors, ERROR_HISTORY);
    }

    #[tokio::test]
    async fn test_sink_failures_are_swallowed() {
        let mut sink = MockTraceSink::new();
        sink.expect_record()
            .withf(|e| e.name == "tool:executed" && e.server_id.as_deref() == Some("docs"))
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("collector offline")));
        let monitor = monitor_with(&[], Vec::new(), Some(Arc::new(sink)));

        monitor.track_tool_execution(sample("docs", true, 4)).await;
        assert_eq!(monitor.get_metrics().await.total_executions, 1);
    }

    #[tokio::test]
    async fn test_health_check_uses_recent_executions() {
        let monitor = monitor_with(
            &[
                ("docs", ConnectionStatus::Connected),
                ("web", ConnectionStatus::Failed),
            ],
            Vec::new(),
            None,
        );
        // Older samples fall outside the last twenty.
        for _ in 0..10 {
            monitor.track_tool_execution(sample("docs", true, 10)).await;
        }
        for i in 0..HEALTH_SAMPLE {
            monitor.track_tool_execution(sample("docs", i % 5 < 2, 30)).await;
        }

        let checks = monitor.check_health().await;
        assert_eq!(checks.len(), 2);
        let docs = &checks[0];
        assert!(docs.healthy);
        assert_eq!(docs.response_time_ms, Some(3));
        assert!((docs.success_rate - 0.4).abs() < 1e-9);
        assert_eq!(docs.avg_execution_time, Duration::from_millis(30));

        let web = &checks[1];
        assert!(!web.healthy);
        assert_eq!(web.success_rate, 1.0);

        let status = monitor.get_health_status();
        assert_eq!(status.len(), 2);
        assert_eq!(monitor.get_metrics().await.healthy_servers, 1);
    }

    #[tokio::test]
    async fn test_rule_crud() {
        let monitor = monitor_with(&[], vec![error_rate_rule(10.0)], None);
        assert_eq!(
            monitor.add_rule(error_rate_rule(5.0)),
            Err(MonitorError::DuplicateRule("errors".to_string()))
        );
        let mut bad = error_rate_rule(f64::NAN);
        bad.id = "nan".to_string();
        assert!(matches!(
            monitor.add_rule(bad),
            Err(MonitorError::InvalidRule { .. })
        ));

        monitor.track_tool_execution(sample("docs", false, 1)).await;
        monitor.evaluate_rules().await;
        monitor.update_rule(error_rate_rule(90.0).with_severity(Severity::Low)).unwrap();
        let updated = monitor.rule("errors").unwrap();
        assert_eq!(updated.threshold, 90.0);
        assert_eq!(updated.trigger_count, 1);

        assert!(monitor.remove_rule("errors").is_ok());
        assert!(monitor.rules().is_empty());
        assert!(matches!(
            monitor.set_rule_enabled("errors", false),
            Err(MonitorError::RuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_observes_catalog_executions() {
        let monitor = monitor_with(&[], Vec::new(), None);
        let (processes, _) = broadcast::channel(4);
        let (connections, _) = broadcast::channel(4);
        let (catalog, _) = broadcast::channel(4);
        monitor.observe(processes.subscribe(), connections.subscribe(), catalog.subscribe());

        let result = InvocationResult::failed(
            CorrelationId::new(),
            "docs:search",
            "boom",
            InvocationMetadata {
                server_id: Some("docs".to_string()),
                ..InvocationMetadata::default()
            },
        );
        catalog.send(CatalogEvent::ToolExecuted(result)).unwrap();
        connections
            .send(ConnectionEvent::Failed(ConnectionRecord::new("docs")))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let metrics = monitor.get_metrics().await;
                if metrics.total_executions == 1 && metrics.connections.failures == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("monitor did not observe events");
        assert_eq!(monitor.recent_errors()[0].source, "connection");
        monitor.shutdown();
    }
}
