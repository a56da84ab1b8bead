// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connection manager.
//!
//! One logical session per server id, layered on a supervised process. The
//! manager listens to supervisor events so a crashed process ends its
//! session, and re-establishes sessions on a fixed delay.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use super::backend::ToolBackend;
use super::error::ConnectionError;
use super::types::{
    ConnectionEvent, ConnectionRecord, ConnectionStatus, Resource, Tool, ToolCallResult,
    ToolExecution,
};
use crate::config::{HostConfig, ServerConfig};
use crate::process::{ProcessEvent, ProcessPipes, ProcessRecord, ProcessSupervisor, SupervisorError};
use crate::rpc::{RpcClient, RpcError};
use crate::scheduler::{TaskKey, TaskPurpose, TaskScheduler};

const EVENT_CAPACITY: usize = 256;

struct Session {
    record: ConnectionRecord,
    client: Option<Arc<RpcClient>>,
    /// Process generation whose pipes this session owns.
    generation: Option<u64>,
}

impl Session {
    fn new(id: &str) -> Self {
        Self {
            record: ConnectionRecord::new(id),
            client: None,
            generation: None,
        }
    }
}

/// What a successful handshake and discovery produced.
struct Established {
    client: Arc<RpcClient>,
    generation: u64,
    process: ProcessRecord,
    server_info: crate::rpc::Implementation,
    tools: Vec<Tool>,
    resources: Vec<Resource>,
}

/// Manages protocol sessions with every configured server.
pub struct ConnectionManager {
    config: Arc<HostConfig>,
    supervisor: Arc<ProcessSupervisor>,
    sessions: RwLock<HashMap<String, Session>>,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    scheduler: TaskScheduler,
    events: broadcast::Sender<ConnectionEvent>,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager on top of `supervisor`.
    ///
    /// Must be called within a tokio runtime: the manager spawns a task
    /// that follows supervisor events.
    pub fn new(config: Arc<HostConfig>, supervisor: Arc<ProcessSupervisor>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let process_events = supervisor.subscribe();
        let manager = Arc::new(Self {
            config,
            supervisor,
            sessions: RwLock::new(HashMap::new()),
            locks: std::sync::Mutex::new(HashMap::new()),
            scheduler: TaskScheduler::new(),
            events,
            listener: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(follow_processes(Arc::downgrade(&manager), process_events));
        *manager
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        manager
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Snapshot of one connection, with the current process record.
    pub async fn get(&self, id: &str) -> Option<ConnectionRecord> {
        let mut record = self
            .sessions
            .read()
            .await
            .get(id)
            .map(|s| s.record.clone())?;
        record.process = self.supervisor.get(id).await;
        Some(record)
    }

    /// Snapshots of every known connection, sorted by server id.
    pub async fn all(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.record.clone())
            .collect();
        records.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        for record in &mut records {
            record.process = self.supervisor.get(&record.server_id).await;
        }
        records
    }

    pub async fn is_connected(&self, id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(id)
            .is_some_and(|s| s.record.is_connected())
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    fn emit(&self, event: ConnectionEvent) {
        debug!(server = %event.server_id(), event = event.name(), "Connection event");
        let _ = self.events.send(event);
    }

    /// Move `session` to `to`, publishing the change.
    fn transition(&self, session: &mut Session, to: ConnectionStatus) -> Result<(), ConnectionError> {
        let from = session.record.status;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(ConnectionError::InvalidTransition {
                server: session.record.server_id.clone(),
                from,
                to,
            });
        }
        session.record.status = to;
        self.emit(ConnectionEvent::StatusChanged {
            server_id: session.record.server_id.clone(),
            from,
            to,
        });
        Ok(())
    }

    /// Establish a session with `id`, starting its process if needed.
    ///
    /// Returns the existing record if already connected. Failures other
    /// than configuration errors schedule a reconnect.
    #[instrument(skip(self), fields(server = %id))]
    pub async fn connect(self: &Arc<Self>, id: &str) -> Result<ConnectionRecord, ConnectionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.connect_locked(id).await
    }

    async fn connect_locked(self: &Arc<Self>, id: &str) -> Result<ConnectionRecord, ConnectionError> {
        let server = self.config.server(id)?.clone();
        self.scheduler.cancel(&TaskKey::new(id, TaskPurpose::Reconnect));

        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(id.to_string())
                .or_insert_with(|| Session::new(id));
            if session.record.is_connected() {
                return Ok(session.record.clone());
            }
            self.transition(session, ConnectionStatus::Connecting)?;
        }

        match self.establish(id, &server).await {
            Ok(established) => Ok(self.on_established(id, established).await),
            Err(e) => {
                self.on_connect_failed(id, &e).await;
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        id: &str,
        server: &ServerConfig,
    ) -> Result<Established, ConnectionError> {
        let process = self.supervisor.start(id).await?;
        let pipes = self.acquire_pipes(id).await?;
        let generation = pipes.generation;
        let client = Arc::new(RpcClient::new(
            id,
            pipes.stdin,
            pipes.stdout,
            server.request_timeout(),
        ));

        let discovered = self.handshake(id, server, &client).await;
        match discovered {
            Ok((server_info, tools, resources)) => Ok(Established {
                client,
                generation,
                process,
                server_info,
                tools,
                resources,
            }),
            Err(e) => {
                // The pipes die with this client, so the process is useless.
                drop(client);
                if let Err(stop_err) = self.supervisor.stop(id, true).await {
                    debug!(server = %id, error = %stop_err, "Cleanup stop");
                }
                Err(e)
            }
        }
    }

    async fn acquire_pipes(&self, id: &str) -> Result<ProcessPipes, ConnectionError> {
        match self.supervisor.take_pipes(id).await {
            Ok(pipes) => Ok(pipes),
            Err(SupervisorError::PipesTaken(_)) => {
                warn!(server = %id, "Process pipes already claimed, starting a fresh process");
                if let Err(e) = self.supervisor.stop(id, false).await {
                    debug!(server = %id, error = %e, "Stop before fresh start");
                }
                self.supervisor.start(id).await?;
                Ok(self.supervisor.take_pipes(id).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handshake(
        &self,
        id: &str,
        server: &ServerConfig,
        client: &RpcClient,
    ) -> Result<(crate::rpc::Implementation, Vec<Tool>, Vec<Resource>), ConnectionError> {
        let timeout = server.startup_timeout();
        let handshake_timeout = || ConnectionError::HandshakeTimeout {
            server: id.to_string(),
            timeout_ms: timeout.min(server.request_timeout()).as_millis() as u64,
        };
        let init = match tokio::time::timeout(timeout, client.initialize()).await {
            Ok(Ok(init)) => init,
            Ok(Err(RpcError::Timeout { .. })) | Err(_) => return Err(handshake_timeout()),
            Ok(Err(e)) => return Err(ConnectionError::protocol(id, e)),
        };

        let namespace = server.namespace_for(id);
        let tools = client
            .list_tools()
            .await
            .map_err(|e| ConnectionError::protocol(id, e))?
            .into_iter()
            .filter(|t| server.is_tool_enabled(&t.name))
            .map(|t| Tool::from_descriptor(t, id, namespace))
            .collect::<Vec<_>>();
        let resources = client
            .list_resources()
            .await
            .map_err(|e| ConnectionError::protocol(id, e))?
            .into_iter()
            .map(|r| Resource::from_descriptor(r, id))
            .collect();

        Ok((init.server_info, tools, resources))
    }

    async fn on_established(self: &Arc<Self>, id: &str, established: Established) -> ConnectionRecord {
        let record = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(id.to_string())
                .or_insert_with(|| Session::new(id));
            if let Err(e) = self.transition(session, ConnectionStatus::Connected) {
                warn!(server = %id, error = %e, "Unexpected state after handshake");
                session.record.status = ConnectionStatus::Connected;
            }
            let now = Utc::now();
            session.client = Some(established.client);
            session.generation = Some(established.generation);
            let record = &mut session.record;
            record.process = Some(established.process);
            record.server_info = Some(established.server_info);
            record.tools = established.tools;
            record.resources = established.resources;
            record.connected_at = Some(now);
            record.last_activity = Some(now);
            record.attempts = 0;
            record.last_error = None;
            record.clone()
        };

        info!(
            server = %id,
            tools = record.tools.len(),
            resources = record.resources.len(),
            "Connection established"
        );
        self.schedule_heartbeat(id);
        self.emit(ConnectionEvent::Established(record.clone()));
        record
    }

    async fn on_connect_failed(self: &Arc<Self>, id: &str, error: &ConnectionError) {
        warn!(server = %id, error = %error, "Connection failed");
        let status = if error.is_timeout() {
            ConnectionStatus::Timeout
        } else {
            ConnectionStatus::Failed
        };
        let record = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(id) else {
                return;
            };
            session.client = None;
            session.generation = None;
            session.record.attempts += 1;
            session.record.last_error = Some(error.to_string());
            if let Err(e) = self.transition(session, status) {
                debug!(server = %id, error = %e, "Skipping failure transition");
            }
            session.record.clone()
        };

        self.emit(ConnectionEvent::Failed(record.clone()));
        if !error.is_config_error() {
            self.schedule_reconnect(&record);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, record: &ConnectionRecord) {
        let settings = &self.config.connection;
        if !settings.auto_reconnect {
            return;
        }
        if record.attempts > settings.max_reconnect_attempts {
            warn!(
                server = %record.server_id,
                attempts = record.attempts,
                "Reconnect attempts exhausted"
            );
            self.emit(ConnectionEvent::ReconnectExhausted(record.clone()));
            return;
        }

        debug!(
            server = %record.server_id,
            attempt = record.attempts,
            delay_ms = settings.reconnect_delay_ms,
            "Scheduling reconnect"
        );
        let manager = Arc::downgrade(self);
        let id = record.server_id.clone();
        self.scheduler.schedule_once(
            TaskKey::new(&record.server_id, TaskPurpose::Reconnect),
            settings.reconnect_delay(),
            async move {
                if let Some(manager) = manager.upgrade() {
                    manager.reconnect(&id).await;
                }
            },
        );
    }

    async fn reconnect(self: &Arc<Self>, id: &str) {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(id) else {
                return;
            };
            // Disconnected or already back up in the meantime.
            if !matches!(
                session.record.status,
                ConnectionStatus::Failed | ConnectionStatus::Timeout
            ) || self
                .transition(session, ConnectionStatus::Reconnecting)
                .is_err()
            {
                return;
            }
        }
        info!(server = %id, "Reconnecting");
        if let Err(e) = self.connect_locked(id).await {
            debug!(server = %id, error = %e, "Reconnect attempt failed");
        }
    }

    fn schedule_heartbeat(self: &Arc<Self>, id: &str) {
        let manager = Arc::downgrade(self);
        let server_id = id.to_string();
        self.scheduler.schedule_interval(
            TaskKey::new(id, TaskPurpose::Heartbeat),
            self.config.connection.heartbeat_interval(),
            move || {
                let manager = manager.clone();
                let id = server_id.clone();
                async move {
                    if let Some(manager) = manager.upgrade() {
                        manager.heartbeat(&id).await;
                    }
                }
            },
        );
    }

    /// Confirm the process is alive and answering. Returns whether the
    /// session is healthy.
    async fn heartbeat(self: &Arc<Self>, id: &str) -> bool {
        let Some((client, generation)) = self.live_session(id).await else {
            return false;
        };
        let alive = self.supervisor.is_running(id).await
            && !client.is_closed()
            && client.ping().await.is_ok();
        if alive {
            return true;
        }

        warn!(server = %id, "Heartbeat failed");
        // Losing the session cancels this heartbeat, so it runs detached.
        let manager = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            manager
                .connection_lost(&id, generation, "heartbeat failed")
                .await;
        });
        false
    }

    async fn live_session(&self, id: &str) -> Option<(Arc<RpcClient>, u64)> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(id).filter(|s| s.record.is_connected())?;
        Some((Arc::clone(session.client.as_ref()?), session.generation?))
    }

    /// End a live session whose process (of `generation`) went away.
    async fn connection_lost(self: &Arc<Self>, id: &str, generation: u64, reason: &str) {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let record = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(id) else {
                return;
            };
            if session.generation != Some(generation) || !session.record.is_connected() {
                return;
            }
            session.client = None;
            session.generation = None;
            session.record.attempts += 1;
            session.record.last_error = Some(reason.to_string());
            if self.transition(session, ConnectionStatus::Failed).is_err() {
                return;
            }
            session.record.clone()
        };

        self.scheduler
            .cancel(&TaskKey::new(id, TaskPurpose::Heartbeat));
        warn!(server = %id, reason, "Connection lost");
        self.emit(ConnectionEvent::Lost(record.clone()));
        self.schedule_reconnect(&record);
    }

    /// Tear down the session with `id` and stop its process.
    #[instrument(skip(self), fields(server = %id))]
    pub async fn disconnect(&self, id: &str) -> Result<ConnectionRecord, ConnectionError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        self.scheduler
            .cancel(&TaskKey::new(id, TaskPurpose::Heartbeat));
        self.scheduler
            .cancel(&TaskKey::new(id, TaskPurpose::Reconnect));

        let client = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| ConnectionError::NotConnected(id.to_string()))?;
            session.generation = None;
            session.client.take()
        };
        if let Some(client) = client {
            client.shutdown().await;
        }

        match self.supervisor.stop(id, false).await {
            Ok(_) | Err(SupervisorError::NotRunning(_)) => {}
            Err(e) => warn!(server = %id, error = %e, "Failed to stop process"),
        }

        let record = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| ConnectionError::NotConnected(id.to_string()))?;
            self.transition(session, ConnectionStatus::Disconnected)?;
            session.record.tools.clear();
            session.record.resources.clear();
            session.record.connected_at = None;
            session.record.process = None;
            session.record.clone()
        };

        info!(server = %id, "Disconnected");
        self.emit(ConnectionEvent::Lost(record.clone()));
        Ok(record)
    }

    /// Invoke `tool` on the session with `id`.
    ///
    /// Unknown sessions, unknown tools, invalid arguments and a dead process
    /// are errors. Anything that goes wrong downstream is a failed result.
    #[instrument(skip_all, fields(server = %id, tool = %tool))]
    pub async fn execute_tool(
        &self,
        id: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, ConnectionError> {
        let (client, descriptor) = {
            let sessions = self.sessions.read().await;
            let session = sessions
                .get(id)
                .filter(|s| s.record.is_connected())
                .ok_or_else(|| ConnectionError::NotConnected(id.to_string()))?;
            let descriptor = session
                .record
                .tool(tool)
                .cloned()
                .ok_or_else(|| ConnectionError::UnknownTool {
                    server: id.to_string(),
                    tool: tool.to_string(),
                })?;
            let client = session
                .client
                .clone()
                .ok_or_else(|| ConnectionError::NotConnected(id.to_string()))?;
            (client, descriptor)
        };

        if let Err(issues) = descriptor.schema.validate(&arguments) {
            return Err(self.rejected(
                id,
                tool,
                arguments,
                ConnectionError::InvalidArguments {
                    tool: tool.to_string(),
                    issues,
                },
            ));
        }
        if !self.supervisor.is_running(id).await {
            return Err(self.rejected(
                id,
                tool,
                arguments,
                ConnectionError::ProcessNotRunning(id.to_string()),
            ));
        }

        let started = Instant::now();
        let outcome = client.call_tool(tool, arguments.clone()).await;
        let elapsed = started.elapsed();
        let result = match outcome {
            Ok(reply) if reply.is_error => ToolCallResult {
                success: false,
                error: Some(reply.as_text()),
                content: reply.content,
                duration: elapsed,
            },
            Ok(reply) => ToolCallResult::success(reply.content, elapsed),
            Err(e) => ToolCallResult::failure(e.to_string(), elapsed),
        };
        debug!(success = result.success, elapsed_ms = elapsed.as_millis() as u64, "Tool call finished");

        self.touch(id).await;
        self.emit(ConnectionEvent::ToolExecuted(ToolExecution {
            server_id: id.to_string(),
            tool: tool.to_string(),
            arguments,
            result: result.clone(),
        }));
        Ok(result)
    }

    /// Publish a call that never reached the server.
    fn rejected(&self, id: &str, tool: &str, arguments: Value, error: ConnectionError) -> ConnectionError {
        self.emit(ConnectionEvent::ToolExecuted(ToolExecution {
            server_id: id.to_string(),
            tool: tool.to_string(),
            arguments,
            result: ToolCallResult::failure(error.to_string(), Duration::ZERO),
        }));
        error
    }

    async fn touch(&self, id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.record.last_activity = Some(Utc::now());
        }
    }

    /// Protocol round trip to `id`.
    pub async fn ping(&self, id: &str) -> Result<Duration, ConnectionError> {
        let (client, _) = self
            .live_session(id)
            .await
            .ok_or_else(|| ConnectionError::NotConnected(id.to_string()))?;
        let elapsed = client
            .ping()
            .await
            .map_err(|e| ConnectionError::protocol(id, e))?;
        self.touch(id).await;
        Ok(elapsed)
    }

    /// Re-list tools and resources on a live session.
    pub async fn discover(&self, id: &str) -> Result<ConnectionRecord, ConnectionError> {
        let server = self.config.server(id)?.clone();
        let (client, _) = self
            .live_session(id)
            .await
            .ok_or_else(|| ConnectionError::NotConnected(id.to_string()))?;

        let namespace = server.namespace_for(id);
        let tools: Vec<Tool> = client
            .list_tools()
            .await
            .map_err(|e| ConnectionError::protocol(id, e))?
            .into_iter()
            .filter(|t| server.is_tool_enabled(&t.name))
            .map(|t| Tool::from_descriptor(t, id, namespace))
            .collect();
        let resources: Vec<Resource> = client
            .list_resources()
            .await
            .map_err(|e| ConnectionError::protocol(id, e))?
            .into_iter()
            .map(|r| Resource::from_descriptor(r, id))
            .collect();

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| ConnectionError::NotConnected(id.to_string()))?;
        session.record.tools = tools;
        session.record.resources = resources;
        session.record.last_activity = Some(Utc::now());
        Ok(session.record.clone())
    }

    /// Connect every enabled server concurrently. Results are sorted by id.
    pub async fn connect_all(
        self: &Arc<Self>,
    ) -> Vec<(String, Result<ConnectionRecord, ConnectionError>)> {
        let mut set = JoinSet::new();
        for id in self.config.enabled_servers() {
            let manager = Arc::clone(self);
            set.spawn(async move {
                let result = manager.connect(&id).await;
                (id, result)
            });
        }
        collect_sorted(set).await
    }

    /// Disconnect every known session concurrently. Results are sorted by id.
    pub async fn disconnect_all(
        self: &Arc<Self>,
    ) -> Vec<(String, Result<ConnectionRecord, ConnectionError>)> {
        let ids: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.record.status != ConnectionStatus::Disconnected)
            .map(|s| s.record.server_id.clone())
            .collect();

        let mut set = JoinSet::new();
        for id in ids {
            let manager = Arc::clone(self);
            set.spawn(async move {
                let result = manager.disconnect(&id).await;
                (id, result)
            });
        }
        collect_sorted(set).await
    }

    /// Cancel every timer, stop following the supervisor and disconnect
    /// everything.
    pub async fn shutdown(self: &Arc<Self>) {
        self.scheduler.cancel_all();
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
        for (id, result) in self.disconnect_all().await {
            if let Err(e) = result {
                debug!(server = %id, error = %e, "Disconnect during shutdown");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }
}

async fn collect_sorted<T: 'static>(mut set: JoinSet<(String, T)>) -> Vec<(String, T)> {
    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!(error = %e, "Connection task panicked"),
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

/// End sessions whose process stops or fails underneath them.
async fn follow_processes(
    manager: Weak<ConnectionManager>,
    mut events: broadcast::Receiver<ProcessEvent>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Connection manager lagged behind process events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let reason = match &event {
            ProcessEvent::Failed(_) => "process failed",
            ProcessEvent::Stopped(_) => "process stopped",
            _ => continue,
        };
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let record = event.record().clone();
        tokio::spawn(async move {
            manager
                .connection_lost(&record.server_id, record.generation, reason)
                .await;
        });
    }
}

#[async_trait]
impl ToolBackend for ConnectionManager {
    async fn connections(&self) -> Vec<ConnectionRecord> {
        self.all().await
    }

    async fn connection(&self, server_id: &str) -> Option<ConnectionRecord> {
        self.get(server_id).await
    }

    async fn discover(&self, server_id: &str) -> Result<ConnectionRecord, ConnectionError> {
        ConnectionManager::discover(self, server_id).await
    }

    async fn execute_tool(
        &self,
        server_id: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolCallResult, ConnectionError> {
        ConnectionManager::execute_tool(self, server_id, tool, arguments).await
    }

    async fn ping(&self, server_id: &str) -> Result<Duration, ConnectionError> {
        ConnectionManager::ping(self, server_id).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        ConnectionManager::subscribe(self)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{ConnectionSettings, SupervisorSettings};
    use crate::error::ConfigError;
    use serde_json::json;

    fn shell(script: &str) -> ServerConfig {
        ServerConfig::new("sh").with_args(["-c", script])
    }

    fn manager_with(connection: ConnectionSettings) -> Arc<ConnectionManager> {
        let mut silent = shell("sleep 30");
        silent.request_timeout_sec = 1;
        let mut config = HostConfig::new()
            .with_server("silent", silent)
            .with_server("missing", ServerConfig::new("/nonexistent/toolhost-test-binary"))
            .with_server("off", shell("sleep 30").with_enabled(false));
        config.connection = connection;
        config.supervisor = SupervisorSettings {
            kill_timeout_ms: 300,
            enable_auto_restart: false,
            ..SupervisorSettings::default()
        };
        let config = Arc::new(config);
        let supervisor = ProcessSupervisor::new(Arc::clone(&config));
        ConnectionManager::new(config, supervisor)
    }

    fn no_reconnect() -> ConnectionSettings {
        ConnectionSettings {
            auto_reconnect: false,
            ..ConnectionSettings::default()
        }
    }

    async fn next_event<F>(rx: &mut broadcast::Receiver<ConnectionEvent>, pred: F) -> ConnectionEvent
    where
        F: Fn(&ConnectionEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream ended: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_config_errors_are_not_retried() {
        let manager = manager_with(ConnectionSettings {
            reconnect_delay_ms: 10,
            ..ConnectionSettings::default()
        });

        let err = manager.connect("nope").await.unwrap_err();
        assert!(matches!(err, ConnectionError::Config(ConfigError::UnknownServer(_))));
        let err = manager.connect("off").await.unwrap_err();
        assert!(err.is_config_error());

        assert!(manager.get("nope").await.is_none());
        assert!(manager.scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_failed() {
        let manager = manager_with(no_reconnect());
        let mut rx = manager.subscribe();

        let err = manager.connect("missing").await.unwrap_err();
        assert!(matches!(err, ConnectionError::Process(_)));

        let event = next_event(&mut rx, |e| matches!(e, ConnectionEvent::Failed(_))).await;
        let ConnectionEvent::Failed(record) = event else {
            unreachable!()
        };
        assert_eq!(record.status, ConnectionStatus::Failed);
        assert_eq!(record.attempts, 1);
        assert!(record.last_error.is_some());
        assert!(!manager
            .scheduler
            .is_scheduled(&TaskKey::new("missing", TaskPurpose::Reconnect)));
    }

    #[tokio::test]
    async fn test_reconnect_until_exhausted() {
        let manager = manager_with(ConnectionSettings {
            reconnect_delay_ms: 20,
            max_reconnect_attempts: 2,
            ..ConnectionSettings::default()
        });
        let mut rx = manager.subscribe();

        assert!(manager.connect("missing").await.is_err());
        let event = next_event(&mut rx, |e| matches!(e, ConnectionEvent::ReconnectExhausted(_))).await;
        let ConnectionEvent::ReconnectExhausted(record) = event else {
            unreachable!()
        };
        // Initial attempt plus two reconnects.
        assert_eq!(record.attempts, 3);
        assert_eq!(record.status, ConnectionStatus::Failed);
        assert!(manager.scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_passes_through_reconnecting() {
        let manager = manager_with(ConnectionSettings {
            reconnect_delay_ms: 20,
            max_reconnect_attempts: 1,
            ..ConnectionSettings::default()
        });
        let mut rx = manager.subscribe();

        assert!(manager.connect("missing").await.is_err());
        next_event(&mut rx, |e| {
            matches!(
                e,
                ConnectionEvent::StatusChanged {
                    from: ConnectionStatus::Failed,
                    to: ConnectionStatus::Reconnecting,
                    ..
                }
            )
        })
        .await;
        next_event(&mut rx, |e| {
            matches!(
                e,
                ConnectionEvent::StatusChanged {
                    from: ConnectionStatus::Reconnecting,
                    to: ConnectionStatus::Connecting,
                    ..
                }
            )
        })
        .await;
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let manager = manager_with(no_reconnect());

        let err = manager.connect("silent").await.unwrap_err();
        assert!(err.is_timeout());

        let record = manager.get("silent").await.unwrap();
        assert_eq!(record.status, ConnectionStatus::Timeout);
        assert_eq!(record.attempts, 1);
        // The unresponsive process is not left behind.
        assert!(!manager.supervisor.is_running("silent").await);
    }

    #[tokio::test]
    async fn test_disconnect_after_failure() {
        let manager = manager_with(no_reconnect());
        assert!(manager.connect("missing").await.is_err());

        let record = manager.disconnect("missing").await.unwrap();
        assert_eq!(record.status, ConnectionStatus::Disconnected);

        let err = manager.disconnect("never-seen").await.unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_execute_requires_connection() {
        let manager = manager_with(no_reconnect());
        let err = manager
            .execute_tool("silent", "search", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected(_)));

        let err = manager.ping("silent").await.unwrap_err();
        assert!(matches!(err, ConnectionError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_connect_all_collects_every_outcome() {
        let manager = manager_with(no_reconnect());
        let results = manager.connect_all().await;
        let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["missing", "silent"]);
        assert!(results.iter().all(|(_, r)| r.is_err()));
        manager.shutdown().await;
    }
}
