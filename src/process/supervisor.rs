// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process supervisor.
//!
//! Owns the OS processes of configured tool servers. Each live process has a
//! waiter task that owns the `Child`, publishes the exit through a `watch`
//! channel and reports it back to the supervisor. Termination requests reach
//! the waiter through a command channel, so no lock is ever held across a
//! wait on the child.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::error::SupervisorError;
use super::types::{ExitState, HealthStatus, ProcessEvent, ProcessPipes, ProcessRecord, ProcessStatus};
use crate::config::{HostConfig, ServerConfig};
use crate::scheduler::{InFlight, TaskKey, TaskPurpose, TaskScheduler};

const EVENT_CAPACITY: usize = 256;

/// Stdout lines held for a process whose pipes have not been taken yet.
/// Further lines are logged and dropped.
pub const STDOUT_BUFFER_LINES: usize = 1024;

/// Requests delivered to a process's waiter task.
#[derive(Debug, Clone, Copy)]
enum ExitCommand {
    Terminate,
    Kill,
}

struct ProcessControl {
    commands: mpsc::UnboundedSender<ExitCommand>,
    exit: watch::Receiver<Option<ExitState>>,
    pipes: Option<ProcessPipes>,
    output: Arc<OutputState>,
}

/// Shared between the stdout reader and the supervisor.
#[derive(Default)]
struct OutputState {
    /// A session owns the pipes; lines are delivered with backpressure.
    claimed: AtomicBool,
    /// The process wrote output or a session took over its startup.
    ready: AtomicBool,
    dropped: AtomicU64,
}

struct Entry {
    record: ProcessRecord,
    control: Option<ProcessControl>,
}

/// Supervises one OS process per configured server.
pub struct ProcessSupervisor {
    config: Arc<HostConfig>,
    entries: RwLock<HashMap<String, Entry>>,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    scheduler: TaskScheduler,
    in_flight: InFlight,
    events: broadcast::Sender<ProcessEvent>,
    generation: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(config: Arc<HostConfig>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            config,
            entries: RwLock::new(HashMap::new()),
            locks: std::sync::Mutex::new(HashMap::new()),
            scheduler: TaskScheduler::new(),
            in_flight: InFlight::new(),
            events,
            generation: AtomicU64::new(0),
        })
    }

    /// Subscribe to supervisor events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }

    /// Snapshot of one process.
    pub async fn get(&self, id: &str) -> Option<ProcessRecord> {
        self.entries.read().await.get(id).map(|e| e.record.clone())
    }

    /// Snapshots of every known process, sorted by server id.
    pub async fn all(&self) -> Vec<ProcessRecord> {
        let mut records: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        records
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.entries
            .read()
            .await
            .get(id)
            .is_some_and(|e| e.record.status == ProcessStatus::Running)
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    fn emit(&self, event: ProcessEvent) {
        debug!(server = %event.server_id(), event = event.name(), "Process event");
        let _ = self.events.send(event);
    }

    /// Start the process for `id`, or return the live record if it is
    /// already starting or running.
    #[instrument(skip(self), fields(server = %id))]
    pub async fn start(self: &Arc<Self>, id: &str) -> Result<ProcessRecord, SupervisorError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.start_locked(id, None).await
    }

    async fn start_locked(
        self: &Arc<Self>,
        id: &str,
        restart_count: Option<u32>,
    ) -> Result<ProcessRecord, SupervisorError> {
        let server = self.config.server(id)?.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get(id) {
                if entry.record.status.is_active() {
                    return Ok(entry.record.clone());
                }
            }
            // An explicit start supersedes a pending automatic restart.
            self.scheduler.cancel(&TaskKey::new(id, TaskPurpose::Restart));
            let entry = entries.entry(id.to_string()).or_insert_with(|| Entry {
                record: ProcessRecord::new(id),
                control: None,
            });
            let record = &mut entry.record;
            record.status = ProcessStatus::Starting;
            record.health = HealthStatus::Unknown;
            record.pid = None;
            record.exit_code = None;
            record.generation = generation;
            if let Some(count) = restart_count {
                record.restart_count = count;
                record.last_restart_at = Some(Utc::now());
            }
            entry.control = None;
        }

        let control = match self.launch(id, &server, generation) {
            Ok(control) => control,
            Err(e) => {
                warn!(server = %id, error = %e, "Process failed to start");
                self.mark_failed(id, generation, &e.to_string()).await;
                return Err(e);
            }
        };

        let record = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(id) else {
                return Err(SupervisorError::NotRunning(id.to_string()));
            };
            // The waiter may already have reported an immediate exit.
            if entry.record.generation != generation
                || entry.record.status != ProcessStatus::Starting
            {
                return Err(SupervisorError::spawn_failed(
                    id,
                    entry
                        .record
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "exited during startup".to_string()),
                ));
            }
            entry.record.status = ProcessStatus::Running;
            entry.record.pid = control.pid;
            entry.record.started_at = Some(Utc::now());
            entry.control = Some(control.inner);
            entry.record.clone()
        };

        info!(server = %id, pid = ?record.pid, generation, "Process started");
        self.emit(ProcessEvent::Started(record.clone()));
        self.schedule_health_check(id);
        self.schedule_startup_deadline(id, generation, server.startup_timeout());
        Ok(record)
    }

    /// Fail the process if it has not signalled readiness by `timeout`.
    ///
    /// Readiness is the first line on stdout, or a session taking the pipes
    /// (the session then enforces its own handshake timeout).
    fn schedule_startup_deadline(self: &Arc<Self>, id: &str, generation: u64, timeout: Duration) {
        let supervisor = Arc::downgrade(self);
        let server_id = id.to_string();
        self.scheduler.schedule_once(
            TaskKey::new(id, TaskPurpose::Startup),
            timeout,
            async move {
                if let Some(supervisor) = supervisor.upgrade() {
                    supervisor.startup_expired(&server_id, generation, timeout).await;
                }
            },
        );
    }

    async fn startup_expired(self: &Arc<Self>, id: &str, generation: u64, timeout: Duration) {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let (record, control) = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            let ready = entry
                .control
                .as_ref()
                .is_none_or(|c| c.output.ready.load(Ordering::SeqCst));
            if entry.record.generation != generation
                || entry.record.status != ProcessStatus::Running
                || ready
            {
                return;
            }
            let error = SupervisorError::StartupTimeout {
                server: id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            };
            entry.record.status = ProcessStatus::Failed;
            entry.record.pid = None;
            entry.record.health = HealthStatus::Unknown;
            entry.record.record_error(error.to_string());
            (entry.record.clone(), entry.control.take())
        };

        self.scheduler
            .cancel(&TaskKey::new(id, TaskPurpose::HealthCheck));
        if let Some(control) = control {
            let _ = control.commands.send(ExitCommand::Kill);
        }
        warn!(server = %id, timeout_ms = timeout.as_millis() as u64, "Process never became ready, killed");
        self.emit(ProcessEvent::Failed(record.clone()));
        self.maybe_schedule_restart(&record);
    }

    fn launch(
        self: &Arc<Self>,
        id: &str,
        server: &ServerConfig,
        generation: u64,
    ) -> Result<Launched, SupervisorError> {
        let mut cmd = Command::new(&server.command);
        cmd.args(&server.args)
            .envs(server.expanded_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &server.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SupervisorError::spawn_failed(id, format!("{}: {}", server.command, e)))?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::spawn_failed(id, "stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::spawn_failed(id, "stdout not captured"))?;

        let output = Arc::new(OutputState::default());
        let (line_tx, line_rx) = mpsc::channel(STDOUT_BUFFER_LINES);
        let server_id = id.to_string();
        let state = Arc::clone(&output);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            while let Some(line) = read_line_lossy(&mut reader, &mut buf, &server_id).await {
                debug!(server = %server_id, "stdout: {}", line);
                state.ready.store(true, Ordering::SeqCst);
                if state.claimed.load(Ordering::SeqCst) {
                    // Err once the session is gone; keep draining for the log.
                    let _ = line_tx.send(line).await;
                } else if let Err(TrySendError::Full(_)) = line_tx.try_send(line) {
                    let dropped = state.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 {
                        warn!(server = %server_id, "Stdout buffer full, dropping lines until a session attaches");
                    }
                }
            }
        });

        if let Some(stderr) = child.stderr.take() {
            let server_id = id.to_string();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                while let Some(line) = read_line_lossy(&mut reader, &mut buf, &server_id).await {
                    warn!(server = %server_id, "stderr: {}", line);
                }
            });
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let supervisor = Arc::downgrade(self);
        let server_id = id.to_string();
        tokio::spawn(async move {
            let exit = wait_child(child, cmd_rx).await;
            let _ = exit_tx.send(Some(exit));
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.on_exit(&server_id, generation, exit).await;
            }
        });

        Ok(Launched {
            pid,
            inner: ProcessControl {
                commands: cmd_tx,
                exit: exit_rx,
                pipes: Some(ProcessPipes {
                    stdin,
                    stdout: line_rx,
                    generation,
                }),
                output,
            },
        })
    }

    async fn mark_failed(&self, id: &str, generation: u64, message: &str) {
        let record = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            if entry.record.generation != generation {
                return;
            }
            entry.control = None;
            entry.record.status = ProcessStatus::Failed;
            entry.record.pid = None;
            entry.record.record_error(message);
            entry.record.clone()
        };
        self.emit(ProcessEvent::Failed(record));
    }

    /// Called by the waiter task when a process exits on its own or as the
    /// result of a stop.
    async fn on_exit(self: &Arc<Self>, id: &str, generation: u64, exit: ExitState) {
        let record = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            // Stops finalize their own records.
            if entry.record.generation != generation || !entry.record.status.is_active() {
                return;
            }
            entry.control = None;
            entry.record.pid = None;
            entry.record.exit_code = exit.code;
            if exit.is_clean() {
                entry.record.status = ProcessStatus::Stopped;
            } else {
                entry.record.status = ProcessStatus::Failed;
                entry
                    .record
                    .record_error(format!("process exited unexpectedly ({})", exit));
            }
            entry.record.clone()
        };

        self.scheduler
            .cancel(&TaskKey::new(id, TaskPurpose::HealthCheck));
        self.scheduler.cancel(&TaskKey::new(id, TaskPurpose::Startup));

        if record.status == ProcessStatus::Stopped {
            info!(server = %id, "Process exited cleanly");
            self.emit(ProcessEvent::Stopped(record));
            return;
        }

        warn!(server = %id, %exit, "Process exited unexpectedly");
        self.emit(ProcessEvent::Failed(record.clone()));
        self.maybe_schedule_restart(&record);
    }

    fn maybe_schedule_restart(self: &Arc<Self>, record: &ProcessRecord) {
        let settings = &self.config.supervisor;
        if !settings.enable_auto_restart {
            return;
        }
        if record.restart_count >= settings.max_restart_attempts {
            warn!(
                server = %record.server_id,
                restarts = record.restart_count,
                "Restart limit reached"
            );
            self.emit(ProcessEvent::RestartLimitReached(record.clone()));
            return;
        }

        let supervisor = Arc::downgrade(self);
        let id = record.server_id.clone();
        self.scheduler.schedule_once(
            TaskKey::new(&record.server_id, TaskPurpose::Restart),
            settings.restart_delay(),
            async move {
                let Some(supervisor) = supervisor.upgrade() else {
                    return;
                };
                if let Err(e) = supervisor.restart_after(&id, Duration::ZERO).await {
                    warn!(server = %id, error = %e, "Automatic restart failed");
                }
            },
        );
    }

    /// Stop the process for `id`.
    ///
    /// Graceful stops send a termination signal and escalate to a kill after
    /// the kill timeout. A clean stop removes the record from the live set.
    #[instrument(skip(self), fields(server = %id))]
    pub async fn stop(&self, id: &str, force: bool) -> Result<ProcessRecord, SupervisorError> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.stop_locked(id, force, false)
            .await
            .ok_or_else(|| SupervisorError::NotRunning(id.to_string()))
    }

    async fn stop_locked(&self, id: &str, force: bool, keep_record: bool) -> Option<ProcessRecord> {
        self.scheduler
            .cancel(&TaskKey::new(id, TaskPurpose::HealthCheck));
        self.scheduler.cancel(&TaskKey::new(id, TaskPurpose::Startup));
        self.scheduler.cancel(&TaskKey::new(id, TaskPurpose::Restart));

        let (commands, mut exit, generation) = {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(id)?;
            match entry.control.as_ref() {
                Some(control) if entry.record.status.is_active() => {
                    entry.record.status = ProcessStatus::Stopping;
                    (
                        control.commands.clone(),
                        control.exit.clone(),
                        entry.record.generation,
                    )
                }
                _ => {
                    // Nothing alive; failed records keep their counters.
                    entry.control = None;
                    return Some(entry.record.clone());
                }
            }
        };

        let _ = commands.send(if force {
            ExitCommand::Kill
        } else {
            ExitCommand::Terminate
        });

        let kill_timeout = self.config.supervisor.kill_timeout();
        let mut escalated = false;
        let state = match wait_exit(&mut exit, kill_timeout).await {
            Some(state) => state,
            None => {
                warn!(server = %id, "Process ignored termination, killing");
                escalated = true;
                let _ = commands.send(ExitCommand::Kill);
                wait_exit(&mut exit, kill_timeout).await.unwrap_or_default()
            }
        };
        // Death by the signal we sent counts as clean.
        let clean = !escalated && state.code.is_none_or(|code| code == 0);

        let record = {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(id)?;
            if entry.record.generation != generation {
                return Some(entry.record.clone());
            }
            entry.control = None;
            entry.record.pid = None;
            entry.record.exit_code = state.code;
            entry.record.health = HealthStatus::Unknown;
            if clean {
                entry.record.status = ProcessStatus::Stopped;
            } else {
                entry.record.status = ProcessStatus::Failed;
                let reason = if escalated {
                    "did not exit within kill timeout".to_string()
                } else {
                    format!("stopped with {}", state)
                };
                entry.record.record_error(reason);
            }
            let record = entry.record.clone();
            if clean && !keep_record {
                entries.remove(id);
            }
            record
        };

        if clean {
            info!(server = %id, "Process stopped");
            self.emit(ProcessEvent::Stopped(record.clone()));
        } else {
            warn!(server = %id, error = ?record.last_error, "Process stop failed");
            self.emit(ProcessEvent::Failed(record.clone()));
        }
        Some(record)
    }

    /// Restart the process: forced stop, restart delay, start.
    ///
    /// Refuses once the restart counter meets the configured maximum.
    #[instrument(skip(self), fields(server = %id))]
    pub async fn restart(self: &Arc<Self>, id: &str) -> Result<ProcessRecord, SupervisorError> {
        self.restart_after(id, self.config.supervisor.restart_delay())
            .await
    }

    async fn restart_after(
        self: &Arc<Self>,
        id: &str,
        delay: Duration,
    ) -> Result<ProcessRecord, SupervisorError> {
        self.config.server(id)?;
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let restarts = self
            .entries
            .read()
            .await
            .get(id)
            .map(|e| e.record.restart_count)
            .unwrap_or(0);
        let max = self.config.supervisor.max_restart_attempts;
        if restarts >= max {
            let record = self
                .get(id)
                .await
                .unwrap_or_else(|| ProcessRecord::new(id));
            warn!(server = %id, restarts, "Restart refused, limit reached");
            self.emit(ProcessEvent::RestartLimitReached(record));
            return Err(SupervisorError::RestartLimitReached {
                server: id.to_string(),
                attempts: restarts,
            });
        }

        self.stop_locked(id, true, true).await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let record = self.start_locked(id, Some(restarts + 1)).await?;
        info!(server = %id, restarts = record.restart_count, "Process restarted");
        self.emit(ProcessEvent::Restarted(record.clone()));
        Ok(record)
    }

    /// Clear the restart counter so automatic restarts resume.
    pub async fn reset_restarts(&self, id: &str) -> bool {
        match self.entries.write().await.get_mut(id) {
            Some(entry) => {
                entry.record.restart_count = 0;
                true
            }
            None => false,
        }
    }

    /// Take the protocol pipes of the running process.
    pub async fn take_pipes(&self, id: &str) -> Result<ProcessPipes, SupervisorError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .filter(|e| e.record.status == ProcessStatus::Running)
            .ok_or_else(|| SupervisorError::NotRunning(id.to_string()))?;
        let control = entry
            .control
            .as_mut()
            .ok_or_else(|| SupervisorError::NotRunning(id.to_string()))?;
        let pipes = control
            .pipes
            .take()
            .ok_or_else(|| SupervisorError::PipesTaken(id.to_string()))?;
        control.output.claimed.store(true, Ordering::SeqCst);
        control.output.ready.store(true, Ordering::SeqCst);
        Ok(pipes)
    }

    /// Stdout lines dropped because nobody had taken the pipes and the
    /// buffer was full.
    pub async fn dropped_stdout_lines(&self, id: &str) -> u64 {
        self.entries
            .read()
            .await
            .get(id)
            .and_then(|e| e.control.as_ref())
            .map_or(0, |c| c.output.dropped.load(Ordering::Relaxed))
    }

    fn schedule_health_check(self: &Arc<Self>, id: &str) {
        let supervisor = Arc::downgrade(self);
        let server_id = id.to_string();
        self.scheduler.schedule_interval(
            TaskKey::new(id, TaskPurpose::HealthCheck),
            self.config.supervisor.health_check_interval(),
            move || {
                let supervisor = supervisor.clone();
                let id = server_id.clone();
                async move {
                    if let Some(supervisor) = supervisor.upgrade() {
                        supervisor.check_health(&id).await;
                    }
                }
            },
        );
    }

    /// Verify the process handle is alive and update its health.
    ///
    /// Returns `None` when the process is not running or a check for it is
    /// already in progress.
    pub async fn check_health(self: &Arc<Self>, id: &str) -> Option<HealthStatus> {
        let _guard = self.in_flight.try_acquire(id)?;

        let (previous, record) = {
            let mut entries = self.entries.write().await;
            let entry = entries.get_mut(id)?;
            if entry.record.status != ProcessStatus::Running {
                return None;
            }
            let alive = entry
                .control
                .as_ref()
                .is_some_and(|c| c.exit.borrow().is_none() && !c.commands.is_closed());
            let previous = entry.record.health;
            entry.record.health = if alive {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            };
            entry.record.last_health_check = Some(Utc::now());
            (previous, entry.record.clone())
        };

        if previous != record.health {
            debug!(server = %id, from = %previous, to = %record.health, "Health changed");
            self.emit(ProcessEvent::HealthChanged {
                record: record.clone(),
                previous,
            });
            if record.health == HealthStatus::Unhealthy {
                self.maybe_schedule_restart(&record);
            }
        }
        Some(record.health)
    }

    /// Stop every process with the configured grace period.
    pub async fn stop_all(self: &Arc<Self>) {
        self.shutdown(self.config.supervisor.shutdown_grace()).await;
    }

    /// Cancel all timers and stop every process concurrently. Processes
    /// still alive after `grace` are killed.
    pub async fn shutdown(self: &Arc<Self>, grace: Duration) {
        self.scheduler.cancel_all();

        let ids: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.control.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "Stopping all processes");

        let mut stops = JoinSet::new();
        for id in ids {
            let supervisor = Arc::clone(self);
            stops.spawn(async move {
                if let Err(e) = supervisor.stop(&id, false).await {
                    debug!(server = %id, error = %e, "Stop during shutdown");
                }
            });
        }

        let drained = tokio::time::timeout(grace, async {
            while stops.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown grace period elapsed, killing remaining processes");
            stops.abort_all();
            for entry in self.entries.read().await.values() {
                if let Some(control) = &entry.control {
                    let _ = control.commands.send(ExitCommand::Kill);
                }
            }
        }
    }
}

struct Launched {
    pid: Option<u32>,
    inner: ProcessControl,
}

/// Own the child until it exits, acting on termination requests.
async fn wait_child(mut child: Child, mut commands: mpsc::UnboundedReceiver<ExitCommand>) -> ExitState {
    loop {
        let command = tokio::select! {
            status = child.wait() => return ExitState::from_status(status),
            command = commands.recv() => command,
        };
        match command {
            Some(ExitCommand::Terminate) => request_termination(&mut child),
            Some(ExitCommand::Kill) => {
                let _ = child.start_kill();
            }
            None => {
                // Supervisor dropped.
                let _ = child.start_kill();
                return ExitState::from_status(child.wait().await);
            }
        }
    }
}

/// Read one line, replacing invalid UTF-8. `None` at end of output.
async fn read_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>, server_id: &str) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => {
            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }
            let line = String::from_utf8_lossy(buf);
            if matches!(line, std::borrow::Cow::Owned(_)) {
                debug!(server = %server_id, "Replaced invalid UTF-8 in process output");
            }
            Some(line.into_owned())
        }
        Err(e) => {
            warn!(server = %server_id, error = %e, "Failed to read process output");
            None
        }
    }
}

async fn wait_exit(exit: &mut watch::Receiver<Option<ExitState>>, limit: Duration) -> Option<ExitState> {
    match tokio::time::timeout(limit, exit.wait_for(|state| state.is_some())).await {
        Ok(Ok(state)) => *state,
        Ok(Err(_)) => Some(ExitState::default()),
        Err(_) => None,
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM failed, killing");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::SupervisorSettings;
    use tokio::io::AsyncWriteExt;

    fn shell(script: &str) -> ServerConfig {
        ServerConfig::new("sh").with_args(["-c", script])
    }

    fn with_startup_timeout(mut server: ServerConfig, secs: u64) -> ServerConfig {
        server.startup_timeout_sec = secs;
        server
    }

    fn supervisor_with(settings: SupervisorSettings) -> Arc<ProcessSupervisor> {
        let mut config = HostConfig::new()
            .with_server("sleeper", shell("sleep 30"))
            .with_server("crasher", shell("sleep 0.1; exit 3"))
            .with_server("quitter", shell("exit 0"))
            .with_server("stubborn", shell("trap '' TERM; exec sleep 30"))
            .with_server("echo", ServerConfig::new("cat"))
            .with_server("missing", ServerConfig::new("/nonexistent/toolhost-test-binary"))
            .with_server("off", shell("sleep 30").with_enabled(false))
            .with_server("chatty", ServerConfig::new("yes"))
            .with_server("garbled", shell("printf 'a\\377b\\nsecond\\n'; exec sleep 30"))
            .with_server("unready", with_startup_timeout(shell("exec sleep 30"), 0))
            .with_server("talker", with_startup_timeout(shell("echo ready; exec sleep 30"), 1));
        config.supervisor = settings;
        ProcessSupervisor::new(Arc::new(config))
    }

    fn test_settings() -> SupervisorSettings {
        SupervisorSettings {
            kill_timeout_ms: 300,
            restart_delay_ms: 50,
            max_restart_attempts: 2,
            health_check_interval_ms: 50,
            enable_auto_restart: false,
            shutdown_grace_ms: 2_000,
        }
    }

    async fn next_event<F>(rx: &mut broadcast::Receiver<ProcessEvent>, pred: F) -> ProcessEvent
    where
        F: Fn(&ProcessEvent) -> bool,
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
    async fn test_start_and_stop() {
        let supervisor = supervisor_with(test_settings());
        let mut events = supervisor.subscribe();

        let record = supervisor.start("sleeper").await.unwrap();
        assert_eq!(record.status, ProcessStatus::Running);
        assert!(record.pid.is_some());
        assert!(supervisor.is_running("sleeper").await);
        next_event(&mut events, |e| matches!(e, ProcessEvent::Started(_))).await;

        let again = supervisor.start("sleeper").await.unwrap();
        assert_eq!(again.pid, record.pid);
        assert_eq!(again.generation, record.generation);

        let stopped = supervisor.stop("sleeper", false).await.unwrap();
        assert_eq!(stopped.status, ProcessStatus::Stopped);
        assert!(supervisor.get("sleeper").await.is_none());
        next_event(&mut events, |e| matches!(e, ProcessEvent::Stopped(_))).await;
    }

    #[tokio::test]
    async fn test_config_errors() {
        let supervisor = supervisor_with(test_settings());
        let err = supervisor.start("nope").await.unwrap_err();
        assert!(err.is_config_error());
        let err = supervisor.start("off").await.unwrap_err();
        assert!(err.is_config_error());
        assert!(supervisor.get("off").await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_recorded() {
        let supervisor = supervisor_with(test_settings());
        let err = supervisor.start("missing").await.unwrap_err();
        assert!(matches!(err, SupervisorError::SpawnFailed { .. }));

        let record = supervisor.get("missing").await.unwrap();
        assert_eq!(record.status, ProcessStatus::Failed);
        assert_eq!(record.error_count, 1);
        assert!(record.last_error.is_some());
    }

    #[tokio::test]
    async fn test_restart_limit() {
        let supervisor = supervisor_with(SupervisorSettings {
            enable_auto_restart: true,
            ..test_settings()
        });
        let mut events = supervisor.subscribe();

        supervisor.start("crasher").await.unwrap();
        let limit = next_event(&mut events, |e| {
            matches!(e, ProcessEvent::RestartLimitReached(_))
        })
        .await;
        assert_eq!(limit.record().restart_count, 2);

        let record = supervisor.get("crasher").await.unwrap();
        assert_eq!(record.status, ProcessStatus::Failed);
        assert_eq!(record.restart_count, 2);
        assert_eq!(record.error_count, 3);
        assert_eq!(record.exit_code, Some(3));

        let err = supervisor.restart("crasher").await.unwrap_err();
        assert!(matches!(err, SupervisorError::RestartLimitReached { attempts: 2, .. }));

        assert!(supervisor.reset_restarts("crasher").await);
        assert_eq!(supervisor.get("crasher").await.unwrap().restart_count, 0);
    }

    #[tokio::test]
    async fn test_manual_restart_counts() {
        let supervisor = supervisor_with(test_settings());
        let first = supervisor.start("sleeper").await.unwrap();
        let restarted = supervisor.restart("sleeper").await.unwrap();

        assert_eq!(restarted.restart_count, 1);
        assert!(restarted.last_restart_at.is_some());
        assert_eq!(restarted.status, ProcessStatus::Running);
        assert!(restarted.generation > first.generation);
        assert_ne!(restarted.pid, first.pid);

        supervisor.stop("sleeper", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let supervisor = supervisor_with(test_settings());
        supervisor.start("stubborn").await.unwrap();
        // Let the shell install its trap before signalling.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let record = supervisor.stop("stubborn", false).await.unwrap();
        assert_eq!(record.status, ProcessStatus::Failed);
        assert_eq!(record.error_count, 1);
        assert!(supervisor.get("stubborn").await.is_some());
    }

    #[tokio::test]
    async fn test_clean_exit_is_stopped() {
        let supervisor = supervisor_with(SupervisorSettings {
            enable_auto_restart: true,
            ..test_settings()
        });
        let mut events = supervisor.subscribe();

        // May exit before start returns; either way no restart follows.
        let _ = supervisor.start("quitter").await;
        next_event(&mut events, |e| {
            matches!(e, ProcessEvent::Stopped(_) | ProcessEvent::Failed(_))
        })
        .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        let record = supervisor.get("quitter").await.unwrap();
        assert_eq!(record.restart_count, 0);
        assert!(!record.status.is_active());
    }

    #[tokio::test]
    async fn test_take_pipes_once() {
        let supervisor = supervisor_with(test_settings());
        supervisor.start("echo").await.unwrap();

        let mut pipes = supervisor.take_pipes("echo").await.unwrap();
        assert!(matches!(
            supervisor.take_pipes("echo").await,
            Err(SupervisorError::PipesTaken(_))
        ));

        pipes.stdin.write_all(b"hello\n").await.unwrap();
        pipes.stdin.flush().await.unwrap();
        let line = tokio::time::timeout(Duration::from_secs(2), pipes.stdout.recv())
            .await
            .unwrap();
        assert_eq!(line.as_deref(), Some("hello"));

        supervisor.stop("echo", false).await.unwrap();
        assert!(matches!(
            supervisor.take_pipes("echo").await,
            Err(SupervisorError::NotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check_marks_healthy() {
        let supervisor = supervisor_with(test_settings());
        let mut events = supervisor.subscribe();
        supervisor.start("sleeper").await.unwrap();

        let event = next_event(&mut events, |e| matches!(e, ProcessEvent::HealthChanged { .. })).await;
        assert_eq!(event.record().health, HealthStatus::Healthy);

        let record = supervisor.get("sleeper").await.unwrap();
        assert!(record.last_health_check.is_some());
        supervisor.stop("sleeper", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything() {
        let supervisor = supervisor_with(test_settings());
        supervisor.start("sleeper").await.unwrap();
        supervisor.start("echo").await.unwrap();

        supervisor.shutdown(Duration::from_secs(2)).await;
        assert!(!supervisor.is_running("sleeper").await);
        assert!(!supervisor.is_running("echo").await);
    }

    #[tokio::test]
    async fn test_concurrent_starts_share_one_process() {
        let supervisor = supervisor_with(test_settings());
        let mut events = supervisor.subscribe();

        let (a, b) = tokio::join!(supervisor.start("sleeper"), supervisor.start("sleeper"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.pid, b.pid);
        assert_eq!(a.generation, b.generation);

        next_event(&mut events, |e| matches!(e, ProcessEvent::Started(_))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, ProcessEvent::Started(_)), "second spawn: {event:?}");
        }
        supervisor.stop("sleeper", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_unclaimed_stdout_is_bounded() {
        let supervisor = supervisor_with(test_settings());
        supervisor.start("chatty").await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(supervisor.dropped_stdout_lines("chatty").await > 0);

        let mut pipes = supervisor.take_pipes("chatty").await.unwrap();
        let mut buffered = 0;
        while pipes.stdout.try_recv().is_ok() {
            buffered += 1;
        }
        assert!(buffered > 0);
        assert!(buffered <= STDOUT_BUFFER_LINES, "{buffered} lines buffered");

        supervisor.stop("chatty", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_flowing() {
        let supervisor = supervisor_with(test_settings());
        supervisor.start("garbled").await.unwrap();
        let mut pipes = supervisor.take_pipes("garbled").await.unwrap();

        let mut lines = Vec::new();
        for _ in 0..2 {
            let line = tokio::time::timeout(Duration::from_secs(2), pipes.stdout.recv())
                .await
                .unwrap()
                .unwrap();
            lines.push(line);
        }
        assert_eq!(lines, vec!["a\u{FFFD}b".to_string(), "second".to_string()]);

        supervisor.stop("garbled", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_timeout_kills_silent_process() {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let supervisor = supervisor_with(test_settings());
        let mut events = supervisor.subscribe();

        let record = supervisor.start("unready").await.unwrap();
        assert_eq!(record.status, ProcessStatus::Running);
        let pid = Pid::from_raw(record.pid.unwrap() as i32);

        let failed = next_event(&mut events, |e| matches!(e, ProcessEvent::Failed(_))).await;
        assert!(failed
            .record()
            .last_error
            .as_deref()
            .unwrap()
            .contains("did not start within"));

        let record = supervisor.get("unready").await.unwrap();
        assert_eq!(record.status, ProcessStatus::Failed);
        assert_eq!(record.error_count, 1);
        assert!(record.pid.is_none());
        assert!(!supervisor.is_running("unready").await);

        // The child is killed and reaped.
        tokio::time::timeout(Duration::from_secs(2), async {
            while kill(pid, None).is_ok() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("process still alive");
    }

    #[tokio::test]
    async fn test_output_counts_as_ready() {
        let supervisor = supervisor_with(test_settings());
        let mut events = supervisor.subscribe();
        supervisor.start("talker").await.unwrap();

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(supervisor.is_running("talker").await);
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, ProcessEvent::Failed(_)), "{event:?}");
        }
        supervisor.stop("talker", true).await.unwrap();
    }
}
