// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The tool catalog.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, Weak};

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::cache::{cache_key, ResultCache};
use super::types::{
    words, CatalogEntry, CatalogEvent, CatalogFilter, InvocationMetadata, InvocationRequest,
    InvocationResult, ToolHealth, UsageStats,
};
use crate::config::{HostConfig, ServerConfig};
use crate::connection::{ConnectionError, ConnectionEvent, ConnectionRecord, Tool, ToolBackend};
use crate::error::HostError;
use crate::process::ProcessStatus;
use crate::scheduler::{TaskKey, TaskPurpose, TaskScheduler};
use crate::telemetry::{CorrelationId, InvocationSpan, Metrics};

const EVENT_CAPACITY: usize = 256;
const HEALTH_TASK_ID: &str = "catalog";

/// Name stems per inferred category, checked in order.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "mutation",
        &["create", "update", "delete", "write", "insert", "remove", "set", "put", "modify"],
    ),
    ("search", &["search", "find", "query", "lookup", "grep"]),
    ("analysis", &["analyze", "analyse", "summarize", "classify", "inspect", "evaluate", "score"]),
    ("data", &["get", "list", "fetch", "read", "load", "export"]),
    ("utility", &["echo", "format", "convert", "parse", "time", "ping", "hash", "calc", "validate"]),
];

/// Category of `tool`: its own metadata, then the server's override, then
/// keywords in its name.
pub fn infer_category(tool: &Tool, server: Option<&ServerConfig>) -> String {
    if let Some(category) = tool.metadata_str("category") {
        return category.to_lowercase();
    }
    if let Some(category) = server.and_then(|s| s.tool_categories.get(&tool.name)) {
        return category.to_lowercase();
    }
    let words = words(&tool.name);
    for (category, stems) in CATEGORY_KEYWORDS {
        let hit = words.iter().any(|w| {
            stems
                .iter()
                .any(|s| w == s || (s.len() >= 5 && w.starts_with(&s[..s.len() - 1])))
        });
        if hit {
            return category.to_string();
        }
    }
    "general".to_string()
}

fn connection_usable(record: &ConnectionRecord) -> bool {
    record.is_connected()
        && record
            .process
            .as_ref()
            .is_some_and(|p| p.status == ProcessStatus::Running)
}

/// Aggregated, cached, health-annotated view of every discovered tool.
pub struct ToolCatalog {
    config: Arc<HostConfig>,
    backend: Arc<dyn ToolBackend>,
    metrics: Arc<Metrics>,
    entries: RwLock<BTreeMap<String, CatalogEntry>>,
    history: RwLock<HashMap<String, VecDeque<InvocationResult>>>,
    cache: std::sync::Mutex<ResultCache>,
    scheduler: TaskScheduler,
    events: broadcast::Sender<CatalogEvent>,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ToolCatalog {
    pub fn new(
        config: Arc<HostConfig>,
        backend: Arc<dyn ToolBackend>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cache = ResultCache::new(config.catalog.cache_ttl(), config.catalog.cache_capacity);
        Arc::new(Self {
            config,
            backend,
            metrics,
            entries: RwLock::new(BTreeMap::new()),
            history: RwLock::new(HashMap::new()),
            cache: std::sync::Mutex::new(cache),
            scheduler: TaskScheduler::new(),
            events,
            listener: std::sync::Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: CatalogEvent) {
        debug!(event = event.name(), "Catalog event");
        let _ = self.events.send(event);
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, ResultCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Discover tools on every connection, start following connection
    /// events and start the health rollup. Returns the number of entries.
    #[instrument(skip(self))]
    pub async fn initialize(self: &Arc<Self>) -> usize {
        // Subscribe before the snapshot; changes during discovery replay after it.
        let events = self.backend.subscribe();
        for record in self.backend.connections().await {
            let record = if record.is_connected() {
                match self.backend.discover(&record.server_id).await {
                    Ok(mut fresh) => {
                        fresh.process = record.process.clone();
                        fresh
                    }
                    Err(e) => {
                        warn!(server = %record.server_id, error = %e, "Discovery failed");
                        record
                    }
                }
            } else {
                record
            };
            self.register_server(&record).await;
        }

        self.follow_connections(events);
        self.schedule_health_refresh();

        let count = self.entries.read().await.len();
        info!(tools = count, "Catalog initialized");
        count
    }

    fn follow_connections(self: &Arc<Self>, events: broadcast::Receiver<ConnectionEvent>) {
        let handle = tokio::spawn(follow_connections(Arc::downgrade(self), events));
        let previous = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn schedule_health_refresh(self: &Arc<Self>) {
        let catalog = Arc::downgrade(self);
        self.scheduler.schedule_interval(
            TaskKey::new(HEALTH_TASK_ID, TaskPurpose::HealthCheck),
            self.config.catalog.health_check_interval(),
            move || {
                let catalog = catalog.clone();
                async move {
                    if let Some(catalog) = catalog.upgrade() {
                        catalog.refresh_health().await;
                    }
                }
            },
        );
    }

    /// Replace the entries of `record.server_id` with its current tools.
    /// Usage statistics of tools that were already known carry over.
    pub async fn register_server(&self, record: &ConnectionRecord) {
        let server = self.config.server(&record.server_id).ok();
        let connection_ok = connection_usable(record);
        let fresh: Vec<CatalogEntry> = record
            .tools
            .iter()
            .map(|tool| CatalogEntry::from_tool(tool, infer_category(tool, server)))
            .collect();
        let fresh_ids: HashSet<&str> = fresh.iter().map(|e| e.id.as_str()).collect();

        let mut ids = Vec::with_capacity(fresh.len());
        let mut changes = Vec::new();
        {
            let mut entries = self.entries.write().await;
            entries.retain(|id, e| e.server_id != record.server_id || fresh_ids.contains(id.as_str()));
            for mut entry in fresh.iter().cloned() {
                if let Some(previous) = entries.get(&entry.id) {
                    entry.stats = previous.stats.clone();
                    entry.health = previous.health;
                }
                let health = ToolHealth::assess(connection_ok, &entry.stats);
                if let Some(from) = entry.set_health(health) {
                    changes.push((entry.id.clone(), from, health));
                }
                ids.push(entry.id.clone());
                entries.insert(entry.id.clone(), entry);
            }
        }

        info!(server = %record.server_id, tools = ids.len(), "Tools registered");
        self.emit(CatalogEvent::ToolsRegistered {
            server_id: record.server_id.clone(),
            tool_ids: ids,
        });
        self.publish_health_changes(changes);
    }

    /// Take every entry of `server_id` out of service, keeping it listed.
    pub async fn mark_unavailable(&self, server_id: &str) {
        let mut ids = Vec::new();
        let mut changes = Vec::new();
        {
            let mut entries = self.entries.write().await;
            for entry in entries.values_mut().filter(|e| e.server_id == server_id) {
                if let Some(from) = entry.set_health(ToolHealth::Unavailable) {
                    changes.push((entry.id.clone(), from, ToolHealth::Unavailable));
                }
                ids.push(entry.id.clone());
            }
        }
        if ids.is_empty() {
            return;
        }

        warn!(server = %server_id, tools = ids.len(), "Tools unavailable");
        self.emit(CatalogEvent::ToolsUnavailable {
            server_id: server_id.to_string(),
            tool_ids: ids,
        });
        self.publish_health_changes(changes);
    }

    fn publish_health_changes(&self, changes: Vec<(String, ToolHealth, ToolHealth)>) {
        for (tool_id, from, to) in changes {
            info!(tool = %tool_id, %from, %to, "Tool health changed");
            self.emit(CatalogEvent::HealthChanged { tool_id, from, to });
        }
    }

    /// Recompute every entry's health from its connection and success
    /// rate. Returns the number of entries whose tier changed.
    pub async fn refresh_health(&self) -> usize {
        let usable: HashMap<String, bool> = self
            .backend
            .connections()
            .await
            .iter()
            .map(|r| (r.server_id.clone(), connection_usable(r)))
            .collect();

        let mut changes = Vec::new();
        {
            let mut entries = self.entries.write().await;
            for entry in entries.values_mut() {
                let ok = usable.get(&entry.server_id).copied().unwrap_or(false);
                let health = ToolHealth::assess(ok, &entry.stats);
                if let Some(from) = entry.set_health(health) {
                    changes.push((entry.id.clone(), from, health));
                }
            }
        }
        let purged = self.cache().purge_expired();
        if purged > 0 {
            debug!(purged, "Expired cached results");
        }

        let changed = changes.len();
        self.publish_health_changes(changes);
        changed
    }

    /// Entries matching `filter`, available first, then by display name.
    pub async fn get_all(&self, filter: &CatalogFilter) -> Vec<CatalogEntry> {
        let mut matched: Vec<CatalogEntry> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.available
                .cmp(&a.available)
                .then_with(|| a.display_name.cmp(&b.display_name))
                .then_with(|| a.id.cmp(&b.id))
        });
        matched
    }

    pub async fn get_tool(&self, id: &str) -> Option<CatalogEntry> {
        self.entries.read().await.get(id).cloned()
    }

    /// Look up an entry by id, or by a bare tool name that only one
    /// namespace provides.
    pub async fn resolve(&self, id_or_name: &str) -> Result<CatalogEntry, HostError> {
        let entries = self.entries.read().await;
        if let Some(entry) = entries.get(id_or_name) {
            return Ok(entry.clone());
        }
        let mut matches = entries.values().filter(|e| e.name == id_or_name);
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Ok(entry.clone()),
            (None, _) => Err(HostError::ToolNotFound(id_or_name.to_string())),
            (Some(_), Some(_)) => Err(HostError::AmbiguousTool {
                name: id_or_name.to_string(),
                candidates: entries
                    .values()
                    .filter(|e| e.name == id_or_name)
                    .map(|e| e.id.clone())
                    .collect(),
            }),
        }
    }

    /// Recent invocations of `tool_id`, oldest first.
    pub async fn history(&self, tool_id: &str) -> Vec<InvocationResult> {
        self.history
            .read()
            .await
            .get(tool_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget usage statistics and history of `tool_id`, restoring its
    /// health from the connection alone.
    pub async fn reset_stats(&self, tool_id: &str) -> bool {
        let Some(server_id) = self.get_tool(tool_id).await.map(|e| e.server_id) else {
            return false;
        };
        let ok = self
            .backend
            .connection(&server_id)
            .await
            .is_some_and(|r| connection_usable(&r));

        let change = {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(tool_id) else {
                return false;
            };
            let discovered_at = entry.stats.discovered_at;
            entry.stats = UsageStats {
                discovered_at,
                ..UsageStats::new()
            };
            let health = ToolHealth::assess(ok, &entry.stats);
            entry.set_health(health).map(|from| (tool_id.to_string(), from, health))
        };
        self.history.write().await.remove(tool_id);
        self.publish_health_changes(change.into_iter().collect());
        true
    }

    pub fn clear_cache(&self) {
        self.cache().clear();
    }

    pub fn cached_results(&self) -> usize {
        self.cache().len()
    }

    /// Run a tool. Every failure comes back as an unsuccessful result.
    #[instrument(skip_all, fields(tool = %request.tool))]
    pub async fn execute(&self, request: InvocationRequest) -> InvocationResult {
        let id = CorrelationId::new();
        let entry = match self.resolve(&request.tool).await {
            Ok(entry) => entry,
            Err(e) => {
                let result = InvocationResult::failed(
                    id,
                    &request.tool,
                    e.to_string(),
                    InvocationMetadata::default(),
                );
                self.emit(CatalogEvent::ToolExecuted(result.clone()));
                return result;
            }
        };

        let mut metadata = InvocationMetadata {
            server_id: Some(entry.server_id.clone()),
            namespace: Some(entry.namespace.clone()),
            validation_passed: false,
            cache_hit: false,
        };

        if !entry.available {
            let message = format!("Tool '{}' is unavailable", entry.id);
            return self.finish(InvocationResult::failed(id, &entry.id, message, metadata)).await;
        }

        if let Err(issues) = entry.schema.validate(&request.arguments) {
            let message = ConnectionError::InvalidArguments {
                tool: entry.id.clone(),
                issues,
            }
            .to_string();
            return self.finish(InvocationResult::failed(id, &entry.id, message, metadata)).await;
        }
        metadata.validation_passed = true;

        let cacheable = !request.bypass_cache && self.config.catalog.is_cacheable(&entry.category);
        let key = cache_key(&entry.id, &request.arguments);
        let cached = if cacheable { self.cache().get(&key) } else { None };
        if let Some(mut hit) = cached {
            debug!(tool = %entry.id, "Serving cached result");
            hit.id = id;
            hit.timestamp = Utc::now();
            hit.metadata.cache_hit = true;
            return self.finish(hit).await;
        }

        let span = InvocationSpan::start(&entry.id, id);
        #[cfg(feature = "telemetry")]
        let span = span.with_metrics(Arc::clone(&self.metrics));
        span.record_cache_hit(false);

        let outcome = self
            .backend
            .execute_tool(&entry.server_id, &entry.name, request.arguments)
            .await;
        let (success, payload, error, elapsed) = match outcome {
            Ok(call) => {
                let payload = call.success.then(|| call.payload());
                (call.success, payload, call.error, call.duration)
            }
            Err(e) => {
                metadata.validation_passed = !matches!(e, ConnectionError::InvalidArguments { .. });
                (false, None, Some(e.to_string()), span.elapsed())
            }
        };
        span.finish(success);

        let result = InvocationResult {
            id,
            tool_id: entry.id.clone(),
            success,
            result: payload,
            error,
            execution_time: elapsed,
            timestamp: Utc::now(),
            metadata,
        };

        if let Some(current) = self.entries.write().await.get_mut(&entry.id) {
            current.stats.record(elapsed, success);
        }
        if success && cacheable {
            self.cache().insert(key, result.clone());
        }
        self.finish(result).await
    }

    /// Append to history and publish.
    async fn finish(&self, result: InvocationResult) -> InvocationResult {
        if !result.success {
            debug!(tool = %result.tool_id, error = ?result.error, "Invocation failed");
        }
        {
            let limit = self.config.catalog.history_limit;
            let mut history = self.history.write().await;
            let entries = history.entry(result.tool_id.clone()).or_default();
            entries.push_back(result.clone());
            while entries.len() > limit {
                entries.pop_front();
            }
        }
        self.emit(CatalogEvent::ToolExecuted(result.clone()));
        result
    }

    /// Stop background work.
    pub fn shutdown(&self) {
        self.scheduler.cancel_all();
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

impl Drop for ToolCatalog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn follow_connections(catalog: Weak<ToolCatalog>, mut events: broadcast::Receiver<ConnectionEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Catalog lagged behind connection events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(catalog) = catalog.upgrade() else {
            break;
        };
        match event {
            ConnectionEvent::Established(record) => catalog.register_server(&record).await,
            ConnectionEvent::Lost(record)
            | ConnectionEvent::Failed(record)
            | ConnectionEvent::ReconnectExhausted(record) => {
                catalog.mark_unavailable(&record.server_id).await
            }
            _ => {}
        }
    }
}
