// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Catalog types.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::{duration_ms, Tool};
use crate::schema::{advanced_example, basic_example, Schema};
use crate::telemetry::CorrelationId;

/// Health tier of a catalog entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolHealth {
    #[default]
    Healthy,
    Degraded,
    Unavailable,
}

impl ToolHealth {
    /// Below this success rate a tool is unhealthy and taken out of service.
    pub const UNHEALTHY_BELOW: f64 = 0.5;
    /// Below this success rate a tool is degraded.
    pub const DEGRADED_BELOW: f64 = 0.8;

    /// Tier for a tool whose connection is (or is not) usable.
    pub fn assess(connection_ok: bool, stats: &UsageStats) -> Self {
        if !connection_ok {
            return Self::Unavailable;
        }
        if stats.execution_count == 0 {
            return Self::Healthy;
        }
        if stats.success_rate < Self::UNHEALTHY_BELOW {
            Self::Unavailable
        } else if stats.success_rate < Self::DEGRADED_BELOW {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    pub fn is_available(&self) -> bool {
        *self != Self::Unavailable
    }
}

impl fmt::Display for ToolHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Rolling usage statistics, updated in constant time per execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub discovered_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub avg_latency_ms: f64,
    /// Between 0.0 and 1.0; 1.0 before the first execution.
    pub success_rate: f64,
}

impl UsageStats {
    pub fn new() -> Self {
        Self {
            discovered_at: Utc::now(),
            last_used: None,
            execution_count: 0,
            avg_latency_ms: 0.0,
            success_rate: 1.0,
        }
    }

    /// Fold one execution into the running means.
    pub fn record(&mut self, latency: Duration, success: bool) {
        let n = self.execution_count as f64;
        let sample = latency.as_secs_f64() * 1000.0;
        let outcome = if success { 1.0 } else { 0.0 };
        self.avg_latency_ms = (self.avg_latency_ms * n + sample) / (n + 1.0);
        self.success_rate = ((self.success_rate * n + outcome) / (n + 1.0)).clamp(0.0, 1.0);
        self.execution_count += 1;
        self.last_used = Some(Utc::now());
    }
}

impl Default for UsageStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample arguments shown with a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExample {
    pub title: String,
    pub arguments: Value,
}

/// The catalog's view of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// `namespace:name`.
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub category: String,
    pub namespace: String,
    pub server_id: String,
    pub input_schema: Value,
    #[serde(skip)]
    pub schema: Schema,
    pub examples: Vec<ToolExample>,
    pub tags: Vec<String>,
    pub stats: UsageStats,
    pub available: bool,
    pub health: ToolHealth,
}

impl CatalogEntry {
    /// Build an entry for `tool` in `category`.
    pub fn from_tool(tool: &Tool, category: String) -> Self {
        let mut examples = vec![ToolExample {
            title: "Basic usage".to_string(),
            arguments: basic_example(&tool.schema),
        }];
        if let Some(arguments) = advanced_example(&tool.schema) {
            examples.push(ToolExample {
                title: "Advanced usage".to_string(),
                arguments,
            });
        }

        let mut tags: BTreeSet<String> = tool
            .metadata
            .as_ref()
            .and_then(|m| m.get("tags"))
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();
        tags.insert(category.to_lowercase());
        tags.insert(tool.namespace.to_lowercase());

        Self {
            id: tool_id(&tool.namespace, &tool.name),
            name: tool.name.clone(),
            display_name: display_name(&tool.name),
            description: tool.description.clone(),
            category,
            namespace: tool.namespace.clone(),
            server_id: tool.server_id.clone(),
            input_schema: tool.input_schema.clone(),
            schema: tool.schema.clone(),
            examples,
            tags: tags.into_iter().collect(),
            stats: UsageStats::new(),
            available: true,
            health: ToolHealth::Healthy,
        }
    }

    /// Set the health tier, keeping availability in step.
    pub(crate) fn set_health(&mut self, health: ToolHealth) -> Option<ToolHealth> {
        self.available = health.is_available();
        if self.health == health {
            return None;
        }
        Some(std::mem::replace(&mut self.health, health))
    }

    fn matches_text(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.display_name.to_lowercase().contains(&query)
            || self.name.to_lowercase().contains(&query)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&query))
            || self.tags.iter().any(|t| t.contains(&query))
    }
}

/// Catalog id of a tool.
pub fn tool_id(namespace: &str, name: &str) -> String {
    format!("{}:{}", namespace, name)
}

/// `search_docs` and `searchDocs` both become `Search Docs`.
pub fn display_name(name: &str) -> String {
    words(name)
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase words of a tool name, split on separators and camel case.
pub(crate) fn words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in name.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Criteria for [`ToolCatalog::get_all`](super::ToolCatalog::get_all).
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogFilter {
    pub namespace: Option<String>,
    pub category: Option<String>,
    pub server_id: Option<String>,
    pub available: Option<bool>,
    pub health: Option<ToolHealth>,
    /// Matches entries carrying any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free text over display name, description and tags.
    pub search: Option<String>,
}

impl CatalogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn server(mut self, server_id: impl Into<String>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    pub fn available(mut self, available: bool) -> Self {
        self.available = Some(available);
        self
    }

    pub fn health(mut self, health: ToolHealth) -> Self {
        self.health = Some(health);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        self.namespace.as_ref().is_none_or(|n| &entry.namespace == n)
            && self.category.as_ref().is_none_or(|c| &entry.category == c)
            && self.server_id.as_ref().is_none_or(|s| &entry.server_id == s)
            && self.available.is_none_or(|a| entry.available == a)
            && self.health.is_none_or(|h| entry.health == h)
            && (self.tags.is_empty()
                || self
                    .tags
                    .iter()
                    .any(|t| entry.tags.iter().any(|et| et.eq_ignore_ascii_case(t))))
            && self.search.as_deref().is_none_or(|q| entry.matches_text(q))
    }
}

/// A request to run a tool through the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Tool id or unambiguous bare tool name.
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    /// Skip the result cache and force a live call.
    #[serde(default)]
    pub bypass_cache: bool,
}

impl InvocationRequest {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            bypass_cache: false,
        }
    }

    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Context recorded with every invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMetadata {
    pub server_id: Option<String>,
    pub namespace: Option<String>,
    pub validation_passed: bool,
    pub cache_hit: bool,
}

/// Outcome of one catalog invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub id: CorrelationId,
    pub tool_id: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    #[serde(with = "duration_ms")]
    pub execution_time: Duration,
    pub timestamp: DateTime<Utc>,
    pub metadata: InvocationMetadata,
}

impl InvocationResult {
    pub(crate) fn failed(
        id: CorrelationId,
        tool_id: impl Into<String>,
        error: impl Into<String>,
        metadata: InvocationMetadata,
    ) -> Self {
        Self {
            id,
            tool_id: tool_id.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            execution_time: Duration::ZERO,
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Events published by the catalog.
#[derive(Debug, Clone)]
pub enum CatalogEvent {
    ToolsRegistered {
        server_id: String,
        tool_ids: Vec<String>,
    },
    ToolsUnavailable {
        server_id: String,
        tool_ids: Vec<String>,
    },
    ToolExecuted(InvocationResult),
    HealthChanged {
        tool_id: String,
        from: ToolHealth,
        to: ToolHealth,
    },
}

impl CatalogEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ToolsRegistered { .. } => "tools:registered",
            Self::ToolsUnavailable { .. } => "tools:unavailable",
            Self::ToolExecuted(_) => "tool:executed",
            Self::HealthChanged { .. } => "health:changed",
        }
    }
}
