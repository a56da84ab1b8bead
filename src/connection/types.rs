// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connection types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::process::ProcessRecord;
use crate::rpc::{ContentBlock, Implementation, ResourceDescriptor, ToolDescriptor};
use crate::schema::Schema;

/// Status of the logical session with a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Timeout,
}

impl ConnectionStatus {
    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(&self, to: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Connecting, Connected | Failed | Timeout | Disconnected)
                | (Connected, Disconnected | Failed | Reconnecting)
                | (Failed, Connecting | Reconnecting | Disconnected)
                | (Timeout, Connecting | Reconnecting | Disconnected)
                | (Reconnecting, Connecting | Disconnected)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// A discovered capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: Option<String>,
    /// Input schema as advertised.
    pub input_schema: Value,
    /// Parsed input schema used for validation.
    pub schema: Schema,
    pub namespace: String,
    pub server_id: String,
    pub metadata: Option<Value>,
}

impl Tool {
    pub fn from_descriptor(descriptor: ToolDescriptor, server_id: &str, namespace: &str) -> Self {
        let schema = Schema::from_json_schema(&descriptor.input_schema);
        Self {
            name: descriptor.name,
            description: descriptor.description,
            input_schema: descriptor.input_schema,
            schema,
            namespace: namespace.to_string(),
            server_id: server_id.to_string(),
            metadata: descriptor.metadata,
        }
    }

    /// Read a string field from the tool's metadata.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// A discovered resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub server_id: String,
}

impl Resource {
    pub fn from_descriptor(descriptor: ResourceDescriptor, server_id: &str) -> Self {
        Self {
            uri: descriptor.uri,
            name: descriptor.name,
            description: descriptor.description,
            mime_type: descriptor.mime_type,
            server_id: server_id.to_string(),
        }
    }
}

/// Snapshot of one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub server_id: String,
    pub status: ConnectionStatus,
    /// Current state of the underlying process.
    pub process: Option<ProcessRecord>,
    pub server_info: Option<Implementation>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    /// Consecutive failed connection attempts.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl ConnectionRecord {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            status: ConnectionStatus::Disconnected,
            process: None,
            server_info: None,
            connected_at: None,
            last_activity: None,
            tools: Vec::new(),
            resources: Vec::new(),
            attempts: 0,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Outcome of a single tool call on a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub success: bool,
    pub content: Vec<ContentBlock>,
    pub error: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ToolCallResult {
    pub fn success(content: Vec<ContentBlock>, duration: Duration) -> Self {
        Self {
            success: true,
            content,
            error: None,
            duration,
        }
    }

    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            content: Vec::new(),
            error: Some(error.into()),
            duration,
        }
    }

    /// Content as a JSON value, for catalog payloads.
    pub fn payload(&self) -> Value {
        serde_json::to_value(&self.content).unwrap_or(Value::Null)
    }
}

/// Serialize durations as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// A call as observed by subscribers.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub server_id: String,
    pub tool: String,
    pub arguments: Value,
    pub result: ToolCallResult,
}

/// Events published by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StatusChanged {
        server_id: String,
        from: ConnectionStatus,
        to: ConnectionStatus,
    },
    Established(ConnectionRecord),
    Failed(ConnectionRecord),
    Lost(ConnectionRecord),
    ReconnectExhausted(ConnectionRecord),
    ToolExecuted(ToolExecution),
}

impl ConnectionEvent {
    pub fn server_id(&self) -> &str {
        match self {
            Self::StatusChanged { server_id, .. } => server_id,
            Self::Established(r) | Self::Failed(r) | Self::Lost(r) | Self::ReconnectExhausted(r) => {
                &r.server_id
            }
            Self::ToolExecuted(e) => &e.server_id,
        }
    }

    /// Event name used in logs and trace sinks.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status:changed",
            Self::Established(_) => "connection:established",
            Self::Failed(_) => "connection:failed",
            Self::Lost(_) => "connection:lost",
            Self::ReconnectExhausted(_) => "reconnect:exhausted",
            Self::ToolExecuted(_) => "tool:executed",
        }
    }
}
