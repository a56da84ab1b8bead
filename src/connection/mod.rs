// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Protocol sessions with tool servers.
//!
//! The [`ConnectionManager`] turns a supervised process into a live session:
//! handshake, tool and resource discovery, heartbeats, invocation, and
//! reconnection on a fixed delay. Status changes follow
//! [`ConnectionStatus::can_transition_to`].
//!
//! # Example
//!
//! ```rust,ignore
//! use toolhost::connection::ConnectionManager;
//! use toolhost::process::ProcessSupervisor;
//!
//! let supervisor = ProcessSupervisor::new(config.clone());
//! let connections = ConnectionManager::new(config, supervisor);
//!
//! let record = connections.connect("docs").await?;
//! let result = connections
//!     .execute_tool("docs", "search", serde_json::json!({"query": "tokio"}))
//!     .await?;
//! ```

mod backend;
mod error;
mod manager;
mod types;

pub use backend::ToolBackend;
pub use error::ConnectionError;
pub use manager::ConnectionManager;
pub use types::{
    ConnectionEvent, ConnectionRecord, ConnectionStatus, Resource, Tool, ToolCallResult,
    ToolExecution,
};
pub(crate) use types::duration_ms;
