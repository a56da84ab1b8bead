// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Toolhost - supervisor for external tool-provider processes.
//!
//! Spawns tool servers as child processes, speaks line-delimited JSON-RPC
//! with them over stdio, aggregates their tools into one catalog and keeps
//! everything observable.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`config`] - Configuration loading, merging and validation
//! - [`error`] - Error types and result aliases
//! - [`scheduler`] - Cancellable timers keyed by server id and purpose
//! - [`schema`] - Tool input schemas: validation and example generation
//! - [`rpc`] - Line-delimited JSON-RPC client for tool servers
//! - [`process`] - Process supervisor: spawn, stop, restart, health checks
//! - [`connection`] - Connection manager: handshake, discovery, heartbeats,
//!   reconnection and tool calls
//! - [`catalog`] - Tool catalog: namespacing, categories, health, caching
//! - [`monitor`] - Health rollups, metrics and threshold alerts
//! - [`telemetry`] - Tracing, metrics and correlation ids
//! - [`host`] - Assembly of all of the above
//!
//! # Example
//!
//! ```rust,ignore
//! use toolhost::config::{load_config, CliOptions};
//! use toolhost::catalog::InvocationRequest;
//! use toolhost::ToolHost;
//!
//! let config = load_config(".".as_ref(), None, CliOptions::default())?;
//! let host = ToolHost::build(config, None);
//! host.start().await;
//!
//! let result = host
//!     .execute(InvocationRequest::new("docs:search", json!({"query": "rust"})))
//!     .await;
//! host.shutdown().await;
//! ```

pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
pub mod host;
pub mod monitor;
pub mod process;
pub mod rpc;
pub mod scheduler;
pub mod schema;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use catalog::{CatalogEntry, CatalogFilter, InvocationRequest, InvocationResult, ToolCatalog};
pub use config::HostConfig;
pub use connection::{ConnectionManager, ConnectionStatus, ToolBackend};
pub use error::{ConfigError, HostError, Result};
pub use host::{HostStatus, ToolHost};
pub use monitor::{AlertRule, Monitor};
pub use process::{ProcessStatus, ProcessSupervisor};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
