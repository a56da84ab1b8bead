// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool catalog.
//!
//! Aggregates the tools advertised by every connection under
//! `namespace:name` ids, infers a category for each, tracks usage and
//! health, and runs invocations with schema validation and a TTL result
//! cache in front of the connection layer.
//!
//! ```rust,ignore
//! let catalog = ToolCatalog::new(config, connections, metrics);
//! catalog.initialize().await;
//! let result = catalog
//!     .execute(InvocationRequest::new("docs:search", json!({"query": "rust"})))
//!     .await;
//! ```

mod cache;
#[allow(clippy::module_inception)]
mod catalog;
mod types;

pub use cache::{cache_key, ResultCache};
pub use catalog::{infer_category, ToolCatalog};
pub use types::{
    display_name, tool_id, CatalogEntry, CatalogEvent, CatalogFilter, InvocationMetadata,
    InvocationRequest, InvocationResult, ToolExample, ToolHealth, UsageStats,
};
