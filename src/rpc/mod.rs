// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Newline-delimited JSON-RPC 2.0 between the host and tool servers.
//!
//! # Wire format
//!
//! One JSON object per line on the server's stdin/stdout. Requests carry a
//! numeric id; responses are matched to pending requests by that id. Lines
//! that are not JSON-RPC messages are logged and ignored.
//!
//! | method                      | kind         |
//! |-----------------------------|--------------|
//! | `initialize`                | request      |
//! | `notifications/initialized` | notification |
//! | `tools/list`                | request      |
//! | `resources/list`            | request      |
//! | `tools/call`                | request      |
//! | `ping`                      | request      |
//! | `shutdown`                  | notification |

mod client;
mod error;
pub mod protocol;

pub use client::RpcClient;
pub use error::{error_codes, RpcError, RpcResult};
pub use protocol::{
    CallToolResult, ContentBlock, Implementation, InitializeResult, ResourceDescriptor,
    ToolDescriptor,
};
