// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! A small tool server speaking the toolhost line protocol on stdio.
//!
//! Used by the integration tests and handy for trying the CLI:
//!
//! ```text
//! servers:
//!   mock:
//!     command: mock-tool-server
//! ```
//!
//! Behavior knobs (environment):
//! - `MOCK_CRASH_AFTER_MS`: exit this long after starting
//! - `MOCK_EXIT_CODE`: exit code used for the crash (default 1)
//! - `MOCK_SILENT`: read requests but never answer them
//! - `MOCK_SERVER_NAME`: name announced in the handshake

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info};

use toolhost::rpc::error_codes;
use toolhost::rpc::protocol::{
    encode_line, methods, CallToolParams, CallToolResult, Message, Request, Response,
    PROTOCOL_VERSION,
};
use toolhost::telemetry::{init_telemetry, TelemetryConfig};

type Stdout = Arc<Mutex<tokio::io::Stdout>>;

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn tool_list() -> Value {
    json!({
        "tools": [
            {
                "name": "search",
                "description": "Search the mock document index",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "limit": {"type": "integer", "minimum": 1}
                    },
                    "required": ["query"]
                },
                "metadata": {"category": "search", "tags": ["docs"]}
            },
            {
                "name": "echo",
                "description": "Return the given text",
                "inputSchema": {
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }
            },
            {
                "name": "add",
                "description": "Add two numbers",
                "inputSchema": {
                    "type": "object",
                    "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
                    "required": ["a", "b"]
                },
                "metadata": {"category": "utility"}
            },
            {
                "name": "flaky",
                "description": "Succeeds on two calls out of every five",
                "inputSchema": {"type": "object"}
            },
            {
                "name": "slow",
                "description": "Sleep before answering",
                "inputSchema": {
                    "type": "object",
                    "properties": {"ms": {"type": "integer", "minimum": 0}}
                }
            }
        ]
    })
}

struct Server {
    name: String,
    flaky_calls: AtomicU64,
    search_calls: AtomicU64,
}

impl Server {
    async fn call_tool(&self, params: CallToolParams) -> CallToolResult {
        let args = &params.arguments;
        match params.name.as_str() {
            "search" => {
                let n = self.search_calls.fetch_add(1, Ordering::SeqCst) + 1;
                let query = args["query"].as_str().unwrap_or_default();
                CallToolResult::text(format!("Results for '{}' from {} (call {})", query, self.name, n))
            }
            "echo" => CallToolResult::text(args["text"].as_str().unwrap_or_default()),
            "add" => {
                let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
                CallToolResult::text(sum.to_string())
            }
            "flaky" => {
                let n = self.flaky_calls.fetch_add(1, Ordering::SeqCst);
                if n % 5 < 2 {
                    CallToolResult::text(format!("ok on call {}", n + 1))
                } else {
                    CallToolResult::error(format!("flaky failure on call {}", n + 1))
                }
            }
            "slow" => {
                let ms = args["ms"].as_u64().unwrap_or(100);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                CallToolResult::text(format!("slept {}ms", ms))
            }
            other => CallToolResult::error(format!("unknown tool: {}", other)),
        }
    }

    async fn handle(&self, request: Request) -> Response {
        let id = request.id;
        match request.method.as_str() {
            methods::INITIALIZE => Response::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {"name": self.name, "version": env!("CARGO_PKG_VERSION")},
                    "capabilities": {"tools": {}, "resources": {}}
                }),
            ),
            methods::TOOLS_LIST => Response::success(id, tool_list()),
            methods::RESOURCES_LIST => Response::success(
                id,
                json!({"resources": [{
                    "uri": "mock://readme",
                    "name": "readme",
                    "mimeType": "text/plain"
                }]}),
            ),
            methods::PING => Response::success(id, json!({})),
            methods::TOOLS_CALL => match serde_json::from_value::<CallToolParams>(request.params) {
                Ok(params) => {
                    let result = self.call_tool(params).await;
                    Response::success(id, serde_json::to_value(result).unwrap_or(Value::Null))
                }
                Err(e) => Response::failure(id, error_codes::INVALID_PARAMS, e.to_string()),
            },
            other => Response::failure(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("method not found: {}", other),
            ),
        }
    }
}

async fn send(stdout: &Stdout, response: &Response) -> std::io::Result<()> {
    let line = encode_line(response)?;
    let mut out = stdout.lock().await;
    out.write_all(line.as_bytes()).await?;
    out.flush().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _telemetry = init_telemetry(&TelemetryConfig::default())?;

    let server = Arc::new(Server {
        name: std::env::var("MOCK_SERVER_NAME").unwrap_or_else(|_| "mock-tool-server".to_string()),
        flaky_calls: AtomicU64::new(0),
        search_calls: AtomicU64::new(0),
    });
    let silent = std::env::var_os("MOCK_SILENT").is_some();

    if let Some(ms) = env_u64("MOCK_CRASH_AFTER_MS") {
        let code = env_u64("MOCK_EXIT_CODE").unwrap_or(1) as i32;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            info!(code, "Crashing on request");
            std::process::exit(code);
        });
    }

    let stdout: Stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Message::parse(&line) {
            Some(Message::Request(request)) if !silent => {
                debug!(method = %request.method, id = request.id, "Request");
                let server = Arc::clone(&server);
                let stdout = Arc::clone(&stdout);
                tokio::spawn(async move {
                    let response = server.handle(request).await;
                    if let Err(e) = send(&stdout, &response).await {
                        debug!(error = %e, "Failed to write response");
                    }
                });
            }
            Some(Message::Notification(note)) if note.method == methods::SHUTDOWN => {
                info!("Shutdown requested");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}
