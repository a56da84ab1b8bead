// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC client over a line stream.
//!
//! The client does not own the server process. It is handed the process's
//! stdin and a channel of stdout lines, and runs one writer task and one
//! reader task that match responses to pending requests by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::error::{error_codes, RpcError, RpcResult};
use super::protocol::{
    encode_line, methods, CallToolParams, CallToolResult, Implementation, InitializeParams,
    InitializeResult, ListResourcesResult, ListToolsResult, Message, Notification, Request,
    ResourceDescriptor, Response, ToolDescriptor, PROTOCOL_VERSION,
};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// A client session with one tool server.
pub struct RpcClient {
    /// Server id, used in logs and errors.
    name: String,
    /// Request ID counter.
    request_id: AtomicU64,
    /// Pending requests waiting for responses.
    pending: PendingMap,
    /// Outgoing line channel feeding the writer task.
    tx: mpsc::Sender<String>,
    /// Set once the server's output has ended.
    closed: Arc<AtomicBool>,
    closed_rx: watch::Receiver<bool>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl RpcClient {
    /// Start a session over `writer` (server stdin) and `lines` (server stdout).
    pub fn new<W>(
        name: impl Into<String>,
        writer: W,
        lines: mpsc::Receiver<String>,
        request_timeout: Duration,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<String>(100);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (closed_tx, closed_rx) = watch::channel(false);

        let writer = tokio::spawn(Self::write_messages(name.clone(), writer, rx));
        let reader = tokio::spawn(Self::read_messages(
            name.clone(),
            lines,
            Arc::clone(&pending),
            Arc::clone(&closed),
            closed_tx,
            tx.clone(),
        ));

        Self {
            name,
            request_id: AtomicU64::new(1),
            pending,
            tx,
            closed,
            closed_rx,
            request_timeout,
            reader,
            writer,
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the server's output has ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolve once the server's output has ended.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Perform the handshake and send `notifications/initialized`.
    pub async fn initialize(&self) -> RpcResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info: Implementation::this_client(),
            capabilities: serde_json::json!({}),
        };
        let result: InitializeResult = self
            .call(methods::INITIALIZE, serde_json::to_value(params)?)
            .await?;
        self.notify(methods::INITIALIZED, serde_json::json!({})).await?;
        debug!(
            server = %self.name,
            remote = %result.server_info.name,
            version = %result.server_info.version,
            "Handshake complete"
        );
        Ok(result)
    }

    /// Discover tools.
    pub async fn list_tools(&self) -> RpcResult<Vec<ToolDescriptor>> {
        let result: ListToolsResult = self.call(methods::TOOLS_LIST, serde_json::json!({})).await?;
        Ok(result.tools)
    }

    /// Discover resources. Servers without resource support yield an empty list.
    pub async fn list_resources(&self) -> RpcResult<Vec<ResourceDescriptor>> {
        match self
            .call::<ListResourcesResult>(methods::RESOURCES_LIST, serde_json::json!({}))
            .await
        {
            Ok(result) => Ok(result.resources),
            Err(e) if e.is_method_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Invoke a tool.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> RpcResult<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.call(methods::TOOLS_CALL, serde_json::to_value(params)?)
            .await
    }

    /// Round-trip a `ping` request.
    pub async fn ping(&self) -> RpcResult<Duration> {
        let start = Instant::now();
        self.request(methods::PING, Value::Null).await?;
        Ok(start.elapsed())
    }

    /// Announce protocol teardown. Best effort; the server may already be gone.
    pub async fn shutdown(&self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.notify(methods::SHUTDOWN, Value::Null).await {
            debug!(server = %self.name, error = %e, "Shutdown notification not delivered");
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> RpcResult<T> {
        let result = self.request(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(format!("{}: {}", method, e)))
    }

    /// Send a request to the server.
    pub async fn request(&self, method: &str, params: Value) -> RpcResult<Value> {
        if self.is_closed() {
            return Err(RpcError::Closed(self.name.clone()));
        }

        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let line = encode_line(&Request::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        // The reader sets `closed` before draining pending, so a request
        // inserted after the drain is caught here.
        if self.is_closed() {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::Closed(self.name.clone()));
        }

        trace!(server = %self.name, id, method, "Sending request");
        if self.tx.send(line).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::CommunicationError(format!(
                "writer for {} has stopped",
                self.name
            )));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.error {
                    return Err(RpcError::ServerError {
                        code: error.code,
                        message: error.message,
                        data: error.data,
                    });
                }
                Ok(response.result.unwrap_or(Value::Null))
            }
            Ok(Err(_)) => Err(RpcError::Closed(self.name.clone())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a notification to the server.
    pub async fn notify(&self, method: &str, params: Value) -> RpcResult<()> {
        let line = encode_line(&Notification::new(method, params))?;
        self.tx.send(line).await.map_err(|_| {
            RpcError::CommunicationError(format!("writer for {} has stopped", self.name))
        })
    }

    async fn write_messages<W>(name: String, mut writer: W, mut rx: mpsc::Receiver<String>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        while let Some(line) = rx.recv().await {
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                debug!(server = %name, error = %e, "Write failed, stopping writer");
                break;
            }
            if let Err(e) = writer.flush().await {
                debug!(server = %name, error = %e, "Flush failed, stopping writer");
                break;
            }
        }
    }

    /// Read messages from the server.
    async fn read_messages(
        name: String,
        mut lines: mpsc::Receiver<String>,
        pending: PendingMap,
        closed: Arc<AtomicBool>,
        closed_tx: watch::Sender<bool>,
        replies: mpsc::Sender<String>,
    ) {
        while let Some(line) = lines.recv().await {
            match Message::parse(&line) {
                Some(Message::Response(response)) => {
                    match pending.lock().await.remove(&response.id) {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => debug!(server = %name, id = response.id, "Response for unknown request"),
                    }
                }
                Some(Message::Notification(note)) => {
                    debug!(server = %name, method = %note.method, "Server notification");
                }
                Some(Message::Request(request)) => {
                    // Server-initiated requests are not supported.
                    let reply = Response::failure(
                        request.id,
                        error_codes::METHOD_NOT_FOUND,
                        format!("method not supported by client: {}", request.method),
                    );
                    match encode_line(&reply) {
                        Ok(line) => {
                            let _ = replies.send(line).await;
                        }
                        Err(e) => warn!(server = %name, error = %e, "Failed to encode reply"),
                    }
                }
                None => {
                    if !line.trim().is_empty() {
                        debug!(server = %name, line = %line, "Non-protocol output");
                    }
                }
            }
        }

        debug!(server = %name, "Server output closed");
        closed.store(true, Ordering::SeqCst);
        // Dropping the senders fails every waiter with `Closed`.
        pending.lock().await.clear();
        let _ = closed_tx.send(true);
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    /// Spawn an in-memory server that answers each request with `handler`.
    fn fake_server<F>(handler: F) -> (RpcClient, mpsc::Sender<String>)
    where
        F: Fn(&Request) -> Option<Response> + Send + 'static,
    {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (lines_tx, lines_rx) = mpsc::channel(64);
        let out = lines_tx.downgrade();

        tokio::spawn(async move {
            let mut reader = BufReader::new(server_io).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(Message::Request(req)) = Message::parse(&line) {
                    if let (Some(resp), Some(out)) = (handler(&req), out.upgrade()) {
                        let _ = out.send(serde_json::to_string(&resp).unwrap()).await;
                    }
                }
            }
        });

        let client = RpcClient::new("test", client_io, lines_rx, Duration::from_millis(200));
        (client, lines_tx)
    }

    #[tokio::test]
    async fn test_handshake_and_discovery() {
        let (client, _lines) = fake_server(|req| match req.method.as_str() {
            "initialize" => Some(Response::success(
                req.id,
                json!({"protocolVersion": PROTOCOL_VERSION, "serverInfo": {"name": "fake", "version": "1.0"}}),
            )),
            "tools/list" => Some(Response::success(
                req.id,
                json!({"tools": [{"name": "echo", "inputSchema": {"type": "object"}}]}),
            )),
            "resources/list" => Some(Response::failure(req.id, -32601, "no resources")),
            _ => None,
        });

        let init = client.initialize().await.unwrap();
        assert_eq!(init.server_info.name, "fake");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let resources = client.list_resources().await.unwrap();
        assert!(resources.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_surfaces() {
        let (client, _lines) = fake_server(|req| Some(Response::failure(req.id, -32603, "boom")));
        let err = client.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, RpcError::ServerError { code: -32603, .. }));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let (client, _lines) = fake_server(|_| None);
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));
        assert!(client.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_fails_pending() {
        let (client, lines) = fake_server(|_| None);
        let client = Arc::new(client);

        let c = Arc::clone(&client);
        let call = tokio::spawn(async move { c.request("slow", Value::Null).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(lines);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Closed(_)));
        client.closed().await;
        assert!(client.is_closed());

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, RpcError::Closed(_)));
    }

    #[tokio::test]
    async fn test_noise_is_ignored() {
        let (client, lines) = fake_server(|req| Some(Response::success(req.id, json!({}))));
        lines.send("server booting...".to_string()).await.unwrap();
        lines
            .send(r#"{"jsonrpc":"2.0","method":"notifications/log","params":{}}"#.to_string())
            .await
            .unwrap();

        assert!(client.ping().await.is_ok());
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_call_tool_result() {
        let (client, _lines) = fake_server(|req| {
            let text = req.params["arguments"]["text"].as_str().unwrap_or_default().to_string();
            Some(Response::success(
                req.id,
                serde_json::to_value(CallToolResult::text(text)).unwrap(),
            ))
        });

        let result = client.call_tool("echo", json!({"text": "hi"})).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(result.as_text(), "hi");
    }
}
