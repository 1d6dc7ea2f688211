use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, warn};

use super::error::McpError;
use super::transport::{McpTransport, rpc_outcome};

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, McpError>>>;

/// JSON-RPC over a child process's stdin/stdout, one message per line. A
/// background task pumps stdout and routes responses to the waiting caller
/// through a pending-request map.
pub struct StdioTransport {
    inner: Arc<StdioInner>,
}

struct StdioInner {
    server: String,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    pending: AsyncMutex<PendingMap>,
    next_id: AtomicU64,
    child: AsyncMutex<Option<Child>>,
}

impl StdioTransport {
    pub async fn spawn(server: &str, command: &str, args: &[String]) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| McpError::Spawn {
                server: server.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::transport(server, "failed to capture server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::transport(server, "failed to capture server stdout"))?;

        let inner = Arc::new(StdioInner {
            server: server.to_string(),
            writer: AsyncMutex::new(Some(BufWriter::new(stdin))),
            pending: AsyncMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            child: AsyncMutex::new(Some(child)),
        });

        let reader = Arc::clone(&inner);
        tokio::spawn(async move {
            reader.reader_loop(stdout).await;
        });

        Ok(Self { inner })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        self.inner.send_request(method, params).await
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.inner
            .write_message(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
            }))
            .await
    }

    async fn close(&self) {
        self.inner.shutdown().await;
    }
}

impl StdioInner {
    async fn send_request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if let Err(err) = self.write_message(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(McpError::Terminated {
                server: self.server.clone(),
            }),
        }
    }

    async fn write_message(&self, message: &Value) -> Result<(), McpError> {
        let encoded = serde_json::to_string(message).map_err(|source| McpError::InvalidJson {
            server: self.server.clone(),
            source,
        })?;

        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| McpError::transport(&self.server, "writer closed"))?;
        for piece in [encoded.as_bytes(), b"\n"] {
            stream
                .write_all(piece)
                .await
                .map_err(|err| McpError::transport(&self.server, err.to_string()))?;
        }
        stream
            .flush()
            .await
            .map_err(|err| McpError::transport(&self.server, err.to_string()))
    }

    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(raw)) = lines.next_line().await {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            // Some servers write ANSI-decorated log lines to stdout.
            if trimmed.starts_with('\u{1b}') {
                debug!(server = %self.server, line = trimmed, "skipping non-JSON line");
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(message) => self.route_inbound(message).await,
                Err(source) => {
                    warn!(
                        server = %self.server,
                        line = trimmed,
                        %source,
                        "received invalid JSON from MCP server"
                    );
                }
            }
        }

        self.shutdown().await;
    }

    async fn route_inbound(&self, message: Value) {
        let id = message.get("id").and_then(Value::as_u64);
        let is_request = message.get("method").is_some();

        match (id, is_request) {
            (Some(id), false) => self.resolve_pending(id, message).await,
            (Some(id), true) => self.answer_server_request(id, &message).await,
            (None, true) => {
                let method = message.get("method").and_then(Value::as_str).unwrap_or("");
                debug!(server = %self.server, method, "ignoring server notification");
            }
            (None, false) => {}
        }
    }

    async fn resolve_pending(&self, id: u64, message: Value) {
        let sender = {
            let mut pending = self.pending.lock().await;
            pending.remove(&id)
        };
        let Some(sender) = sender else {
            debug!(server = %self.server, id, "response for unknown request");
            return;
        };

        let _ = sender.send(rpc_outcome(&self.server, &message));
    }

    async fn answer_server_request(&self, id: u64, message: &Value) {
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let reply = match method {
            "ping" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {},
            }),
            other => {
                warn!(server = %self.server, method = other, "server sent unsupported request");
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": -32601,
                        "message": format!("client does not implement method '{other}'"),
                    },
                })
            }
        };
        if let Err(err) = self.write_message(&reply).await {
            warn!(server = %self.server, %err, "failed to answer server request");
        }
    }

    async fn shutdown(&self) {
        {
            let mut writer = self.writer.lock().await;
            *writer = None;
        }

        {
            let mut child = self.child.lock().await;
            if let Some(mut running) = child.take() {
                if let Err(err) = running.kill().await {
                    debug!(server = %self.server, %err, "child already exited");
                }
                let _ = running.wait().await;
            }
        }

        let mut pending = self.pending.lock().await;
        for (_, sender) in pending.drain() {
            let _ = sender.send(Err(McpError::Terminated {
                server: self.server.clone(),
            }));
        }
    }
}
