use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, warn};
use url::Url;

use super::error::McpError;
use super::transport::{McpTransport, rpc_outcome};

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Streamable HTTP transport: every JSON-RPC message is POSTed to the same
/// endpoint; the server answers with a JSON body or a short SSE stream
/// carrying the response. A session id handed out by the server is echoed
/// back on every later request.
pub struct HttpTransport {
    server: String,
    url: String,
    http: reqwest::Client,
    session_id: AsyncMutex<Option<String>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(server: &str, url: &str) -> Self {
        Self {
            server: server.to_string(),
            url: url.to_string(),
            http: reqwest::Client::new(),
            session_id: AsyncMutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    async fn post(&self, payload: &Value) -> Result<reqwest::Response, McpError> {
        let mut request = self
            .http
            .post(&self.url)
            .header("Accept", ACCEPT_BOTH)
            .json(payload);
        if let Some(session) = self.session_id.lock().await.clone() {
            request = request.header("Mcp-Session-Id", session);
        }

        let response = request
            .send()
            .await
            .map_err(|err| McpError::transport(&self.server, err.to_string()))?;
        if !response.status().is_success() {
            return Err(McpError::transport(
                &self.server,
                format!("HTTP {}", response.status()),
            ));
        }

        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|value| value.to_str().ok())
        {
            let mut stored = self.session_id.lock().await;
            *stored = Some(session.to_string());
        }
        Ok(response)
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.post(&payload).await?;
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|err| McpError::transport(&self.server, err.to_string()))?;

        let message = if content_type.starts_with("text/event-stream") {
            let mut parser = SseEventParser::default();
            let mut events = parser.push(&body);
            events.extend(parser.flush());
            events
                .into_iter()
                .filter(|event| event.name == "message")
                .filter_map(|event| serde_json::from_str::<Value>(&event.data).ok())
                .find(|message| message.get("id").and_then(Value::as_u64) == Some(id))
                .ok_or_else(|| {
                    McpError::transport(&self.server, "no matching response in event stream")
                })?
        } else {
            serde_json::from_str(&body).map_err(|source| McpError::InvalidJson {
                server: self.server.clone(),
                source,
            })?
        };

        rpc_outcome(&self.server, &message)
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.post(&payload).await.map(|_| ())
    }

    async fn close(&self) {}
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, McpError>>>;

/// Legacy SSE transport: a long-lived GET stream delivers an `endpoint`
/// event naming the POST target, then carries every JSON-RPC response as a
/// `message` event routed back through the pending-request map.
pub struct SseTransport {
    server: String,
    endpoint: String,
    http: reqwest::Client,
    pending: Arc<AsyncMutex<PendingMap>>,
    next_id: AtomicU64,
    reader: tokio::task::JoinHandle<()>,
}

impl SseTransport {
    pub async fn connect(server: &str, url: &str) -> Result<Self, McpError> {
        let http = reqwest::Client::new();
        let response = http
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|err| McpError::transport(server, err.to_string()))?;
        if !response.status().is_success() {
            return Err(McpError::transport(
                server,
                format!("HTTP {}", response.status()),
            ));
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseEventParser::default();
        let mut endpoint = None;
        let mut backlog = Vec::new();

        while endpoint.is_none() {
            let Some(item) = stream.next().await else {
                return Err(McpError::transport(server, "stream closed before endpoint"));
            };
            let bytes = item.map_err(|err| McpError::transport(server, err.to_string()))?;
            for event in parser.push(&String::from_utf8_lossy(&bytes)) {
                if event.name == "endpoint" && endpoint.is_none() {
                    endpoint = Some(resolve_endpoint(server, url, event.data.trim())?);
                } else {
                    backlog.push(event);
                }
            }
        }

        let pending: Arc<AsyncMutex<PendingMap>> = Arc::new(AsyncMutex::new(HashMap::new()));
        let reader_pending = Arc::clone(&pending);
        let reader_server = server.to_string();
        let reader = tokio::spawn(async move {
            for event in backlog {
                route_event(&reader_server, &reader_pending, event).await;
            }
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        for event in parser.push(&String::from_utf8_lossy(&bytes)) {
                            route_event(&reader_server, &reader_pending, event).await;
                        }
                    }
                    Err(err) => {
                        warn!(server = %reader_server, %err, "SSE stream failed");
                        break;
                    }
                }
            }
            fail_pending(&reader_server, &reader_pending).await;
        });

        Ok(Self {
            server: server.to_string(),
            endpoint: endpoint.unwrap_or_default(),
            http,
            pending,
            next_id: AtomicU64::new(1),
            reader,
        })
    }
}

fn resolve_endpoint(server: &str, base: &str, reference: &str) -> Result<String, McpError> {
    let base = Url::parse(base).map_err(|err| McpError::transport(server, err.to_string()))?;
    base.join(reference)
        .map(|url| url.to_string())
        .map_err(|err| McpError::transport(server, err.to_string()))
}

async fn route_event(server: &str, pending: &AsyncMutex<PendingMap>, event: SseEvent) {
    if event.name != "message" {
        debug!(server, event = event.name.as_str(), "ignoring SSE event");
        return;
    }
    let Ok(message) = serde_json::from_str::<Value>(&event.data) else {
        warn!(server, data = event.data.as_str(), "invalid JSON in SSE event");
        return;
    };
    let Some(id) = message.get("id").and_then(Value::as_u64) else {
        debug!(server, "SSE message without request id");
        return;
    };

    let sender = {
        let mut pending = pending.lock().await;
        pending.remove(&id)
    };
    if let Some(sender) = sender {
        let _ = sender.send(rpc_outcome(server, &message));
    }
}

async fn fail_pending(server: &str, pending: &AsyncMutex<PendingMap>) {
    let mut pending = pending.lock().await;
    for (_, sender) in pending.drain() {
        let _ = sender.send(Err(McpError::Terminated {
            server: server.to_string(),
        }));
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
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
        let posted = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| McpError::transport(&self.server, err.to_string()))
            .and_then(|response| {
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(McpError::transport(
                        &self.server,
                        format!("HTTP {}", response.status()),
                    ))
                }
            });
        if let Err(err) = posted {
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

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|err| McpError::transport(&self.server, err.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        self.reader.abort();
        fail_pending(&self.server, &self.pending).await;
    }
}

/// Incremental server-sent-events framing: events are separated by blank
/// lines; `data:` lines within one event are joined with newlines and the
/// event name defaults to `message`.
#[derive(Default)]
pub(super) struct SseEventParser {
    buffer: String,
}

#[derive(Debug, PartialEq, Eq)]
pub(super) struct SseEvent {
    pub name: String,
    pub data: String,
}

impl SseEventParser {
    pub(super) fn push(&mut self, text: &str) -> Vec<SseEvent> {
        self.buffer.push_str(&text.replace("\r\n", "\n"));

        let mut events = Vec::new();
        while let Some(split) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..split + 2).collect();
            if let Some(event) = parse_event_block(&block) {
                events.push(event);
            }
        }
        events
    }

    pub(super) fn flush(&mut self) -> Option<SseEvent> {
        let block = std::mem::take(&mut self.buffer);
        parse_event_block(&block)
    }
}

fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut name = "message".to_string();
    let mut data = Vec::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            name = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseEvent {
        name,
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_event() {
        let mut parser = SseEventParser::default();
        let events = parser.push("event: endpoint\ndata: /messages?session=abc\n\n");

        assert_eq!(
            events,
            vec![SseEvent {
                name: "endpoint".to_string(),
                data: "/messages?session=abc".to_string(),
            }]
        );
    }

    #[test]
    fn joins_split_data_lines() {
        let mut parser = SseEventParser::default();
        let events = parser.push("data: {\"a\":\ndata: 1}\n\n");

        assert_eq!(events[0].name, "message");
        assert_eq!(events[0].data, "{\"a\":\n1}");
    }

    #[test]
    fn buffers_partial_events_across_pushes() {
        let mut parser = SseEventParser::default();
        assert!(parser.push("data: par").is_empty());
        let events = parser.push("tial\n\ndata: next\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "partial");
        assert_eq!(events[1].data, "next");
    }

    #[test]
    fn handles_crlf_framing() {
        let mut parser = SseEventParser::default();
        let events = parser.push("data: hello\r\n\r\n");

        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn resolves_relative_endpoint() {
        let resolved =
            resolve_endpoint("mcp", "http://localhost:9000/sse", "/messages?session=1").expect("resolve");
        assert_eq!(resolved, "http://localhost:9000/messages?session=1");
    }
}
