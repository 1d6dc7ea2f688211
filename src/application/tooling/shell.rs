use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncReadExt as _;
use tokio::process::Command;
use tracing::debug;

use super::interface::{Tool, ToolArgs, ToolError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const EXIT_NOTE: &str =
    "(note: grep returns status 1 when no matches found, which is not an error)";

/// Runs commands on the local host under `sh -c` with a bounded deadline.
pub struct ShellTool {
    timeout: Duration,
}

impl ShellTool {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> String {
        "Execute a command on the LOCAL machine only. Do NOT use for remote hosts - use ssh tool instead."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute locally",
                },
            },
            "required": ["command"],
        })
    }

    async fn invoke(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .filter(|command| !command.is_empty())
            .ok_or(ToolError::MissingParameter { name: "command" })?;

        debug!(command, "running local shell command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn { source })?;

        // Output is captured as the process runs so that whatever arrived
        // before a deadline is still reported.
        let stdout = child
            .stdout
            .take()
            .map(PipeCapture::start)
            .ok_or_else(|| ToolError::execution("failed to capture command stdout"))?;
        let stderr = child
            .stderr
            .take()
            .map(PipeCapture::start)
            .ok_or_else(|| ToolError::execution("failed to capture command stderr"))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(done) => Some(done.map_err(|source| ToolError::Spawn { source })?),
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                None
            }
        };

        let (stdout, stderr) = if status.is_some() {
            (stdout.finish().await, stderr.finish().await)
        } else {
            (stdout.interrupt().await, stderr.interrupt().await)
        };

        let mut output = String::from_utf8_lossy(&stdout).to_string();
        if !stderr.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str("STDERR:\n");
            output.push_str(&String::from_utf8_lossy(&stderr));
        }

        let Some(status) = status else {
            output.push_str("\nError: command timed out");
            return Ok(output);
        };

        if !status.success() {
            if output.is_empty() {
                output.push_str("(command produced no output)\n");
            }
            let detail = match status.code() {
                Some(code) => code.to_string(),
                None => status.to_string(),
            };
            output.push_str(&format!("Command exited with status: {detail} {EXIT_NOTE}"));
            return Ok(output);
        }

        if output.is_empty() {
            return Ok("(command succeeded but produced no output)".to_string());
        }
        Ok(output)
    }
}

/// Reads a pipe into a shared buffer as data arrives, so partial output is
/// available even when the process is killed mid-stream.
struct PipeCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: tokio::task::JoinHandle<()>,
}

impl PipeCapture {
    fn start<R>(mut pipe: R) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => writer
                        .lock()
                        .expect("pipe capture lock")
                        .extend_from_slice(&chunk[..read]),
                }
            }
        });
        Self { buffer, task }
    }

    /// Waits for EOF and returns everything read.
    async fn finish(self) -> Vec<u8> {
        let buffer = self.buffer.clone();
        let _ = self.task.await;
        let result = std::mem::take(&mut *buffer.lock().expect("pipe capture lock"));
        result
    }

    /// Returns what has arrived so far after the process was killed. The
    /// reader gets a short grace period; a grandchild that inherited the
    /// pipe can hold it open indefinitely, so EOF is not waited for.
    async fn interrupt(mut self) -> Vec<u8> {
        let grace = Duration::from_millis(250);
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            self.task.abort();
        }
        self.take()
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer.lock().expect("pipe capture lock"))
    }
}
