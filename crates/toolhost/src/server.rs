//! Tool host process management (spawn, communicate, lifecycle).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, JsonRpcRequest, JsonRpcResponse, METHOD_CALL_TOOL,
    METHOD_LIST_TOOLS, RequestId, ToolDescriptor,
};

/// Default timeout for catalog discovery.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum size of a single reply line (1MB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Replies buffered between the stdout reader and the requester.
const REPLY_BUFFER: usize = 16;

/// Requests queued for the stdin writer.
const REQUEST_BUFFER: usize = 16;

/// How to launch a tool host.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Handle to a running tool host process.
///
/// Requests take `&mut self`: one request is outstanding at a time, and the
/// owner is responsible for serializing access.
pub struct Server {
    config: ServerConfig,
    process: Child,
    requests: Option<mpsc::Sender<String>>,
    writer: JoinHandle<()>,
    replies: mpsc::Receiver<Result<String>>,
    reader: JoinHandle<()>,
    next_id: i64,
}

impl Server {
    /// Spawn a new tool host process.
    pub async fn spawn(config: ServerConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(Error::Spawn)?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;

        let (requests, queued) = mpsc::channel(REQUEST_BUFFER);
        let writer = tokio::spawn(write_requests(stdin, queued));
        let (tx, replies) = mpsc::channel(REPLY_BUFFER);
        let reader = tokio::spawn(read_replies(stdout, tx));

        debug!(host = %config.name, command = %config.command, "tool host spawned");

        Ok(Self {
            config,
            process,
            requests: Some(requests),
            writer,
            replies,
            reader,
            next_id: 1,
        })
    }

    /// Get the host name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Fetch the tool catalog.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        timeout(DEFAULT_TIMEOUT, self.request(METHOD_LIST_TOOLS, None::<()>))
            .await
            .map_err(|_| Error::Timeout)?
    }

    /// Call a tool by name.
    ///
    /// No deadline is applied here; wrap the future in a timeout. A reply
    /// that arrives after its caller gave up is discarded by the next request.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.request(METHOD_CALL_TOOL, Some(params)).await
    }

    /// Check if the host process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(None))
    }

    /// Shut the host down. Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<()> {
        // Closing stdin lets a well-behaved host exit on EOF.
        drop(self.requests.take());
        self.writer.abort();
        self.reader.abort();

        if self.is_running() {
            if let Err(e) = self.process.kill().await {
                warn!(host = %self.config.name, error = %e, "failed to kill tool host");
            }
        }
        Ok(())
    }

    // --- Internal methods ---

    fn next_request_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        RequestId::Number(id)
    }

    async fn request<P, R>(&mut self, method: &str, params: Option<P>) -> Result<R>
    where
        P: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p)?;
        }

        // Queued whole: a caller that gives up never leaves half a line on
        // the host's stdin.
        let request_json = serde_json::to_string(&request)?;
        self.requests
            .as_ref()
            .ok_or(Error::Closed)?
            .send(request_json)
            .await
            .map_err(|_| Error::ServerExited)?;

        let response = loop {
            let response = self.read_response().await?;
            if response.id.precedes(&id) {
                debug!(host = %self.config.name, stale = ?response.id, "discarding stale reply");
                continue;
            }
            break response;
        };

        if response.id != id {
            return Err(Error::InvalidResponse(format!(
                "response ID mismatch: expected {id:?}, got {:?}",
                response.id
            )));
        }

        let result_value = response.into_result()?;
        let result: R = serde_json::from_value(result_value)?;

        Ok(result)
    }

    async fn read_response(&mut self) -> Result<JsonRpcResponse> {
        let line = self.replies.recv().await.ok_or(Error::ServerExited)??;
        let response: JsonRpcResponse = serde_json::from_str(&line)?;
        Ok(response)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

/// Write queued requests to the host, one line each.
async fn write_requests(mut stdin: ChildStdin, mut queued: mpsc::Receiver<String>) {
    while let Some(line) = queued.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            debug!(error = %e, "tool host stdin closed");
            break;
        }
    }
}

/// Forward stdout lines to the requester.
///
/// Reading happens on its own task so that a requester giving up mid-reply
/// never loses part of a line. At most `MAX_OUTPUT_SIZE` bytes of a line are
/// buffered; a longer line is reported and skipped.
async fn read_replies(stdout: ChildStdout, tx: mpsc::Sender<Result<String>>) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        let reply = match read_bounded_line(&mut reader, &mut line).await {
            Ok(0) => break,
            Ok(_) if line.ends_with(b"\n") || line.len() <= MAX_OUTPUT_SIZE => {
                let text = String::from_utf8_lossy(&line).trim().to_string();
                if text.is_empty() {
                    continue;
                }
                Ok(text)
            }
            Ok(read) => match skip_line(&mut reader).await {
                Ok(rest) => Err(Error::OutputTooLarge {
                    size: read + rest,
                    max: MAX_OUTPUT_SIZE,
                }),
                Err(e) => Err(Error::Io(e)),
            },
            Err(e) => Err(Error::Io(e)),
        };
        let failed = matches!(reply, Err(Error::Io(_)));
        if tx.send(reply).await.is_err() || failed {
            break;
        }
    }
}

/// Read up to one byte past the line limit, newline included.
async fn read_bounded_line(
    reader: &mut BufReader<ChildStdout>,
    line: &mut Vec<u8>,
) -> std::io::Result<usize> {
    let limit = MAX_OUTPUT_SIZE as u64 + 1;
    reader.take(limit).read_until(b'\n', line).await
}

/// Discard the rest of an oversized line, returning how many bytes it had.
async fn skip_line(reader: &mut BufReader<ChildStdout>) -> std::io::Result<usize> {
    let mut skipped = 0;
    let mut chunk = Vec::new();
    loop {
        chunk.clear();
        let read = read_bounded_line(reader, &mut chunk).await?;
        skipped += read;
        if read == 0 || chunk.ends_with(b"\n") {
            return Ok(skipped);
        }
    }
}
