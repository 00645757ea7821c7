use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

const JSONRPC_VERSION: &str = "2.0";
const PROTOCOL_VERSION: &str = "2024-11-05";
const CLIENT_NAME: &str = "verdict";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
/// Failures surfaced by the stdio transport. A json-rpc `error` member is a
/// structured failure value like any other, never a panic.
pub enum McpError {
    #[error("MCP server command must be non-empty")]
    EmptyCommand,
    #[error("invalid MCP server command '{command}': {source}")]
    CommandParse {
        command: String,
        #[source]
        source: shell_words::ParseError,
    },
    #[error("failed to spawn MCP server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open {stream} for MCP server")]
    MissingPipe { stream: &'static str },
    #[error("client is closed")]
    Closed,
    #[error("failed to encode request for MCP server: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write request to MCP server: {0}")]
    Write(std::io::Error),
    #[error("MCP server closed its output stream before responding to '{method}'")]
    StreamClosed { method: String },
    #[error("timed out after {timeout_ms}ms waiting for response to '{method}'")]
    Timeout { method: String, timeout_ms: u64 },
    #[error("MCP server returned json-rpc error code={code} message={message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Unstarted,
    Started,
    Ready,
    Closed,
}

/// Stdio JSON-RPC client owning one MCP server child process.
///
/// Public operations auto-promote the connection through
/// `Unstarted -> Started -> Ready`; `stop` (or drop) moves it to `Closed`.
/// One request is outstanding at a time and every request carries a strictly
/// increasing integer id that never resets for the client's lifetime.
pub struct StdioClient {
    command: Vec<String>,
    timeout: Duration,
    stop_grace: Duration,
    state: ClientState,
    next_request_id: u64,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    lines: Option<Receiver<String>>,
}

impl StdioClient {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            state: ClientState::Unstarted,
            next_request_id: 1,
            child: None,
            stdin: None,
            lines: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Spawns the server process and wires up the stdout/stderr readers.
    /// A no-op when the process is already running.
    pub fn start(&mut self) -> Result<(), McpError> {
        match self.state {
            ClientState::Started | ClientState::Ready => return Ok(()),
            ClientState::Closed => return Err(McpError::Closed),
            ClientState::Unstarted => {}
        }

        let command = resolve_command(&self.command)?;
        let mut child = Command::new(&command[0])
            .args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| McpError::Spawn {
                command: command.join(" "),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(McpError::MissingPipe { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(McpError::MissingPipe { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(McpError::MissingPipe { stream: "stderr" })?;

        let (line_tx, line_rx) = mpsc::channel();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });
        // Drained so a chatty server cannot deadlock on a full stderr pipe.
        thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                debug!("mcp server stderr: {line}");
            }
        });

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.lines = Some(line_rx);
        self.state = ClientState::Started;
        Ok(())
    }

    /// Performs the MCP handshake: `initialize` request, then the
    /// `notifications/initialized` notification. Starts the process first if
    /// needed.
    pub fn initialize(&mut self) -> Result<(), McpError> {
        match self.state {
            ClientState::Ready => return Ok(()),
            ClientState::Closed => return Err(McpError::Closed),
            ClientState::Unstarted => self.start()?,
            ClientState::Started => {}
        }

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        self.send_request("initialize", Some(params))?;
        self.send_notification("notifications/initialized")?;
        self.state = ClientState::Ready;
        Ok(())
    }

    /// Fetches the server's tool descriptors. Returns an empty list when the
    /// result carries no `tools` array.
    pub fn list_tools(&mut self) -> Result<Vec<Value>, McpError> {
        self.ensure_ready()?;
        let result = self.send_request("tools/list", None)?;
        Ok(result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Invokes one tool and returns the raw result object.
    pub fn call_tool(&mut self, name: &str, arguments: &Value) -> Result<Value, McpError> {
        self.ensure_ready()?;
        self.send_request(
            "tools/call",
            Some(json!({
                "name": name,
                "arguments": arguments,
            })),
        )
    }

    /// Requests graceful termination, then force-kills after the grace
    /// period. Idempotent; also invoked on drop so teardown runs on every
    /// exit path.
    pub fn stop(&mut self) {
        // Closing stdin is the conventional shutdown request for a stdio
        // server: EOF on its input loop.
        self.stdin = None;
        self.lines = None;
        if let Some(mut child) = self.child.take() {
            match child.wait_timeout(self.stop_grace) {
                Ok(Some(_status)) => {}
                Ok(None) => {
                    if let Err(error) = child.kill() {
                        warn!("failed to kill MCP server process: {error}");
                    }
                    let _ = child.wait();
                }
                Err(error) => {
                    warn!("failed to wait for MCP server process: {error}");
                    let _ = child.kill();
                }
            }
        }
        self.state = ClientState::Closed;
    }

    fn ensure_ready(&mut self) -> Result<(), McpError> {
        if self.state == ClientState::Ready {
            return Ok(());
        }
        self.initialize()
    }

    fn send_request(&mut self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut frame = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": request_id,
            "method": method,
        });
        if let Some(params) = params {
            frame["params"] = params;
        }
        self.write_frame(&frame)?;
        self.await_response(method, request_id)
    }

    fn send_notification(&mut self, method: &str) -> Result<(), McpError> {
        let frame = json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
        });
        self.write_frame(&frame)
    }

    fn write_frame(&mut self, frame: &Value) -> Result<(), McpError> {
        let stdin = self.stdin.as_mut().ok_or(McpError::Closed)?;
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        stdin.write_all(line.as_bytes()).map_err(McpError::Write)?;
        stdin.flush().map_err(McpError::Write)
    }

    /// Reads response lines until one matches the outstanding request id.
    /// Unparseable lines and foreign ids are skipped; the loop polls in
    /// short intervals so a silent server fails with a timeout instead of
    /// stalling the run.
    fn await_response(&mut self, method: &str, request_id: u64) -> Result<Value, McpError> {
        let lines = self.lines.as_ref().ok_or(McpError::Closed)?;
        let deadline = Instant::now() + self.timeout;

        loop {
            let line = match lines.recv_timeout(POLL_INTERVAL) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        return Err(McpError::Timeout {
                            method: method.to_string(),
                            timeout_ms: self.timeout.as_millis() as u64,
                        });
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(McpError::StreamClosed {
                        method: method.to_string(),
                    });
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(response) = serde_json::from_str::<Value>(trimmed) else {
                debug!("skipping non-json server output: {trimmed}");
                continue;
            };
            if response.get("id").and_then(Value::as_u64) != Some(request_id) {
                debug!("skipping response with foreign id for '{method}'");
                continue;
            }
            if let Some(error) = response.get("error") {
                return Err(McpError::Rpc {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown json-rpc error")
                        .to_string(),
                    data: error.get("data").cloned(),
                });
            }
            return Ok(response.get("result").cloned().unwrap_or_else(|| json!({})));
        }
    }
}

impl Drop for StdioClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Tokenizes a one-element command string with embedded spaces; a pre-split
/// argument list passes through untouched.
fn resolve_command(command: &[String]) -> Result<Vec<String>, McpError> {
    let resolved = if command.len() == 1 && command[0].contains(' ') {
        shell_words::split(&command[0]).map_err(|source| McpError::CommandParse {
            command: command[0].clone(),
            source,
        })?
    } else {
        command.to_vec()
    };
    if resolved.is_empty() || resolved[0].trim().is_empty() {
        return Err(McpError::EmptyCommand);
    }
    Ok(resolved)
}

/// Connectivity probe: handshake, list the catalog, log what was found.
/// Returns the tool count on success. The client is torn down on every path.
pub fn test_connection(command: &[String]) -> Result<usize, McpError> {
    let mut client = StdioClient::new(command.to_vec());
    client.initialize()?;
    let tools = client.list_tools()?;
    info!("connected, found {} tool(s)", tools.len());
    for tool in &tools {
        info!(
            "  - {}: {}",
            tool.get("name").and_then(|v| v.as_str()).unwrap_or("unknown"),
            tool.get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("no description"),
        );
    }
    Ok(tools.len())
}
