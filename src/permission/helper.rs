//! Permission helper process
//!
//! The agent is configured to call an MCP tool before running other tools.
//! That tool is served by `parley approve`, a short-lived process speaking
//! JSON-RPC 2.0 over stdio. It forwards each call to the bridge socket of
//! the orchestrator that launched the agent and reports allow or deny in
//! the shape the agent expects.
//!
//! The server routes MCP protocol methods:
//! - `initialize` -- returns server capabilities
//! - `notifications/*` -- no response
//! - `tools/list` -- the single `approve` tool
//! - `tools/call` -- asks the bridge

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use super::protocol::{BridgeRequest, BridgeResponse};
use crate::error::{Error, Result};

/// MCP server name used in the generated config
pub const SERVER_NAME: &str = "perm";
/// The single tool the helper exposes
pub const TOOL_NAME: &str = "approve";

/// How long the helper waits for a human decision by default.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Connection retries after the first attempt, by default.
pub const DEFAULT_RETRIES: u32 = 3;
/// Base backoff delay, by default.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

// Standard JSON-RPC error codes.
const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Client side of the bridge socket
#[derive(Debug, Clone)]
pub struct BridgeClient {
    socket_path: PathBuf,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl BridgeClient {
    /// Client with default timeout and retry settings
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the per-request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the retry count and base delay
    #[must_use]
    pub const fn with_retries(mut self, retries: u32, retry_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Sleep before each retry: `delay * 2^n`.
    #[must_use]
    pub fn backoff_delays(&self) -> Vec<Duration> {
        (0..self.retries)
            .map(|n| self.retry_delay.saturating_mul(2u32.saturating_pow(n)))
            .collect()
    }

    /// Ask the bridge. Never fails: unreachable bridges, timeouts and
    /// garbage replies all come back as a denial.
    pub async fn request_permission(&self, tool_name: &str, tool_input: &Value) -> BridgeResponse {
        let request = BridgeRequest::permission(tool_name, tool_input.clone());
        let mut delays = self.backoff_delays().into_iter();

        let stream = loop {
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => break stream,
                Err(e) => {
                    let Some(delay) = delays.next() else {
                        warn!(path = %self.socket_path.display(), error = %e, "permission bridge unreachable, denying");
                        return BridgeResponse::denied(format!("Permission bridge unavailable: {e}"));
                    };
                    debug!(error = %e, delay = ?delay, "bridge connect failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        };

        match tokio::time::timeout(self.timeout, exchange(stream, &request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "permission bridge exchange failed, denying");
                BridgeResponse::denied(format!("Permission bridge error: {e}"))
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "permission request timed out, denying");
                BridgeResponse::denied("Permission request timed out")
            }
        }
    }
}

async fn exchange(stream: UnixStream, request: &BridgeRequest) -> Result<BridgeResponse> {
    let (read_half, mut write_half) = stream.into_split();
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    write_half
        .write_all(line.as_bytes())
        .await
        .map_err(Error::Bridge)?;
    write_half.flush().await.map_err(Error::Bridge)?;

    let mut reply = String::new();
    BufReader::new(read_half)
        .read_line(&mut reply)
        .await
        .map_err(Error::Bridge)?;
    Ok(serde_json::from_str(reply.trim())?)
}

/// Translate a bridge response into the permission-prompt tool result.
#[must_use]
pub fn tool_result(response: &BridgeResponse, tool_input: &Value) -> Value {
    if response.granted {
        json!({ "behavior": "allow", "updatedInput": tool_input })
    } else {
        json!({
            "behavior": "deny",
            "message": response.message.as_deref().unwrap_or("Permission denied"),
        })
    }
}

/// Tool name and input from `tools/call` arguments. The input may be given
/// as `tool_input` or `input`; otherwise all remaining arguments are used.
#[must_use]
pub fn split_arguments(arguments: &Value) -> (String, Value) {
    let tool_name = arguments
        .get("tool_name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let input = arguments
        .get("tool_input")
        .or_else(|| arguments.get("input"))
        .cloned()
        .unwrap_or_else(|| {
            let rest: Map<String, Value> = arguments
                .as_object()
                .into_iter()
                .flatten()
                .filter(|(k, _)| k.as_str() != "tool_name")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(rest)
        });
    (tool_name, input)
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be `"2.0"`.
    pub jsonrpc: String,
    /// The method name.
    pub method: String,
    /// Optional parameters.
    #[serde(default)]
    pub params: Option<Value>,
    /// Request ID. Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Mirrors the request ID.
    pub id: Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// MCP stdio server exposing the `approve` tool
pub struct ApproverServer {
    client: BridgeClient,
}

impl ApproverServer {
    /// Server forwarding to `client`
    #[must_use]
    pub const fn new(client: BridgeClient) -> Self {
        Self { client }
    }

    /// Serve until `input` reaches EOF.
    pub async fn run(
        &self,
        input: impl AsyncBufRead + Unpin,
        mut output: impl AsyncWrite + Unpin,
    ) -> anyhow::Result<()> {
        let mut lines = input.lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(line) {
                Ok(request) => request,
                Err(e) => {
                    debug!(error = %e, "unparseable JSON-RPC line");
                    let response = JsonRpcResponse::failure(Value::Null, PARSE_ERROR, "Parse error");
                    write_response(&mut output, &response).await?;
                    continue;
                }
            };

            // Notifications have no id and get no response
            let Some(id) = request.id else {
                continue;
            };

            let response = match request.method.as_str() {
                "initialize" => Self::handle_initialize(id),
                "tools/list" => Self::handle_tools_list(id),
                "tools/call" => self.handle_tools_call(id, request.params).await,
                other => {
                    JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {other}"))
                }
            };
            write_response(&mut output, &response).await?;
        }

        Ok(())
    }

    fn handle_initialize(id: Value) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        )
    }

    fn handle_tools_list(id: Value) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "tools": [{
                    "name": TOOL_NAME,
                    "description": "Ask the user whether a tool call may proceed",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "tool_name": { "type": "string" },
                            "tool_input": { "type": "object" },
                            "input": { "type": "object" },
                        },
                        "required": ["tool_name"],
                    },
                }],
            }),
        )
    }

    async fn handle_tools_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::failure(id, INVALID_PARAMS, "Missing params for tools/call");
        };
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        if name != TOOL_NAME {
            return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("Unknown tool: {name}"));
        }

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let (tool_name, tool_input) = split_arguments(&arguments);
        let response = self.client.request_permission(&tool_name, &tool_input).await;
        info!(tool = %tool_name, granted = response.granted, "permission answered");

        let text = tool_result(&response, &tool_input).to_string();
        JsonRpcResponse::success(id, json!({ "content": [{ "type": "text", "text": text }] }))
    }
}

async fn write_response(
    writer: &mut (impl AsyncWrite + Unpin),
    response: &JsonRpcResponse,
) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(response)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// How the agent should launch the helper
#[derive(Debug, Clone)]
pub struct HelperLaunch {
    /// Executable providing the `approve` subcommand
    pub program: PathBuf,
    /// Bridge socket
    pub socket_path: PathBuf,
    /// Human decision timeout
    pub timeout: Duration,
    /// Connection retries after the first attempt
    pub retries: u32,
    /// Base backoff delay
    pub retry_delay: Duration,
}

impl HelperLaunch {
    /// MCP config registering the helper as server [`SERVER_NAME`].
    #[must_use]
    pub fn mcp_config(&self) -> Value {
        json!({
            "mcpServers": {
                SERVER_NAME: {
                    "command": self.program.to_string_lossy(),
                    "args": [
                        "approve",
                        "--socket", self.socket_path.to_string_lossy(),
                        "--timeout-secs", self.timeout.as_secs().to_string(),
                        "--retries", self.retries.to_string(),
                        "--retry-delay-ms", self.retry_delay.as_millis().to_string(),
                    ],
                },
            },
        })
    }

    /// Write the MCP config to `path`.
    pub fn write_config(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.mcp_config())?;
        std::fs::write(path, json).map_err(Error::Bridge)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::host::ElicitResponse;
    use crate::permission::bridge::{PermissionBridge, PermissionGate};
    use crate::permission::cache::PermissionCache;
    use crate::testutil::ScriptedHost;
    use tempfile::TempDir;

    fn bridge_with(dir: &TempDir, responses: Vec<ElicitResponse>) -> PermissionBridge {
        let gate = PermissionGate::new(
            Arc::new(ScriptedHost::new(responses)),
            Arc::new(PermissionCache::in_memory()),
            dir.path().to_path_buf(),
        );
        PermissionBridge::bind(dir.path().join("b.sock"), gate, Duration::from_secs(5)).unwrap()
    }

    async fn serve(server: &ApproverServer, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        server.run(input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_backoff_doubles() {
        let client = BridgeClient::new("/x");
        assert_eq!(
            client.backoff_delays(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        let none = BridgeClient::new("/x").with_retries(0, Duration::from_millis(5));
        assert!(none.backoff_delays().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_bridge_denies_after_backoff() {
        let dir = TempDir::new().unwrap();
        let client = BridgeClient::new(dir.path().join("missing.sock"));

        let start = Instant::now();
        let response = client.request_permission("Bash", &json!({"command": "ls"})).await;
        let elapsed = start.elapsed();

        assert!(!response.granted);
        assert!(response.message.unwrap().contains("unavailable"));
        assert!(elapsed >= Duration::from_millis(700), "elapsed: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_client_gets_grant_from_bridge() {
        let dir = TempDir::new().unwrap();
        let bridge = bridge_with(&dir, vec![ElicitResponse::accept("Allow Once")]);
        let client = BridgeClient::new(bridge.socket_path());
        let response = client.request_permission("Read", &json!({"file_path": "a"})).await;
        assert!(response.granted);
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_garbage_reply_is_denied() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await;
            stream.write_all(b"not json\n").await.unwrap();
        });

        let response = BridgeClient::new(&path)
            .request_permission("Bash", &json!({}))
            .await;
        assert!(!response.granted);
    }

    #[tokio::test]
    async fn test_slow_bridge_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slow.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let response = BridgeClient::new(&path)
            .with_timeout(Duration::from_millis(100))
            .request_permission("Bash", &json!({}))
            .await;
        assert_eq!(
            response.message.as_deref(),
            Some("Permission request timed out")
        );
    }

    #[test]
    fn test_split_arguments_conventions() {
        let (name, input) =
            split_arguments(&json!({"tool_name": "Bash", "tool_input": {"command": "ls"}}));
        assert_eq!(name, "Bash");
        assert_eq!(input, json!({"command": "ls"}));

        let (_, input) = split_arguments(&json!({"tool_name": "Bash", "input": {"command": "pwd"}}));
        assert_eq!(input, json!({"command": "pwd"}));

        let (_, input) = split_arguments(&json!({"tool_name": "Read", "file_path": "x"}));
        assert_eq!(input, json!({"file_path": "x"}));

        let (name, _) = split_arguments(&json!({}));
        assert_eq!(name, "unknown");
    }

    #[test]
    fn test_tool_result_shapes() {
        let input = json!({"command": "ls"});
        assert_eq!(
            tool_result(
                &BridgeResponse::granted(crate::permission::PermissionDecision::AllowOnce),
                &input
            ),
            json!({"behavior": "allow", "updatedInput": {"command": "ls"}})
        );
        assert_eq!(
            tool_result(&BridgeResponse::denied("nope"), &input),
            json!({"behavior": "deny", "message": "nope"})
        );
    }

    #[tokio::test]
    async fn test_mcp_initialize_list_and_notifications() {
        let server = ApproverServer::new(BridgeClient::new("/nonexistent.sock"));
        let responses = serve(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#, "\n",
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#, "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#, "\n",
                "\n",
                r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#, "\n",
                "garbage\n",
            ),
        )
        .await;

        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0]["id"], 1);
        assert!(responses[0]["result"]["capabilities"]["tools"].is_object());
        assert_eq!(responses[1]["result"]["tools"][0]["name"], TOOL_NAME);
        assert_eq!(responses[2]["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(responses[3]["error"]["code"], PARSE_ERROR);
        assert!(responses[3]["id"].is_null());
    }

    #[tokio::test]
    async fn test_mcp_tools_call_forwards_to_bridge() {
        let dir = TempDir::new().unwrap();
        let bridge = bridge_with(&dir, vec![ElicitResponse::accept("Deny")]);
        let server = ApproverServer::new(BridgeClient::new(bridge.socket_path()));

        let responses = serve(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"approve","arguments":{"tool_name":"Bash","input":{"command":"rm -rf build"}}}}"#,
                "\n"
            ),
        )
        .await;

        let text = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
        let result: Value = serde_json::from_str(text).unwrap();
        assert_eq!(result["behavior"], "deny");
        assert_eq!(result["message"], "Permission denied by user");
        bridge.stop().await;
    }

    #[tokio::test]
    async fn test_mcp_unknown_tool_is_error() {
        let server = ApproverServer::new(BridgeClient::new("/nonexistent.sock"));
        let responses = serve(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"other"}}"#,
                "\n"
            ),
        )
        .await;
        assert_eq!(responses[0]["error"]["code"], INVALID_PARAMS);
    }

    #[test]
    fn test_mcp_config_shape() {
        let launch = HelperLaunch {
            program: PathBuf::from("/usr/bin/parley"),
            socket_path: PathBuf::from("/tmp/p.sock"),
            timeout: Duration::from_secs(120),
            retries: 3,
            retry_delay: Duration::from_millis(100),
        };
        let config = launch.mcp_config();
        let server = &config["mcpServers"][SERVER_NAME];
        assert_eq!(server["command"], "/usr/bin/parley");
        assert_eq!(
            server["args"],
            json!([
                "approve", "--socket", "/tmp/p.sock", "--timeout-secs", "120",
                "--retries", "3", "--retry-delay-ms", "100"
            ])
        );

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp.json");
        launch.write_config(&path).unwrap();
        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, config);
    }
}
