//! Permission bridge server
//!
//! Listens on a Unix socket for requests from the helper process. Each
//! connection carries one request line and gets one response line. Cached
//! grants are answered immediately; everything else goes to the host.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::{PermissionCache, PermissionDecision};
use super::protocol::{BridgeRequest, BridgeResponse, PERMISSION_REQUEST};
use super::target::normalize_target;
use crate::error::{Error, Result};
use crate::host::{ElicitRequest, Host};

/// Denial message when the human refuses or dismisses the prompt.
pub const DENIED_BY_USER: &str = "Permission denied by user";

static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

/// Permission requests seen by one bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionCounts {
    /// Requests received (cache hits included)
    pub requested: u64,
    /// Requests granted
    pub granted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requested: AtomicU64,
    granted: AtomicU64,
}

/// Decides permission requests: cache first, then the host.
pub struct PermissionGate {
    host: Arc<dyn Host>,
    cache: Arc<PermissionCache>,
    workspace_root: PathBuf,
    counters: Counters,
}

impl PermissionGate {
    /// Gate resolving relative paths against `workspace_root`
    pub fn new(host: Arc<dyn Host>, cache: Arc<PermissionCache>, workspace_root: PathBuf) -> Self {
        Self {
            host,
            cache,
            workspace_root,
            counters: Counters::default(),
        }
    }

    /// Decide whether `tool` may run with `input`.
    pub async fn decide(&self, tool: &str, input: &Value) -> BridgeResponse {
        self.counters.requested.fetch_add(1, Ordering::Relaxed);
        let target = normalize_target(tool, input, &self.workspace_root);

        if let Some(hit) = self.cache.check(tool, &target) {
            info!(tool, target = %target, decision = %hit.decision, "permission granted from cache");
            self.counters.granted.fetch_add(1, Ordering::Relaxed);
            return BridgeResponse::granted(hit.decision);
        }

        let request = ElicitRequest::select(
            format!("Allow {tool} on {target}?"),
            PermissionDecision::ALL
                .iter()
                .map(|d| d.label().to_string())
                .collect(),
            false,
        );
        let answer = match self.host.elicit(request).await {
            Ok(response) => response.accepted_value().map(str::to_string),
            Err(e) => {
                warn!(tool, error = %e, "permission prompt failed, denying");
                None
            }
        };
        let decision = answer.map(|value| {
            PermissionDecision::from_label(&value).unwrap_or_else(|| {
                warn!(tool, answer = %value, "unrecognized permission answer, allowing once");
                PermissionDecision::AllowOnce
            })
        });

        match decision {
            Some(decision) if decision.is_granted() => {
                if let Err(e) = self.cache.store(tool, &target, decision) {
                    error!(tool, error = %e, "failed to save permission");
                }
                self.counters.granted.fetch_add(1, Ordering::Relaxed);
                info!(tool, target = %target, %decision, "permission granted");
                BridgeResponse::granted(decision)
            }
            _ => {
                info!(tool, target = %target, "permission denied");
                BridgeResponse::denied(DENIED_BY_USER)
            }
        }
    }

    /// Decode one request line and decide it.
    pub async fn handle_line(&self, line: &str) -> BridgeResponse {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => return BridgeResponse::denied(format!("Invalid JSON: {e}")),
        };
        if value.get("type").and_then(Value::as_str) != Some(PERMISSION_REQUEST) {
            return BridgeResponse::denied("Invalid request type");
        }
        match serde_json::from_value::<BridgeRequest>(value) {
            Ok(request) => self.decide(&request.tool_name, &request.tool_input).await,
            Err(e) => BridgeResponse::denied(format!("Invalid request: {e}")),
        }
    }

    /// Requests seen so far
    #[must_use]
    pub fn counts(&self) -> PermissionCounts {
        PermissionCounts {
            requested: self.counters.requested.load(Ordering::Relaxed),
            granted: self.counters.granted.load(Ordering::Relaxed),
        }
    }
}

/// Running bridge server. The socket file is removed on drop.
pub struct PermissionBridge {
    socket_path: PathBuf,
    gate: Arc<PermissionGate>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PermissionBridge {
    /// Listen on a fresh socket in the system temp directory.
    pub fn start(gate: PermissionGate, read_timeout: Duration) -> Result<Self> {
        let name = format!(
            "parley-{}-{}.sock",
            std::process::id(),
            SOCKET_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        Self::bind(std::env::temp_dir().join(name), gate, read_timeout)
    }

    /// Listen on `socket_path`, replacing a stale socket file.
    pub fn bind(socket_path: PathBuf, gate: PermissionGate, read_timeout: Duration) -> Result<Self> {
        match std::fs::remove_file(&socket_path) {
            Ok(()) => debug!(path = %socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Bridge(e)),
        }
        let listener = UnixListener::bind(&socket_path).map_err(Error::Bridge)?;
        info!(path = %socket_path.display(), "permission bridge listening");

        let gate = Arc::new(gate);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&gate),
            read_timeout,
            shutdown.clone(),
        ));

        Ok(Self {
            socket_path,
            gate,
            shutdown,
            task: Some(task),
        })
    }

    /// Socket the helper should connect to
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Requests seen so far
    #[must_use]
    pub fn counts(&self) -> PermissionCounts {
        self.gate.counts()
    }

    /// Stop accepting connections and remove the socket file. Requests
    /// already being handled run to completion.
    pub async fn stop(mut self) -> PermissionCounts {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "bridge accept loop panicked");
            }
        }
        self.remove_socket();
        self.gate.counts()
    }

    fn remove_socket(&self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.socket_path.display(), error = %e, "failed to remove bridge socket");
            }
        }
    }
}

impl Drop for PermissionBridge {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.remove_socket();
    }
}

async fn accept_loop(
    listener: UnixListener,
    gate: Arc<PermissionGate>,
    read_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let gate = Arc::clone(&gate);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, &gate, read_timeout).await {
                            debug!(error = %e, "bridge connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "bridge accept failed"),
            },
        }
    }
    debug!("permission bridge stopped");
}

async fn serve_connection(
    stream: UnixStream,
    gate: &PermissionGate,
    read_timeout: Duration,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    let response = match tokio::time::timeout(read_timeout, reader.read_line(&mut line)).await {
        Err(_) => {
            warn!(timeout = ?read_timeout, "bridge request timed out");
            BridgeResponse::denied("Request timed out")
        }
        Ok(Err(e)) => return Err(Error::Bridge(e)),
        Ok(Ok(0)) => return Ok(()),
        Ok(Ok(_)) => gate.handle_line(line.trim()).await,
    };

    let mut out = serde_json::to_string(&response)?;
    out.push('\n');
    write_half
        .write_all(out.as_bytes())
        .await
        .map_err(Error::Bridge)?;
    write_half.flush().await.map_err(Error::Bridge)
}
