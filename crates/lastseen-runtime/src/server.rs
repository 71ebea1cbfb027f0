//! UDS JSON-RPC server: minimal hand-rolled implementation.
//! Connection-per-request, newline-delimited JSON.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use lastseen_core::{ErrorKind, PresenceSnapshot, WatchedSubject};
use lastseen_gateway::{DispatchError, Dispatcher};
use lastseen_store::{Store, StoreError};

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;
const PROBE_NOT_FOUND: i64 = -32001;
const PROBE_FAILED: i64 = -32002;
const STORAGE_FAILED: i64 = -32003;

/// Everything a request handler can reach.
pub struct ServerContext {
    pub dispatcher: Dispatcher,
    pub store: Arc<Store>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RpcError {
    pub code: i64,
    pub message: String,
    pub kind: Option<ErrorKind>,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    fn to_json(&self) -> Value {
        match self.kind {
            Some(kind) => json!({"code": self.code, "message": self.message, "data": {"kind": kind}}),
            None => json!({"code": self.code, "message": self.message}),
        }
    }
}

impl From<DispatchError> for RpcError {
    fn from(e: DispatchError) -> Self {
        let code = match e {
            DispatchError::ProbeNotFound { .. } => PROBE_NOT_FOUND,
            DispatchError::Probe { .. } => PROBE_FAILED,
        };
        Self {
            code,
            message: e.to_string(),
            kind: Some(e.kind()),
        }
    }
}

impl From<StoreError> for RpcError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidSubject => Self::invalid_params(e.to_string()),
            _ => Self {
                code: STORAGE_FAILED,
                message: e.to_string(),
                kind: Some(ErrorKind::Storage),
            },
        }
    }
}

/// Claim the socket path: create its directory, clear a stale socket, bind.
///
/// Fails without touching the path when another daemon answers on it.
pub async fn bind_socket(socket_path: &str) -> anyhow::Result<UnixListener> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("UDS server listening on {socket_path}");
    Ok(listener)
}

/// Run the UDS JSON-RPC server on a bound listener.
pub async fn run_server(listener: UnixListener, ctx: Arc<ServerContext>) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        // Status queries can take tens of seconds; each connection gets its own task.
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, ctx).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: tokio::net::UnixStream,
    ctx: Arc<ServerContext>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<Value>(line.trim()) {
        Ok(request) => {
            let method = request["method"].as_str().unwrap_or("");
            let id = request["id"].clone();
            tracing::debug!(method, "rpc request");
            match handle_request(&ctx, method, &request["params"]).await {
                Ok(result) => json!({"jsonrpc": "2.0", "result": result, "id": id}),
                Err(e) => json!({"jsonrpc": "2.0", "error": e.to_json(), "id": id}),
            }
        }
        Err(e) => {
            let err = RpcError::new(PARSE_ERROR, format!("parse error: {e}"));
            json!({"jsonrpc": "2.0", "error": err.to_json(), "id": null})
        }
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SubjectParams {
    user: String,
    source: String,
}

#[derive(Deserialize)]
struct UserParams {
    user: String,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Deserialize)]
struct ArchiveParams {
    #[serde(default)]
    user: Vec<String>,
    #[serde(default)]
    source: Vec<String>,
}

#[derive(Deserialize)]
struct RecordParams {
    user: String,
    source: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

pub(crate) async fn handle_request(
    ctx: &ServerContext,
    method: &str,
    params: &Value,
) -> Result<Value, RpcError> {
    match method {
        "ping" => Ok(json!("ok")),
        "list_sources" => Ok(json!(ctx.dispatcher.sources())),
        "watch" => {
            let SubjectParams { user, source } = parse_params(params)?;
            let subject = with_store(ctx, move |s| s.watch(&user, &source)).await?;
            tracing::info!(%subject, "watching");
            to_value(&subject)
        }
        "unwatch" => {
            let UserParams { user, source } = parse_params(params)?;
            let removed = with_store(ctx, move |s| s.unwatch(&user, source.as_deref())).await?;
            Ok(json!(removed))
        }
        "list_watched" => {
            let watched = with_store(ctx, |s| s.list_watched()).await?;
            to_value(&watched)
        }
        "status" => {
            let UserParams { user, source } = parse_params(params)?;
            match source {
                Some(source) => {
                    let observed_at = ctx.dispatcher.get_status(&user, &source).await?;
                    to_value(&PresenceSnapshot::new(
                        &WatchedSubject::new(user, source),
                        observed_at,
                    ))
                }
                None => to_value(&ctx.dispatcher.get_all_statuses(&user).await?),
            }
        }
        "archive" => {
            let ArchiveParams { user, source } = parse_params(params)?;
            if user.is_empty() && source.is_empty() {
                return Err(RpcError::invalid_params(
                    "at least one user or source filter is required",
                ));
            }
            let records = with_store(ctx, move |s| {
                let mut records = Vec::new();
                match (user.is_empty(), source.is_empty()) {
                    (false, false) => {
                        for u in &user {
                            for src in &source {
                                records.extend(s.archive_by_user_and_source(u, src)?);
                            }
                        }
                    }
                    (false, true) => {
                        for u in &user {
                            records.extend(s.archive_by_user(u)?);
                        }
                    }
                    _ => {
                        for src in &source {
                            records.extend(s.archive_by_source(src)?);
                        }
                    }
                }
                Ok(records)
            })
            .await?;
            to_value(&records)
        }
        "record" => {
            let RecordParams {
                user,
                source,
                timestamp,
            } = parse_params(params)?;
            let subject = WatchedSubject::new(user, source);
            if !subject.is_valid() {
                return Err(RpcError::invalid_params("user and source must be non-empty"));
            }
            let snapshot = PresenceSnapshot::new(&subject, timestamp.unwrap_or_else(Utc::now));
            let record = with_store(ctx, move |s| s.append_archive(&snapshot)).await?;
            to_value(&record)
        }
        _ => Err(RpcError::new(METHOD_NOT_FOUND, "method not found")),
    }
}

fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, RpcError> {
    let params = if params.is_null() {
        json!({})
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(format!("invalid params: {e}")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))
}

/// Run a store operation on the blocking pool.
async fn with_store<T, F>(ctx: &ServerContext, op: F) -> Result<T, RpcError>
where
    T: Send + 'static,
    F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(&ctx.store);
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?
        .map_err(RpcError::from)
}
