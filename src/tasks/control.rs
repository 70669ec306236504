use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config_model::ControlAction;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::select;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{EngineStatus, WallpaperChanger};

const STATUS_COMMAND: &str = "status";
const MAX_REQUEST_BYTES: u64 = 64 * 1024;
const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// One request per connection: either a named command or a hotkey trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hotkey: Option<String>,
}

impl ControlRequest {
    pub fn command(name: impl Into<String>) -> Self {
        Self {
            command: Some(name.into()),
            hotkey: None,
        }
    }

    pub fn hotkey(trigger: impl Into<String>) -> Self {
        Self {
            command: None,
            hotkey: Some(trigger.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

impl ControlReply {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            status: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            status: None,
        }
    }
}

/// What the control socket drives.
pub trait ControlTarget: Send + Sync {
    fn dispatch(&self, action: ControlAction);
    fn status(&self) -> EngineStatus;
}

impl ControlTarget for WallpaperChanger {
    fn dispatch(&self, action: ControlAction) {
        WallpaperChanger::dispatch(self, action);
    }

    fn status(&self) -> EngineStatus {
        WallpaperChanger::status(self)
    }
}

/// Resolves and runs one request.
pub fn handle_request<T>(
    target: &T,
    hotkeys: &BTreeMap<String, ControlAction>,
    request: &ControlRequest,
) -> ControlReply
where
    T: ControlTarget + ?Sized,
{
    let action = match (&request.command, &request.hotkey) {
        (Some(command), None) if command.trim() == STATUS_COMMAND => {
            return match serde_json::to_value(target.status()) {
                Ok(status) => ControlReply {
                    ok: true,
                    message: None,
                    status: Some(status),
                },
                Err(err) => ControlReply::error(format!("failed to encode status: {err}")),
            };
        }
        (Some(command), None) => match command.parse::<ControlAction>() {
            Ok(action) => action,
            Err(err) => return ControlReply::error(err.to_string()),
        },
        (None, Some(trigger)) => match hotkeys.get(trigger.trim()) {
            Some(action) => *action,
            None => return ControlReply::error(format!("no action bound to hotkey '{trigger}'")),
        },
        _ => return ControlReply::error("expected exactly one of 'command' or 'hotkey'"),
    };
    info!(%action, "control action");
    target.dispatch(action);
    ControlReply::ok(action.as_str())
}

/// Accepts control connections on `path` until `cancel` fires. A stale
/// socket file is replaced on bind and removed on the way out.
pub async fn serve<T>(
    path: PathBuf,
    target: Arc<T>,
    hotkeys: BTreeMap<String, ControlAction>,
    cancel: CancellationToken,
) -> Result<()>
where
    T: ControlTarget + ?Sized + 'static,
{
    if path.exists() {
        debug!(path = %path.display(), "removing stale control socket");
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("failed to bind control socket at {}", path.display()))?;
    info!(path = %path.display(), "control socket listening");

    let hotkeys = Arc::new(hotkeys);
    loop {
        select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let target = Arc::clone(&target);
                    let hotkeys = Arc::clone(&hotkeys);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, &*target, &hotkeys).await {
                            warn!(error = %err, "control connection failed");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "control socket accept failed"),
            },
        }
    }

    drop(listener);
    if let Err(err) = std::fs::remove_file(&path) {
        warn!(path = %path.display(), error = %err, "failed to remove control socket");
    }
    info!("control socket closed");
    Ok(())
}

async fn handle_connection<T>(
    stream: UnixStream,
    target: &T,
    hotkeys: &BTreeMap<String, ControlAction>,
) -> Result<()>
where
    T: ControlTarget + ?Sized,
{
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half.take(MAX_REQUEST_BYTES));
    let mut line = String::new();
    timeout(CLIENT_TIMEOUT, reader.read_line(&mut line))
        .await
        .context("timed out reading control request")??;

    let reply = match serde_json::from_str::<ControlRequest>(line.trim()) {
        Ok(request) => handle_request(target, hotkeys, &request),
        Err(err) => ControlReply::error(format!("invalid request: {err}")),
    };
    let mut encoded = serde_json::to_vec(&reply)?;
    encoded.push(b'\n');
    write_half.write_all(&encoded).await?;
    write_half.shutdown().await?;
    Ok(())
}

/// Sends one request to a running daemon and returns its reply.
pub async fn send(path: &Path, request: &ControlRequest) -> Result<ControlReply> {
    let stream = UnixStream::connect(path).await.with_context(|| {
        format!("failed to connect to control socket at {}", path.display())
    })?;
    let (read_half, mut write_half) = stream.into_split();
    let mut encoded = serde_json::to_vec(request)?;
    encoded.push(b'\n');
    write_half
        .write_all(&encoded)
        .await
        .context("failed to send control request")?;

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    timeout(CLIENT_TIMEOUT, reader.read_line(&mut line))
        .await
        .context("timed out waiting for control reply")??;
    if line.trim().is_empty() {
        bail!("control socket closed without a reply");
    }
    Ok(serde_json::from_str(line.trim())?)
}
