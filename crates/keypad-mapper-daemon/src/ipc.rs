//! IPC server for daemon communication
//!
//! Provides a Unix domain socket for the CLI and external tools (status bars,
//! settings panels) to inspect and change the running engine. One JSON
//! request per connection, one JSON response per line.

use std::io::{BufRead, BufReader as StdBufReader, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use nix::libc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::control::{apply_request, ControlContext};
use crate::dispatcher::{EngineEvent, RemapDispatcher};
use crate::injector::SyntheticInputEmitter;
use crate::reassign::CaptureState;

const SOCKET_NAME: &str = "keypad-mapper.sock";

// ============================================================================
// IPC Message Types
// ============================================================================

/// Request messages sent from CLI/external tools to the daemon
///
/// Serialized as JSON with a `type` field for discrimination:
/// - `{"type": "status"}`
/// - `{"type": "update_mapping", "source": "Q", "target": "KP1"}`
/// - `{"type": "begin_capture", "target": "KP5"}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Query overall daemon status
    Status,
    /// Current mapping table
    Snapshot,
    SetEnabled {
        enabled: bool,
    },
    /// Insert or overwrite one entry
    UpdateMapping {
        source: String,
        target: String,
    },
    RemoveMapping {
        source: String,
    },
    /// Bind the next key pressed on a grabbed keyboard to `target`
    BeginCapture {
        target: String,
    },
    CancelCapture,
    /// Replace the table with the built-in layout
    ResetDefaults,
    /// Persist the table to the configuration file
    Save,
    /// Stream engine notifications until the client disconnects
    Watch,
}

/// Response messages sent from the daemon back to CLI/external tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Operation completed successfully
    Success {
        /// Optional message with additional details
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// The mapping table
    Mapping { entries: Vec<MappingEntry> },
    /// Daemon status information
    Status {
        enabled: bool,
        installed: bool,
        /// Whether the virtual keyboard could be created
        injection_available: bool,
        /// Number of table entries
        mappings: usize,
        capture: CaptureState,
        /// Grabbed keyboards
        devices: Vec<DeviceStatus>,
    },
    /// A notification on a `watch` connection
    Event { event: EngineEvent },
    /// Error occurred while processing request
    Error {
        /// Error description
        message: String,
    },
}

impl IpcResponse {
    pub fn success(message: impl Into<String>) -> Self {
        IpcResponse::Success {
            message: Some(message.into()),
        }
    }
}

/// One table entry, by key name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingEntry {
    pub source: String,
    pub target: String,
}

/// A keyboard grabbed by the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Device name as reported by the kernel
    pub name: String,
    /// Device path (e.g., /dev/input/event5)
    pub path: PathBuf,
}

/// Determine the socket path based on environment
///
/// Prefers `$XDG_RUNTIME_DIR/keypad-mapper.sock` if the environment variable
/// is set, otherwise falls back to `/tmp/keypad-mapper-$UID.sock`.
pub fn socket_path() -> PathBuf {
    let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from);
    if runtime_dir.is_none() {
        tracing::warn!("XDG_RUNTIME_DIR not set, using fallback socket path in /tmp");
    }
    let uid = unsafe { libc::getuid() };
    socket_path_in(runtime_dir.as_deref(), uid)
}

fn socket_path_in(runtime_dir: Option<&Path>, uid: u32) -> PathBuf {
    match runtime_dir {
        Some(dir) => dir.join(SOCKET_NAME),
        None => PathBuf::from(format!("/tmp/keypad-mapper-{}.sock", uid)),
    }
}

// ============================================================================
// IPC Server
// ============================================================================

/// IPC server for daemon communication via Unix domain socket
///
/// The socket file is removed when the server is dropped.
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind at [`socket_path`]
    pub fn new() -> Result<Self> {
        Self::bind(socket_path())
    }

    /// Bind at `socket_path`, replacing a stale socket file from a previous run.
    pub fn bind(socket_path: PathBuf) -> Result<Self> {
        if socket_path.exists() {
            tracing::debug!("Removing stale socket file: {}", socket_path.display());
            std::fs::remove_file(&socket_path).with_context(|| {
                format!("Failed to remove stale socket file: {}", socket_path.display())
            })?;
        }

        let listener = UnixListener::bind(&socket_path).with_context(|| {
            format!("Failed to create IPC socket at {}", socket_path.display())
        })?;

        tracing::info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept IPC connection")?;

        tracing::debug!("Accepted IPC connection");

        Ok(stream)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections forever, one task per client.
    pub async fn serve<E>(
        self,
        dispatcher: Arc<Mutex<RemapDispatcher<E>>>,
        ctx: Arc<ControlContext>,
    ) -> Result<()>
    where
        E: SyntheticInputEmitter + Send + 'static,
    {
        loop {
            let stream = self.accept().await?;
            let dispatcher = Arc::clone(&dispatcher);
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                if let Err(e) = handle_ipc_connection(stream, dispatcher, ctx).await {
                    tracing::warn!("IPC connection error: {:#}", e);
                }
            });
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!("Failed to remove IPC socket file on shutdown: {}", e);
            } else {
                tracing::debug!("Removed IPC socket file: {}", self.socket_path.display());
            }
        }
    }
}

// ============================================================================
// IPC Connection Handler
// ============================================================================

/// Handle an incoming IPC connection.
///
/// Reads one request line, applies it with the dispatcher locked, and writes
/// the response. A `watch` request keeps the connection open and forwards
/// every [`EngineEvent`] until the client hangs up.
pub async fn handle_ipc_connection<E>(
    mut stream: UnixStream,
    dispatcher: Arc<Mutex<RemapDispatcher<E>>>,
    ctx: Arc<ControlContext>,
) -> Result<()>
where
    E: SyntheticInputEmitter,
{
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC request")?;

    if bytes_read == 0 {
        tracing::debug!("IPC connection closed without data");
        return Ok(());
    }

    let line = line.trim();
    tracing::debug!("Received IPC request: {}", line);

    let request = match serde_json::from_str::<IpcRequest>(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Failed to parse IPC request: {}", e);
            let response = IpcResponse::Error {
                message: format!("Invalid request: {}", e),
            };
            return write_response(&mut writer, &response).await;
        }
    };

    let watching = request == IpcRequest::Watch;
    let (response, events) = {
        let mut dispatcher = dispatcher.lock().await;
        let events = watching.then(|| dispatcher.subscribe());
        (apply_request(&mut dispatcher, request, &ctx), events)
    };

    write_response(&mut writer, &response).await?;

    let Some(events) = events else {
        return Ok(());
    };

    let mut events = BroadcastStream::new(events);
    let mut discard = String::new();
    loop {
        tokio::select! {
            next = events.next() => match next {
                Some(Ok(event)) => {
                    write_response(&mut writer, &IpcResponse::Event { event }).await?;
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!("Watch client lagged, {} events dropped", skipped);
                }
                None => return Ok(()),
            },
            read = reader.read_line(&mut discard) => {
                // EOF or error: the client went away
                if matches!(read, Ok(0) | Err(_)) {
                    tracing::debug!("Watch client disconnected");
                    return Ok(());
                }
                discard.clear();
            }
        }
    }
}

async fn write_response<W>(writer: &mut W, response: &IpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response_json =
        serde_json::to_string(response).context("Failed to serialize IPC response")?;

    tracing::debug!("Sending IPC response: {}", response_json);

    writer
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write IPC response")?;
    writer
        .write_all(b"\n")
        .await
        .context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush IPC response")?;

    Ok(())
}

// ============================================================================
// Client
// ============================================================================

/// Blocking client used by the CLI
pub struct IpcClient {
    reader: StdBufReader<StdUnixStream>,
    writer: StdUnixStream,
}

impl IpcClient {
    pub fn connect(path: &Path) -> Result<Self> {
        let writer = StdUnixStream::connect(path).with_context(|| {
            format!(
                "Failed to connect to daemon at {} (is keypad-mapperd running?)",
                path.display()
            )
        })?;
        let reader = StdBufReader::new(writer.try_clone().context("Failed to clone socket")?);
        Ok(Self { reader, writer })
    }

    /// Send a request and wait for its response.
    pub fn request(&mut self, request: &IpcRequest) -> Result<IpcResponse> {
        let json = serde_json::to_string(request).context("Failed to serialize request")?;
        self.writer
            .write_all(json.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush())
            .context("Failed to send request")?;

        self.next_response()?
            .context("Daemon closed the connection without responding")
    }

    /// Read the next response line; `None` once the daemon hangs up.
    pub fn next_response(&mut self) -> Result<Option<IpcResponse>> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .context("Failed to read response")?;
        if read == 0 {
            return Ok(None);
        }
        let response = serde_json::from_str(line.trim())
            .with_context(|| format!("Invalid response from daemon: {}", line.trim()))?;
        Ok(Some(response))
    }
}

/// Connect, send one request and return the response.
pub fn send_request(path: &Path, request: &IpcRequest) -> Result<IpcResponse> {
    IpcClient::connect(path)?.request(request)
}
