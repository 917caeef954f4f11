//! Control socket: length-prefixed JSON over a Unix domain socket
//!
//! External tooling drives the resources through this socket. One
//! request, one response; mutations go through the same `apply_patch` /
//! `apply_replace` entry points the rest of the system uses, so all
//! notification fan-out happens on the connection's thread.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::constants::control;
use crate::resource::{Repository, ResourceKind};

/// Requests accepted on the control socket
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ControlRequest {
    /// Read a resource's full document
    Get { resource: ResourceKind },

    /// Merge a partial document into a resource
    Patch { resource: ResourceKind, body: Value },

    /// Replace a resource's full document
    Replace { resource: ResourceKind, body: Value },

    /// Pause or resume live capture
    Freeze { value: bool },

    /// Cycle the encoder element with its current settings
    ResetEncoder,

    /// Health check
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

/// Responses sent back per request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ControlResponse {
    /// The resource's full document after a Get/Patch/Replace
    Document(Value),

    /// Acknowledgment for requests without a payload
    Ok,

    /// Health check response
    Pong,

    /// The request was rejected; the resource is unchanged
    Error(String),
}

/// Default socket path (XDG_RUNTIME_DIR with fallback to cache)
pub fn default_socket_path() -> Result<PathBuf> {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir)
            .join(control::APP_DIR)
            .join(control::SOCKET_NAME));
    }

    let cache = dirs::cache_dir()
        .context("Failed to determine cache directory (no XDG_RUNTIME_DIR or HOME)")?;
    Ok(cache.join(control::APP_DIR).join(control::SOCKET_NAME))
}

/// Client connection to a running daemon (used by tooling and tests)
pub struct ControlClient {
    stream: UnixStream,
}

impl ControlClient {
    pub fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .context(format!("Failed to connect to daemon at {}", path.display()))?;
        Ok(Self { stream })
    }

    /// Send a request and wait for its response
    pub fn request(&mut self, req: ControlRequest) -> Result<ControlResponse> {
        write_message(&mut self.stream, &req)?;
        read_message(&mut self.stream)
    }
}

/// Listening side of the control socket
pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl ControlServer {
    pub fn bind_to(socket_path: PathBuf) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create socket directory: {}",
                parent.display()
            ))?;
        }

        // Remove stale socket if exists
        if socket_path.exists() {
            std::fs::remove_file(&socket_path).context(format!(
                "Failed to remove stale socket: {}",
                socket_path.display()
            ))?;
        }

        let listener = UnixListener::bind(&socket_path)
            .context(format!("Failed to bind socket at {}", socket_path.display()))?;

        // Owner only
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o700))
                .context("Failed to set socket permissions")?;
        }

        Ok(Self {
            listener,
            socket_path,
        })
    }

    pub fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .context("Failed to accept control connection")?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Spawn the listener thread handling control connections
pub fn spawn_listener(
    server: ControlServer,
    repository: Arc<Repository>,
    shutdown_tx: mpsc::Sender<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = run_loop(&server, &repository, &shutdown_tx) {
            error!(error = ?e, "Control listener thread crashed");
        }
    })
}

fn run_loop(
    server: &ControlServer,
    repository: &Arc<Repository>,
    shutdown_tx: &mpsc::Sender<()>,
) -> Result<()> {
    info!(socket = ?server.path(), "Control listener started");

    loop {
        let mut stream = server.accept()?;
        debug!("Control client connected");

        loop {
            let request: ControlRequest = match read_message(&mut stream) {
                Ok(request) => request,
                Err(e) => {
                    debug!(error = ?e, "Control connection closed");
                    break;
                }
            };

            if matches!(request, ControlRequest::Shutdown) {
                info!("Received shutdown request on control socket");
                write_message(&mut stream, &ControlResponse::Ok)?;
                shutdown_tx.send(()).ok();
                return Ok(());
            }

            let response = dispatch(repository, request);
            if let ControlResponse::Error(message) = &response {
                warn!(%message, "Control request rejected");
            }
            write_message(&mut stream, &response)?;
        }
    }
}

fn dispatch(repository: &Arc<Repository>, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Get { resource } => ControlResponse::Document(repository.get(resource).read()),
        ControlRequest::Patch { resource, body } => {
            match repository.get(resource).apply_patch(body) {
                Ok(doc) => ControlResponse::Document(doc),
                Err(e) => ControlResponse::Error(e.to_string()),
            }
        }
        ControlRequest::Replace { resource, body } => {
            match repository.get(resource).apply_replace(body) {
                Ok(doc) => ControlResponse::Document(doc),
                Err(e) => ControlResponse::Error(e.to_string()),
            }
        }
        ControlRequest::Freeze { value } => {
            repository.frontend().set_freeze(value);
            ControlResponse::Ok
        }
        ControlRequest::ResetEncoder => {
            repository.encoder().request_reset();
            ControlResponse::Ok
        }
        ControlRequest::Ping => ControlResponse::Pong,
        ControlRequest::Shutdown => ControlResponse::Ok,
    }
}

/// Write a length-prefixed message to the stream
fn write_message<T: Serialize>(stream: &mut UnixStream, msg: &T) -> Result<()> {
    let json = serde_json::to_vec(msg).context("Failed to serialize message to JSON")?;

    let len = json.len() as u32;
    stream
        .write_all(&len.to_le_bytes())
        .context("Failed to write message length")?;
    stream
        .write_all(&json)
        .context("Failed to write message payload")?;
    stream.flush().context("Failed to flush stream")?;

    Ok(())
}

/// Read a length-prefixed message from the stream
fn read_message<T: for<'de> Deserialize<'de>>(stream: &mut UnixStream) -> Result<T> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .context("Failed to read message length")?;
    let len = u32::from_le_bytes(len_buf) as usize;

    // Sanity check (prevent DoS via huge allocation)
    if len > control::MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Message too large: {} bytes (max: {})",
            len,
            control::MAX_MESSAGE_SIZE
        ));
    }

    let mut json_buf = vec![0u8; len];
    stream
        .read_exact(&mut json_buf)
        .context("Failed to read message payload")?;

    serde_json::from_slice(&json_buf).context("Failed to deserialize message from JSON")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineController, SimBackend};
    use crate::resource::{Defaults, Resource};
    use serde_json::json;

    #[test]
    fn message_framing_round_trips() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let request = ControlRequest::Patch {
            resource: ResourceKind::Frontend,
            body: json!({"rotation": {"enabled": true}}),
        };
        write_message(&mut a, &request).unwrap();
        let decoded: ControlRequest = read_message(&mut b).unwrap();
        match decoded {
            ControlRequest::Patch { resource, body } => {
                assert_eq!(resource, ResourceKind::Frontend);
                assert_eq!(body["rotation"]["enabled"], json!(true));
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn oversized_message_rejected() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let len = (control::MAX_MESSAGE_SIZE as u32 + 1).to_le_bytes();
        a.write_all(&len).unwrap();
        let result: Result<ControlRequest> = read_message(&mut b);
        assert!(result.is_err());
    }

    #[test]
    fn resource_kind_uses_snake_case_on_the_wire() {
        let request = ControlRequest::Get {
            resource: ResourceKind::PrivacyMask,
        };
        let encoded = serde_json::to_string(&request).unwrap();
        assert!(encoded.contains("privacy_mask"));
    }

    #[test]
    fn dispatch_rejects_bad_patch_without_side_effects() {
        let repository = Arc::new(Repository::build(&Defaults::builtin()).unwrap());
        let _controller = PipelineController::attach(repository.clone(), SimBackend::new());
        let before = repository.frontend().read();

        let response = dispatch(
            &repository,
            ControlRequest::Patch {
                resource: ResourceKind::Frontend,
                body: json!({"rotation": {"angle": "ROTATION_ANGLE_45"}}),
            },
        );
        assert!(matches!(response, ControlResponse::Error(_)));
        assert_eq!(repository.frontend().read(), before);
    }

    #[test]
    fn end_to_end_over_socket() {
        let repository = Arc::new(Repository::build(&Defaults::builtin()).unwrap());
        let _controller = PipelineController::attach(repository.clone(), SimBackend::new());

        let socket_path =
            std::env::temp_dir().join(format!("camctl-test-{}.sock", std::process::id()));
        let server = ControlServer::bind_to(socket_path.clone()).unwrap();
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let listener = spawn_listener(server, repository.clone(), shutdown_tx);

        let mut client = ControlClient::connect_to(&socket_path).unwrap();
        assert!(matches!(
            client.request(ControlRequest::Ping).unwrap(),
            ControlResponse::Pong
        ));

        let response = client
            .request(ControlRequest::Patch {
                resource: ResourceKind::Encoder,
                body: json!({"rate_control": {"bitrate": 6_000_000}}),
            })
            .unwrap();
        match response {
            ControlResponse::Document(doc) => {
                assert_eq!(doc["rate_control"]["bitrate"], json!(6_000_000));
            }
            other => panic!("unexpected response: {other:?}"),
        }

        assert!(matches!(
            client.request(ControlRequest::Shutdown).unwrap(),
            ControlResponse::Ok
        ));
        shutdown_rx.recv().unwrap();
        listener.join().unwrap();
    }

    #[test]
    fn dispatch_get_returns_document() {
        let repository = Arc::new(Repository::build(&Defaults::builtin()).unwrap());
        let _controller = PipelineController::attach(repository.clone(), SimBackend::new());
        let response = dispatch(
            &repository,
            ControlRequest::Get {
                resource: ResourceKind::Encoder,
            },
        );
        match response {
            ControlResponse::Document(doc) => {
                assert_eq!(doc["rate_control"]["rc_mode"], json!("VBR"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
