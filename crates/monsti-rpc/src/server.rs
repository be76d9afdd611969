use crate::{
    RpcResult,
    wire::{self, PROTOCOL_VERSION, RequestEnvelope, ResponseEnvelope, WireError},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{
    io::BufReader,
    net::{UnixListener, UnixStream},
    sync::broadcast,
};

/// Per-connection state visible to the service.
#[derive(Debug, Default)]
pub struct ConnectionContext {
    pub id: u64,
    clients: Mutex<Vec<String>>,
}

impl ConnectionContext {
    fn new(id: u64) -> Self {
        ConnectionContext {
            id,
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Remember a signal client id registered through this connection, so
    /// it can be dropped when the connection goes away.
    pub fn claim_client(&self, client: &str) {
        let mut clients = self.clients.lock();
        if !clients.iter().any(|c| c == client) {
            clients.push(client.to_string());
        }
    }

    pub fn clients(&self) -> Vec<String> {
        self.clients.lock().clone()
    }
}

/// Method dispatcher behind an [`RpcServer`].
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    async fn call(&self, conn: &ConnectionContext, method: &str, params: Value) -> Result<Value, WireError>;

    /// Called once the peer closed the connection.
    async fn disconnected(&self, _conn: &ConnectionContext) {}
}

/// Unix socket accept loop, one task per connection.
pub struct RpcServer<S> {
    path: PathBuf,
    listener: UnixListener,
    service: Arc<S>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<S: RpcService> RpcServer<S> {
    /// Bind the socket, replacing a stale one.
    pub fn bind(path: impl Into<PathBuf>, service: Arc<S>, shutdown_tx: broadcast::Sender<()>) -> RpcResult<Self> {
        let path = path.into();
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
        let listener = UnixListener::bind(&path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(Self {
            path,
            listener,
            service,
            shutdown_tx,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub async fn run(self) -> RpcResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let next_conn = AtomicU64::new(1);
        loop {
            tokio::select! {
                res = self.listener.accept() => {
                    match res {
                        Ok((stream, _)) => {
                            let conn = ConnectionContext::new(next_conn.fetch_add(1, Ordering::Relaxed));
                            tokio::spawn(handle_conn(
                                stream,
                                conn,
                                self.service.clone(),
                                self.shutdown_tx.subscribe(),
                            ));
                        }
                        Err(err) => tracing::warn!(%err, "accept on rpc socket failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = std::fs::remove_file(&self.path);
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn handle_conn<S: RpcService>(
    stream: UnixStream,
    conn: ConnectionContext,
    service: Arc<S>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (r, mut w) = stream.into_split();
    let mut reader = BufReader::new(r);
    let mut line = String::new();
    loop {
        let frame = tokio::select! {
            frame = wire::read_frame::<_, RequestEnvelope>(&mut reader, &mut line) => frame,
            _ = shutdown_rx.recv() => break,
        };
        let resp = match frame {
            Ok(Some(req)) => {
                let id = req.id;
                let result = if req.v != PROTOCOL_VERSION {
                    Err(WireError::invalid_request("unsupported protocol version"))
                } else {
                    service.call(&conn, &req.method, req.params).await
                };
                if let Err(err) = &result {
                    tracing::debug!(method = %req.method, code = %err.code, "rpc call failed: {}", err.message);
                }
                ResponseEnvelope::from_result(id, result)
            }
            Ok(None) => break,
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                ResponseEnvelope::from_result(0, Err(WireError::decode(err.to_string())))
            }
            Err(err) => {
                tracing::debug!(conn = conn.id, %err, "rpc connection failed");
                break;
            }
        };
        if wire::write_frame(&mut w, &resp).await.is_err() {
            break;
        }
    }
    service.disconnected(&conn).await;
}
