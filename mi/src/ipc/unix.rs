//! Unix domain socket endpoint
//!
//! The socket is bound on the first instance creation. Every instance after
//! that is a single pending `accept()` on the bound socket, so clients that
//! connect between two instances wait in the listen backlog instead of being
//! refused.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::endpoint::{Connection, Endpoint, EndpointName, ListeningInstance};

impl Connection for UnixStream {}

/// Endpoint backed by a Unix domain socket at [`EndpointName::socket_path`]
#[derive(Debug)]
pub struct UnixEndpoint {
    name: EndpointName,
    socket_path: PathBuf,
    listener: Option<Arc<UnixListener>>,
}

impl UnixEndpoint {
    pub fn new(name: EndpointName) -> Self {
        let socket_path = name.socket_path();
        Self {
            name,
            socket_path,
            listener: None,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn bind(&mut self) -> io::Result<Arc<UnixListener>> {
        debug!(socket_path = ?self.socket_path, "UnixEndpoint::bind: creating IPC socket");

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.socket_path.exists() {
            // a live host still answers on the path; only a dead socket may be replaced
            match std::os::unix::net::UnixStream::connect(&self.socket_path) {
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("another host is listening on {}", self.socket_path.display()),
                    ));
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    debug!(socket_path = ?self.socket_path, "UnixEndpoint::bind: removing stale socket");
                    std::fs::remove_file(&self.socket_path)?;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        let listener = Arc::new(UnixListener::bind(&self.socket_path)?);
        info!(socket_path = ?self.socket_path, "IPC socket bound");
        self.listener = Some(listener.clone());
        Ok(listener)
    }
}

impl Endpoint for UnixEndpoint {
    type Instance = UnixInstance;

    fn name(&self) -> &EndpointName {
        &self.name
    }

    fn create_instance(&mut self) -> io::Result<UnixInstance> {
        let listener = match &self.listener {
            Some(listener) => listener.clone(),
            None => self.bind()?,
        };
        Ok(UnixInstance { listener })
    }
}

impl Drop for UnixEndpoint {
    fn drop(&mut self) {
        if self.listener.is_some() {
            cleanup_socket(&self.socket_path);
        }
    }
}

/// One pending accept on the bound socket
#[derive(Debug)]
pub struct UnixInstance {
    listener: Arc<UnixListener>,
}

#[async_trait]
impl ListeningInstance for UnixInstance {
    type Conn = UnixStream;

    async fn connect(self) -> io::Result<UnixStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(stream)
    }
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}
