//! Endpoint naming and the transport seam
//!
//! The dispatcher and session workers only see these traits. Each platform
//! provides one implementation (Unix domain sockets, Windows named pipes),
//! and tests plug in in-memory endpoints.

use std::fmt;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Default rendezvous name shared by the host and its clients
pub const DEFAULT_ENDPOINT_NAME: &str = "ModLoaderIPC";

/// Process-wide name identifying the IPC rendezvous point
///
/// Stable across host restarts so that clients reconnect without discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointName(String);

impl Default for EndpointName {
    fn default() -> Self {
        Self(DEFAULT_ENDPOINT_NAME.to_string())
    }
}

impl EndpointName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve the Unix socket path for this name
    ///
    /// A name containing `/` is treated as an explicit path.
    pub fn socket_path(&self) -> PathBuf {
        if self.0.contains('/') {
            return PathBuf::from(&self.0);
        }
        let path = dirs::runtime_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("modipc")
            .join(format!("{}.sock", self.0));
        debug!(?path, "EndpointName::socket_path: resolved");
        path
    }

    /// Resolve the Windows named pipe path for this name
    pub fn pipe_path(&self) -> String {
        const PREFIX: &str = r"\\.\pipe\";
        if self.0.starts_with(PREFIX) {
            self.0.clone()
        } else {
            format!("{}{}", PREFIX, self.0)
        }
    }

    /// The platform-specific address clients connect to
    pub fn address(&self) -> String {
        if cfg!(windows) {
            self.pipe_path()
        } else {
            self.socket_path().display().to_string()
        }
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A connected, duplex byte stream owned by exactly one session worker
#[async_trait]
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Flush buffered output and release the connection
    async fn close(mut self) -> io::Result<()>
    where
        Self: Sized,
    {
        self.flush().await?;
        self.shutdown().await
    }
}

/// In-memory connection, used by embedded hosts and tests
impl Connection for tokio::io::DuplexStream {}

/// One endpoint instance waiting for a client
#[async_trait]
pub trait ListeningInstance: Send + 'static {
    type Conn: Connection;

    /// Block until a client connects to this instance
    async fn connect(self) -> io::Result<Self::Conn>;
}

/// Factory for endpoint instances bound to one name
pub trait Endpoint: Send + 'static {
    type Instance: ListeningInstance;

    fn name(&self) -> &EndpointName;

    /// Create a fresh instance bound to the endpoint name
    fn create_instance(&mut self) -> io::Result<Self::Instance>;
}
