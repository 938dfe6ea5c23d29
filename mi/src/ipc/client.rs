//! IPC client for external processes
//!
//! Connects to the host's endpoint, sends one request and reads the reply
//! until the host closes the connection.

use std::io;
use std::time::Duration;

use eyre::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::endpoint::EndpointName;
use crate::router::{LOADER_MOD, RouterReply, RouterRequest};

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for one host endpoint
#[derive(Debug, Clone)]
pub struct IpcClient {
    name: EndpointName,
    timeout: Duration,
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new(EndpointName::default())
    }
}

impl IpcClient {
    pub fn new(name: EndpointName) -> Self {
        Self {
            name,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &EndpointName {
        &self.name
    }

    /// Check if the host's socket file exists
    #[cfg(unix)]
    pub fn endpoint_exists(&self) -> bool {
        self.name.socket_path().exists()
    }

    /// Send a raw request and return the raw reply
    ///
    /// An empty reply means the host closed the connection without answering.
    pub async fn send_raw(&self, request: &[u8]) -> Result<String> {
        debug!(endpoint = %self.name, bytes = request.len(), "IpcClient::send_raw: called");
        let stream = tokio::time::timeout(self.timeout, connect(&self.name))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to IPC endpoint")?;

        tokio::time::timeout(self.timeout, exchange(stream, request))
            .await
            .context("Request timeout")?
    }

    /// Send a routed message and parse the host's reply
    pub async fn send(&self, mod_id: &str, message: &str, data: Value) -> Result<RouterReply> {
        let request = RouterRequest::new(mod_id, message, data);
        let payload = serde_json::to_vec(&request).context("Failed to serialize request")?;
        let reply = self.send_raw(&payload).await?;
        if reply.is_empty() {
            return Err(eyre::eyre!("Host closed the connection without replying"));
        }
        serde_json::from_str(&reply).context("Failed to parse IPC reply")
    }

    /// Check if the host is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        let reply = self.send(LOADER_MOD, "ping", Value::Null).await?.into_result()?;
        reply
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| eyre::eyre!("Unexpected ping reply: {}", reply))
    }

    /// Fetch the host's IPC health report
    pub async fn status(&self) -> Result<Value> {
        self.send(LOADER_MOD, "status", Value::Null).await?.into_result()
    }
}

async fn exchange<S>(mut stream: S, request: &[u8]) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await.context("Failed to write request")?;
    stream.flush().await.context("Failed to flush request")?;

    let mut reply = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => reply.extend_from_slice(&chunk[..n]),
            // the host may close with part of an oversized request unread
            Err(e) if is_peer_closed(&e) => break,
            Err(e) => return Err(e).context("Failed to read reply"),
        }
    }

    let reply = String::from_utf8(reply).context("Reply is not valid UTF-8")?;
    debug!(bytes = reply.len(), "exchange: received reply");
    Ok(reply)
}

fn is_peer_closed(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe)
}

#[cfg(unix)]
async fn connect(name: &EndpointName) -> io::Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect(name.socket_path()).await
}

#[cfg(windows)]
async fn connect(name: &EndpointName) -> io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    use tokio::net::windows::named_pipe::ClientOptions;

    // ERROR_PIPE_BUSY: every instance is taken, the host creates the next one shortly
    const ERROR_PIPE_BUSY: i32 = 231;

    let path = name.pipe_path();
    loop {
        match ClientOptions::new().open(&path) {
            Ok(client) => return Ok(client),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {}
            Err(e) => return Err(e),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
