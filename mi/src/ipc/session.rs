//! Session worker: one request/response exchange per accepted connection
//!
//! The worker owns its connection exclusively. It performs one bounded read,
//! hands the request to the processor, writes the reply once and releases the
//! connection. Failures are logged and end the exchange early; they never
//! reach the dispatcher.

use std::borrow::Cow;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

use super::endpoint::Connection;
use super::error::IpcError;
use super::lifecycle::InstanceGuard;
use super::processor::{RequestProcessor, SessionInfo};

/// Default request buffer capacity in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 512;

/// Smallest usable capacity: one data byte plus the reserved terminator slot
pub const MIN_BUFFER_SIZE: usize = 2;

/// How an exchange ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Reply written to the client
    Replied,
    /// Client closed without sending anything
    NoRequest,
    /// Reading the request failed
    ReadFailed,
    /// Writing the reply failed
    WriteFailed,
}

/// A connected instance handed from the dispatcher to a worker
#[derive(Debug)]
pub struct Session<C: Connection> {
    conn: C,
    guard: InstanceGuard,
    info: SessionInfo,
    permit: Option<OwnedSemaphorePermit>,
}

impl<C: Connection> Session<C> {
    pub fn new(conn: C, mut guard: InstanceGuard, info: SessionInfo) -> Self {
        guard.mark_connected();
        Self {
            conn,
            guard,
            info,
            permit: None,
        }
    }

    /// Hold an admission permit until the session finishes
    pub fn with_permit(mut self, permit: Option<OwnedSemaphorePermit>) -> Self {
        self.permit = permit;
        self
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Run the exchange to completion and release the connection
    pub async fn run(self, processor: Arc<dyn RequestProcessor>, buffer_size: usize) -> SessionOutcome {
        let Session {
            mut conn,
            guard,
            info,
            permit,
        } = self;
        debug!(session = %info.id, "Session::run: called");

        let outcome = exchange(&mut conn, processor.as_ref(), &info, buffer_size).await;

        if let Err(e) = conn.close().await {
            debug!(session = %info.id, error = %IpcError::Close(e), "Session::run: close failed");
        }
        drop(guard);
        drop(permit);

        debug!(session = %info.id, ?outcome, "Session::run: finished");
        outcome
    }
}

async fn exchange<C: Connection>(
    conn: &mut C,
    processor: &dyn RequestProcessor,
    info: &SessionInfo,
    buffer_size: usize,
) -> SessionOutcome {
    let mut buffer = vec![0u8; buffer_size.max(MIN_BUFFER_SIZE)];
    // last slot is reserved for the terminator
    let limit = buffer.len() - 1;

    let read = match conn.read(&mut buffer[..limit]).await {
        Ok(0) => {
            debug!(session = %info.id, "exchange: client sent no data");
            return SessionOutcome::NoRequest;
        }
        Ok(n) => n,
        Err(e) => {
            debug!(session = %info.id, error = %IpcError::Read(e), "exchange: read failed");
            return SessionOutcome::ReadFailed;
        }
    };

    let request = request_text(&buffer[..read]);
    debug!(session = %info.id, bytes = read, "exchange: request received");

    let reply = processor.process(info, &request).await;

    if let Err(e) = conn.write_all(reply.as_bytes()).await {
        debug!(session = %info.id, error = %IpcError::Write(e), "exchange: reply discarded");
        return SessionOutcome::WriteFailed;
    }

    debug!(session = %info.id, bytes = reply.len(), "exchange: reply written");
    SessionOutcome::Replied
}

/// Request text as seen by the processor
///
/// Input ends at the first NUL byte; invalid UTF-8 is replaced.
pub fn request_text(bytes: &[u8]) -> Cow<'_, str> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
}
