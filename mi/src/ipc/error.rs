//! IPC error types

use std::io;
use thiserror::Error;

/// Errors that can occur inside the IPC service
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("Failed to create endpoint instance for {name}: {source}")]
    EndpointCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept client connection: {0}")]
    Connect(#[source] io::Error),

    #[error("Failed to read request: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write reply: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to close connection: {0}")]
    Close(#[source] io::Error),

    #[error("Invalid IPC configuration: {0}")]
    InvalidConfig(String),
}

impl IpcError {
    /// Check if this error takes the whole service down
    ///
    /// Endpoint creation failures and invalid configuration stop the whole
    /// service; everything else is scoped to one connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IpcError::EndpointCreate { .. } | IpcError::InvalidConfig(_))
    }
}
