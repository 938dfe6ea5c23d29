//! Local request/reply IPC service
//!
//! A host process exposes one well-known endpoint. Each client connects, sends
//! one request and receives one reply, after which the connection is closed.
//!
//! ```text
//! Dispatcher ──create──▶ ListeningInstance ──connect──▶ Session ──▶ RequestProcessor
//!      ▲                                                  │
//!      └──────────────── next instance ◀──────────────────┘ (spawned, not awaited)
//! ```
//!
//! - [`endpoint`] - endpoint naming and the transport traits
//! - [`dispatcher`] - accept loop handing connections to sessions
//! - [`session`] - one read/process/write/close exchange
//! - [`lifecycle`] - instance state tracking and release guard
//! - [`service`] - start, liveness and shutdown of the whole service
//! - [`client`] - client side for external processes

mod dispatcher;

pub mod client;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod processor;
pub mod service;
pub mod session;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

#[cfg(test)]
pub(crate) mod testing;

pub use client::IpcClient;
pub use endpoint::{Connection, DEFAULT_ENDPOINT_NAME, Endpoint, EndpointName, ListeningInstance};
pub use error::IpcError;
pub use lifecycle::{InstanceGuard, InstanceState, LifecycleSnapshot, LifecycleStats};
pub use processor::{RequestProcessor, SessionInfo};
pub use service::{CreateFailurePolicy, IpcService, ServiceConfig, ServiceHandle, ServiceState, ShutdownMode};
pub use session::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE, Session, SessionOutcome, request_text};

/// Endpoint implementation for the current platform
#[cfg(unix)]
pub type PlatformEndpoint = unix::UnixEndpoint;

/// Endpoint implementation for the current platform
#[cfg(windows)]
pub type PlatformEndpoint = windows::NamedPipeEndpoint;

/// Build the platform endpoint for `name`
///
/// `buffer_size` sizes the pipe buffers on Windows; Unix sockets ignore it.
#[cfg(unix)]
pub fn platform_endpoint(name: EndpointName, _buffer_size: usize) -> PlatformEndpoint {
    unix::UnixEndpoint::new(name)
}

/// Build the platform endpoint for `name`
///
/// `buffer_size` sizes the pipe buffers on Windows; Unix sockets ignore it.
#[cfg(windows)]
pub fn platform_endpoint(name: EndpointName, buffer_size: usize) -> PlatformEndpoint {
    windows::NamedPipeEndpoint::new(name, buffer_size)
}
