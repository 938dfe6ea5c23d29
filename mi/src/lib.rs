//! modipc - local request/reply IPC for mod-loading hosts
//!
//! A long-running host process exposes one named endpoint. External processes
//! connect, send a single request and receive a single reply. The accept loop
//! never stalls on a slow client and never leaks an endpoint instance,
//! whatever the client does.
//!
//! # Modules
//!
//! - [`ipc`] - endpoint transport, dispatcher, session workers and client
//! - [`router`] - mod message routing behind the request processor
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod ipc;
pub mod router;

/// Version reported by the host, from `git describe`
pub const VERSION: &str = env!("GIT_DESCRIBE");

// Re-export commonly used types
pub use config::Config;
pub use ipc::{
    CreateFailurePolicy, EndpointName, IpcClient, IpcError, IpcService, RequestProcessor, ServiceConfig,
    ServiceHandle, ServiceState, SessionInfo, ShutdownMode,
};
pub use router::{MessageRouter, RouterReply, RouterRequest};
