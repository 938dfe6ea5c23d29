//! IPC service lifecycle
//!
//! [`IpcService::start`] spawns the dispatcher on the tokio runtime and
//! returns immediately; the host keeps a [`ServiceHandle`] to observe
//! liveness and to shut the service down.
//!
//! # Shutdown
//!
//! - [`ShutdownMode::Drain`] stops accepting and waits up to the configured
//!   drain timeout for in-flight sessions, then aborts the rest.
//! - [`ShutdownMode::Abort`] stops accepting and aborts every session.
//! - Dropping the handle behaves like `Abort`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::dispatcher::Dispatcher;
use super::endpoint::{Endpoint, EndpointName};
use super::error::IpcError;
use super::lifecycle::{LifecycleSnapshot, LifecycleStats};
use super::processor::RequestProcessor;
use super::session::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// Process-wide service state shared by the dispatcher and health checks
///
/// Alive from construction; goes down once, on an unrecoverable endpoint
/// creation failure. Sessions already running may still complete after that.
#[derive(Debug, Clone)]
pub struct ServiceState {
    alive: Arc<AtomicBool>,
    stats: Arc<LifecycleStats>,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceState {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
            stats: LifecycleStats::new(),
        }
    }

    /// Whether the service still accepts new connections
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Take the service down after a fatal endpoint failure
    pub fn mark_down(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!("ServiceState::mark_down: service is no longer accepting connections");
        }
    }

    pub fn stats(&self) -> Arc<LifecycleStats> {
        self.stats.clone()
    }

    pub fn lifecycle(&self) -> LifecycleSnapshot {
        self.stats.snapshot()
    }
}

/// What the dispatcher does when an endpoint instance cannot be created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateFailurePolicy {
    /// Give up immediately
    Stop,
    /// Retry with doubling backoff, then give up
    Retry { max_retries: u32, backoff: Duration },
}

/// Runtime configuration for one service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Request buffer capacity in bytes, including the terminator slot
    pub buffer_size: usize,

    /// Cap on concurrently running sessions (`None` = unbounded)
    pub max_sessions: Option<usize>,

    /// How long a draining shutdown waits for in-flight sessions
    pub drain_timeout: Duration,

    pub on_create_failure: CreateFailurePolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_sessions: None,
            drain_timeout: Duration::from_secs(5),
            on_create_failure: CreateFailurePolicy::Stop,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), IpcError> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(IpcError::InvalidConfig(format!(
                "buffer size must be at least {} bytes, got {}",
                MIN_BUFFER_SIZE, self.buffer_size
            )));
        }
        if self.max_sessions == Some(0) {
            return Err(IpcError::InvalidConfig(
                "max concurrent sessions must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How to stop a running service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Drain,
    Abort,
}

/// Control value watched by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServiceControl {
    Run,
    Stop(ShutdownMode),
}

/// Entry point for starting the IPC service
pub struct IpcService;

impl IpcService {
    /// Spawn the dispatcher for `endpoint` and return without blocking
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<E: Endpoint>(
        endpoint: E,
        processor: Arc<dyn RequestProcessor>,
        state: ServiceState,
        config: ServiceConfig,
    ) -> Result<ServiceHandle, IpcError> {
        config.validate()?;

        let name = endpoint.name().clone();
        let (control_tx, control_rx) = watch::channel(ServiceControl::Run);
        let dispatcher = Dispatcher::new(endpoint, processor, state.clone(), config);
        let task = tokio::spawn(dispatcher.run(control_rx));

        info!(endpoint = %name, "IPC set up");
        Ok(ServiceHandle {
            name,
            state,
            control_tx,
            task: Some(task),
        })
    }
}

/// Handle to a running IPC service. Dropping aborts the service.
#[derive(Debug)]
pub struct ServiceHandle {
    name: EndpointName,
    state: ServiceState,
    control_tx: watch::Sender<ServiceControl>,
    task: Option<JoinHandle<Result<(), IpcError>>>,
}

impl ServiceHandle {
    pub fn name(&self) -> &EndpointName {
        &self.name
    }

    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    /// Whether the dispatcher task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Wait for the dispatcher to stop on its own
    ///
    /// Returns the fatal endpoint error that stopped it, if any.
    pub async fn wait(&mut self) -> Result<(), IpcError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        flatten(result)
    }

    /// Stop accepting connections and wind down in-flight sessions
    pub async fn shutdown(mut self, mode: ShutdownMode) -> Result<(), IpcError> {
        info!(endpoint = %self.name, ?mode, "IPC service shutting down");
        let _ = self.control_tx.send(ServiceControl::Stop(mode));
        match self.task.take() {
            Some(task) => flatten(task.await),
            None => Ok(()),
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        let _ = self.control_tx.send(ServiceControl::Stop(ShutdownMode::Abort));
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn flatten(result: Result<Result<(), IpcError>, tokio::task::JoinError>) -> Result<(), IpcError> {
    match result {
        Ok(inner) => inner,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => {
            error!(error = %e, "IPC dispatcher task panicked");
            Ok(())
        }
    }
}
