//! Connection dispatcher
//!
//! Runs the accept loop: create one endpoint instance, wait for a client,
//! hand the connected instance to a new session worker and immediately
//! create the next instance. At most one instance is listening at a time.
//!
//! Session workers run as tasks in a `JoinSet` owned by the dispatcher.
//! Finished workers are reaped while the dispatcher waits for the next
//! client, and the set is drained or aborted on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::endpoint::{Endpoint, ListeningInstance};
use super::error::IpcError;
use super::lifecycle::InstanceGuard;
use super::processor::{RequestProcessor, SessionInfo};
use super::service::{CreateFailurePolicy, ServiceConfig, ServiceControl, ServiceState, ShutdownMode};
use super::session::{Session, SessionOutcome};

/// Upper bound for the creation retry backoff
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Pause after a failed connect before listening again
const CONNECT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

type Conn<E> = <<E as Endpoint>::Instance as ListeningInstance>::Conn;

enum Admission {
    Admitted(Option<OwnedSemaphorePermit>),
    Stopped,
}

/// Owns the endpoint and every session worker it spawned
pub(crate) struct Dispatcher<E: Endpoint> {
    endpoint: E,
    processor: Arc<dyn RequestProcessor>,
    state: ServiceState,
    config: ServiceConfig,
    limiter: Option<Arc<Semaphore>>,
    sessions: JoinSet<SessionOutcome>,
}

impl<E: Endpoint> Dispatcher<E> {
    pub fn new(endpoint: E, processor: Arc<dyn RequestProcessor>, state: ServiceState, config: ServiceConfig) -> Self {
        let limiter = config.max_sessions.map(|n| Arc::new(Semaphore::new(n)));
        Self {
            endpoint,
            processor,
            state,
            config,
            limiter,
            sessions: JoinSet::new(),
        }
    }

    /// Accept clients until stopped or the endpoint fails
    pub(crate) async fn run(mut self, mut control_rx: watch::Receiver<ServiceControl>) -> Result<(), IpcError> {
        info!(endpoint = %self.endpoint.name(), max_sessions = ?self.config.max_sessions, "IPC dispatcher starting");

        let result = self.accept_loop(&mut control_rx).await;
        if let Err(e) = &result {
            warn!(error = %e, "Unable to create endpoint instance, quitting IPC");
            self.state.mark_down();
        }

        self.wind_down(&mut control_rx).await;
        debug!(endpoint = %self.endpoint.name(), "Dispatcher::run: finished");
        result
    }

    async fn accept_loop(&mut self, control_rx: &mut watch::Receiver<ServiceControl>) -> Result<(), IpcError> {
        loop {
            if stop_requested(control_rx) {
                return Ok(());
            }

            let permit = match admit(self.limiter.clone(), control_rx).await {
                Admission::Admitted(permit) => permit,
                Admission::Stopped => return Ok(()),
            };

            let Some(instance) = self.create_instance(control_rx).await? else {
                return Ok(());
            };
            let mut guard = InstanceGuard::created(self.state.stats());
            guard.mark_listening();

            let connect = instance.connect();
            tokio::pin!(connect);

            let result = loop {
                tokio::select! {
                    biased;
                    changed = control_rx.changed() => {
                        if changed.is_err() || stop_requested(control_rx) {
                            debug!("accept_loop: stop requested while listening");
                            return Ok(());
                        }
                    }
                    Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                        log_session_exit(joined);
                    }
                    result = &mut connect => break result,
                }
            };

            match result {
                Ok(conn) => self.spawn_session(conn, guard, permit),
                Err(e) => {
                    warn!(error = %IpcError::Connect(e), "No client connected, releasing instance");
                    drop(guard);
                    drop(permit);

                    // accept errors such as EMFILE repeat immediately
                    tokio::select! {
                        _ = tokio::time::sleep(CONNECT_ERROR_BACKOFF) => {}
                        changed = control_rx.changed() => {
                            if changed.is_err() || stop_requested(control_rx) {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Create the next instance, applying the configured failure policy
    ///
    /// `Ok(None)` means a stop was requested during a retry backoff.
    async fn create_instance(
        &mut self,
        control_rx: &mut watch::Receiver<ServiceControl>,
    ) -> Result<Option<E::Instance>, IpcError> {
        let mut retries = 0u32;
        loop {
            let source = match self.endpoint.create_instance() {
                Ok(instance) => return Ok(Some(instance)),
                Err(e) => e,
            };
            let err = IpcError::EndpointCreate {
                name: self.endpoint.name().to_string(),
                source,
            };

            let CreateFailurePolicy::Retry { max_retries, backoff } = self.config.on_create_failure else {
                return Err(err);
            };
            if retries >= max_retries {
                return Err(err);
            }

            let delay = backoff
                .saturating_mul(2u32.saturating_pow(retries))
                .min(MAX_RETRY_BACKOFF);
            retries += 1;
            warn!(retries, max_retries, ?delay, error = %err, "Endpoint instance creation failed, retrying");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = control_rx.changed() => return Ok(None),
            }
        }
    }

    fn spawn_session(&mut self, conn: Conn<E>, guard: InstanceGuard, permit: Option<OwnedSemaphorePermit>) {
        let info = SessionInfo::new(self.endpoint.name().clone());
        debug!(session = %info.id, active = self.sessions.len() + 1, "spawn_session: got connection");

        let session = Session::new(conn, guard, info).with_permit(permit);
        let processor = self.processor.clone();
        let buffer_size = self.config.buffer_size;
        self.sessions.spawn(session.run(processor, buffer_size));
    }

    /// Finish or abort the remaining sessions once accepting has stopped
    async fn wind_down(&mut self, control_rx: &mut watch::Receiver<ServiceControl>) {
        loop {
            let control = *control_rx.borrow();
            match control {
                ServiceControl::Stop(ShutdownMode::Abort) => {
                    self.abort_sessions().await;
                    return;
                }
                ServiceControl::Stop(ShutdownMode::Drain) => {
                    let drain_timeout = self.config.drain_timeout;
                    if tokio::time::timeout(drain_timeout, self.join_sessions()).await.is_err() {
                        warn!(remaining = self.sessions.len(), ?drain_timeout, "Drain timed out, aborting sessions");
                        self.abort_sessions().await;
                    }
                    return;
                }
                ServiceControl::Run => {
                    // endpoint failed: in-flight sessions still complete
                    if self.sessions.is_empty() {
                        return;
                    }
                    tokio::select! {
                        Some(joined) = self.sessions.join_next() => log_session_exit(joined),
                        changed = control_rx.changed() => {
                            if changed.is_err() {
                                self.join_sessions().await;
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn join_sessions(&mut self) {
        while let Some(joined) = self.sessions.join_next().await {
            log_session_exit(joined);
        }
    }

    async fn abort_sessions(&mut self) {
        if !self.sessions.is_empty() {
            debug!(count = self.sessions.len(), "abort_sessions: aborting in-flight sessions");
        }
        self.sessions.abort_all();
        self.join_sessions().await;
    }
}

/// Wait for a session slot when concurrency is capped
async fn admit(limiter: Option<Arc<Semaphore>>, control_rx: &mut watch::Receiver<ServiceControl>) -> Admission {
    let Some(limiter) = limiter else {
        return Admission::Admitted(None);
    };

    tokio::select! {
        permit = limiter.acquire_owned() => match permit {
            Ok(permit) => Admission::Admitted(Some(permit)),
            Err(_) => Admission::Stopped,
        },
        _ = control_rx.changed() => Admission::Stopped,
    }
}

fn stop_requested(control_rx: &watch::Receiver<ServiceControl>) -> bool {
    matches!(*control_rx.borrow(), ServiceControl::Stop(_))
}

fn log_session_exit(joined: Result<SessionOutcome, JoinError>) {
    match joined {
        Ok(outcome) => debug!(?outcome, "session worker finished"),
        Err(e) if e.is_panic() => error!(error = %e, "Session worker panicked"),
        Err(_) => debug!("session worker cancelled"),
    }
}
