//! Endpoint instance lifecycle tracking
//!
//! Every instance the dispatcher creates gets an [`InstanceGuard`]. The guard
//! travels with the instance (dispatcher while listening, session worker once
//! connected) and records the transition to `Closed` when it is dropped, so
//! every exit path releases the instance exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

/// Lifecycle states of one endpoint instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Created,
    Listening,
    Connected,
    Closed,
}

/// Counters over all instances created by one service
#[derive(Debug, Default)]
pub struct LifecycleStats {
    created: AtomicU64,
    listening: AtomicU64,
    connected: AtomicU64,
    closed: AtomicU64,
}

/// Point-in-time copy of [`LifecycleStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LifecycleSnapshot {
    pub created: u64,
    pub listening: u64,
    pub connected: u64,
    pub closed: u64,
    pub open: u64,
}

impl LifecycleStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Instances ever created
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Instances currently waiting for a client
    pub fn listening(&self) -> u64 {
        self.listening.load(Ordering::SeqCst)
    }

    /// Instances that were handed to a session worker
    pub fn connected(&self) -> u64 {
        self.connected.load(Ordering::SeqCst)
    }

    /// Instances released
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Instances created but not yet released
    pub fn open(&self) -> u64 {
        // closed is read first so a concurrent release never makes this underflow
        let closed = self.closed();
        self.created().saturating_sub(closed)
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let closed = self.closed();
        let created = self.created();
        LifecycleSnapshot {
            created,
            listening: self.listening(),
            connected: self.connected(),
            closed,
            open: created.saturating_sub(closed),
        }
    }
}

/// Ownership token for one endpoint instance
///
/// Dropping the guard is the `Closed` transition.
#[derive(Debug)]
pub struct InstanceGuard {
    stats: Arc<LifecycleStats>,
    state: InstanceState,
}

impl InstanceGuard {
    /// Record a newly created instance
    pub fn created(stats: Arc<LifecycleStats>) -> Self {
        stats.created.fetch_add(1, Ordering::SeqCst);
        Self {
            stats,
            state: InstanceState::Created,
        }
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Created -> Listening
    pub fn mark_listening(&mut self) {
        if self.state == InstanceState::Created {
            self.stats.listening.fetch_add(1, Ordering::SeqCst);
            self.state = InstanceState::Listening;
        }
    }

    /// Listening -> Connected
    pub fn mark_connected(&mut self) {
        match self.state {
            InstanceState::Listening => {
                self.stats.listening.fetch_sub(1, Ordering::SeqCst);
            }
            InstanceState::Created => {}
            InstanceState::Connected | InstanceState::Closed => return,
        }
        self.stats.connected.fetch_add(1, Ordering::SeqCst);
        self.state = InstanceState::Connected;
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if self.state == InstanceState::Listening {
            self.stats.listening.fetch_sub(1, Ordering::SeqCst);
        }
        debug!(from = ?self.state, "InstanceGuard::drop: instance closed");
        self.state = InstanceState::Closed;
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}
