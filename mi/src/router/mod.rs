//! Mod message router
//!
//! The request processor the host plugs into the IPC service. Requests name a
//! mod and a message; the router looks up the handler registered for that
//! pair and wraps its result in a [`RouterReply`]. Every failure, including
//! malformed input, becomes an error reply.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::VERSION;
use crate::ipc::{RequestProcessor, ServiceState, SessionInfo};

pub mod messages;

pub use messages::{RouterReply, RouterRequest};

/// Mod id of the handlers built into the host
pub const LOADER_MOD: &str = "loader";

/// Handler for one (mod, message) pair
pub type Handler = Arc<dyn Fn(&SessionInfo, Value) -> Result<Value, String> + Send + Sync>;

/// Routes requests to handlers registered per mod and message
#[derive(Default)]
pub struct MessageRouter {
    handlers: RwLock<HashMap<String, HashMap<String, Handler>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with the `loader` mod's `ping` and `status` handlers
    pub fn with_builtins(state: ServiceState) -> Self {
        let router = Self::new();

        router.register(LOADER_MOD, "ping", |_session, _data| Ok(json!({ "version": VERSION })));

        router.register(LOADER_MOD, "status", move |_session, _data| {
            Ok(json!({
                "alive": state.is_alive(),
                "lifecycle": state.lifecycle(),
            }))
        });

        router
    }

    /// Register or replace the handler for `mod_id` / `message`
    pub fn register<F>(&self, mod_id: &str, message: &str, handler: F)
    where
        F: Fn(&SessionInfo, Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        debug!(mod_id, message, "MessageRouter::register: called");
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers
            .entry(mod_id.to_string())
            .or_default()
            .insert(message.to_string(), Arc::new(handler));
    }

    /// Remove every handler of one mod
    pub fn unregister_mod(&self, mod_id: &str) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        handlers.remove(mod_id).is_some()
    }

    /// Mod ids with at least one handler, sorted
    pub fn mods(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut mods: Vec<String> = handlers.keys().cloned().collect();
        mods.sort();
        mods
    }

    /// Route one raw request to its handler
    pub fn route(&self, session: &SessionInfo, raw: &str) -> RouterReply {
        let request = match RouterRequest::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                debug!(session = %session.id, error = %e, "route: malformed request");
                return RouterReply::error(e);
            }
        };

        let handler = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            let Some(messages) = handlers.get(&request.mod_id) else {
                return RouterReply::error(format!("Unknown mod '{}'", request.mod_id));
            };
            match messages.get(&request.message) {
                Some(handler) => handler.clone(),
                None => {
                    return RouterReply::error(format!(
                        "Mod '{}' has no listener for message '{}'",
                        request.mod_id, request.message
                    ));
                }
            }
        };

        debug!(session = %session.id, mod_id = %request.mod_id, message = %request.message, "route: dispatching");
        match handler(session, request.data) {
            Ok(reply) => RouterReply::ok(reply),
            Err(e) => RouterReply::error(e),
        }
    }
}

#[async_trait]
impl RequestProcessor for MessageRouter {
    async fn process(&self, session: &SessionInfo, request: &str) -> String {
        let reply = self.route(session, request);
        serde_json::to_string(&reply)
            .unwrap_or_else(|_| r#"{"success":false,"error":"Failed to serialize reply"}"#.to_string())
    }
}
