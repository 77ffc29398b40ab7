//! Concurrent method registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::handler::RpcHandler;

/// Concurrent map of method name → handler.
///
/// Registration is last-writer-wins; at most one handler is registered per
/// name at any instant. Reads take the shared side of the lock so lookups
/// never contend with each other.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn RpcHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `method`, replacing any previous one.
    pub fn register(&self, method: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.handlers.write().unwrap().insert(method.into(), handler);
    }

    /// Remove the handler for `method`; returns whether one existed.
    pub fn unregister(&self, method: &str) -> bool {
        self.handlers.write().unwrap().remove(method).is_some()
    }

    /// Look up the handler for `method`.
    pub fn lookup(&self, method: &str) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.read().unwrap().get(method).cloned()
    }

    /// Snapshot of registered method names; does not alias internal state.
    pub fn methods(&self) -> Vec<String> {
        self.handlers.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
