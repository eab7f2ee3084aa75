//! Named event bus.
//!
//! Publish-subscribe hub used by the call manager and its subsystems. Events
//! are identified by name and carry a JSON payload plus the call they relate
//! to, if any. Handlers come in two flavors: synchronous closures and async
//! handlers. Registration is append-only under a lock; emission iterates a
//! snapshot so a handler can never observe a half-updated registry, and a
//! failing handler is logged and counted but never aborts the emitter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

/// Well-known event names emitted by the core.
pub mod topics {
    pub const CALL_CREATED: &str = "call_created";
    pub const STATE_CHANGED: &str = "state_changed";
    pub const CALL_ENDED: &str = "call_ended";
    pub const DTMF_RECEIVED: &str = "dtmf_received";
    pub const SMS_RECEIVED: &str = "sms_received";
    pub const SMS_STATUS_CHANGED: &str = "sms_status_changed";
}

/// A single event instance on the bus.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event name, usually one of [`topics`].
    pub name: String,
    /// Call this event relates to, if any.
    pub call_id: Option<String>,
    /// Structured payload.
    pub payload: Value,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            call_id: None,
            payload,
        }
    }

    pub fn for_call(name: impl Into<String>, call_id: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            call_id: Some(call_id.into()),
            payload,
        }
    }
}

/// Synchronous handler. Errors are reported as strings so handlers from any
/// crate can participate without sharing an error type.
pub type SyncHandler = Arc<dyn Fn(&Event) -> Result<(), String> + Send + Sync>;

/// Asynchronous handler registered on the bus.
#[async_trait]
pub trait AsyncEventHandler: Send + Sync {
    /// Descriptive name used in failure logs.
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn handle(&self, event: &Event) -> Result<(), String>;
}

#[derive(Default)]
struct Registrations {
    sync: Vec<SyncHandler>,
    asynchronous: Vec<Arc<dyn AsyncEventHandler>>,
}

/// The bus itself. Cheap to clone via `Arc`.
#[derive(Default)]
pub struct EventBus {
    registry: RwLock<HashMap<String, Registrations>>,
    emitted: AtomicU64,
    handler_failures: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous handler for a named event.
    pub fn on<F>(&self, event_name: &str, handler: F)
    where
        F: Fn(&Event) -> Result<(), String> + Send + Sync + 'static,
    {
        self.registry
            .write()
            .entry(event_name.to_string())
            .or_default()
            .sync
            .push(Arc::new(handler));
    }

    /// Register an async handler for a named event.
    pub fn on_async(&self, event_name: &str, handler: Arc<dyn AsyncEventHandler>) {
        self.registry
            .write()
            .entry(event_name.to_string())
            .or_default()
            .asynchronous
            .push(handler);
    }

    /// Emit an event to every registered handler.
    ///
    /// Sync handlers run inline, async handlers are awaited in registration
    /// order. Handler failures are contained here.
    pub async fn emit(&self, event: Event) {
        self.emitted.fetch_add(1, Ordering::Relaxed);

        let (sync_handlers, async_handlers) = {
            let registry = self.registry.read();
            match registry.get(&event.name) {
                Some(regs) => (regs.sync.clone(), regs.asynchronous.clone()),
                None => return,
            }
        };

        for handler in &sync_handlers {
            if let Err(message) = handler(&event) {
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(event = %event.name, %message, "event handler failed");
            }
        }

        for handler in &async_handlers {
            if let Err(message) = handler.handle(&event).await {
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    event = %event.name,
                    handler = handler.name(),
                    %message,
                    "async event handler failed"
                );
            }
        }
    }

    /// Number of events emitted since creation.
    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of handler invocations that reported failure.
    pub fn failure_count(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    /// Number of handlers registered for an event name.
    pub fn handler_count(&self, event_name: &str) -> usize {
        self.registry
            .read()
            .get(event_name)
            .map(|r| r.sync.len() + r.asynchronous.len())
            .unwrap_or(0)
    }
}
