//! Call session lifecycle management.
//!
//! The [`manager::CallManager`] is the sole owner of every
//! [`types::CallSession`]: admission control, the authoritative state
//! machine, routing, queueing, and cleanup all run through it. Subsystems
//! get a `call_id` and narrow capability traits, never a session reference.

pub mod error;
pub mod manager;
pub mod queue;
pub mod router;
pub mod types;

pub use error::{CallEngineError, Result};
pub use manager::{CallManager, CallManagerConfig, CallObserver, IncomingCallData};
pub use queue::{CallQueue, QueueStats};
pub use router::{CallRouter, RouteConditions, RoutingDecision, RoutingRule, RuleAction};
pub use types::{CallDirection, CallPriority, CallSession, CallState, Party};
