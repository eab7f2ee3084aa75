//! Common infrastructure for the voxbridge stack.
//!
//! This crate provides the pieces every other crate in the workspace leans
//! on: the named event bus used by the call manager and its subsystems, the
//! `tracing` based logging setup, and the typed process configuration.

pub mod config;
pub mod errors;
pub mod events;
pub mod logging;

pub use config::BridgeConfig;
pub use errors::{Error, Result};
pub use events::{Event, EventBus};
pub use logging::{call_span, setup_logging, sms_span, LogFormat, LoggingConfig};
