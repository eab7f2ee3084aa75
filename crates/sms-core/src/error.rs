//! SMS subsystem errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmsError {
    /// Input rejected before enqueue.
    #[error("invalid SMS: {0}")]
    Validation(String),

    /// The queue is at capacity.
    #[error("SMS queue full")]
    QueueFull,

    /// A rolling-window rate limit rejected the message.
    #[error("rate limit exceeded for {0}")]
    RateLimited(String),

    /// No message with this id is tracked.
    #[error("unknown SMS message: {0}")]
    UnknownMessage(String),

    /// A processing rule failed to compile.
    #[error("invalid SMS rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },
}

pub type Result<T> = std::result::Result<T, SmsError>;
