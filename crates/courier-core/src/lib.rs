//! Core types and error definitions for the Courier message-bus framework.
//!
//! This crate provides the foundational types shared across all Courier
//! crates: the error taxonomy, the message envelope, and the wildcard
//! pattern matcher used by every dispatch path.
//!
//! # Main types
//!
//! - [`CourierError`] — Unified error enum for all Courier subsystems.
//! - [`CourierResult`] — Convenience alias for `Result<T, CourierError>`.
//! - [`Message`] — The envelope carried by every bus, pub/sub or stream.
//! - [`pattern::matches`] — Dot-segmented wildcard matching.

/// The message envelope and its encodings.
pub mod message;
/// Wildcard matching between message types and subscription patterns.
pub mod pattern;

/// Top-level error type for the Courier framework.
///
/// Configuration errors are raised eagerly at construction time; runtime,
/// capability, and not-found errors are raised synchronously at the call
/// that triggers them. The core never retries — retry policy belongs to
/// broker drivers, which surface their failures through [`CourierError::Broker`].
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// Invalid or inconsistent configuration (unknown broker reference,
    /// bus with no capability, malformed config document).
    #[error("Config error: {0}")]
    Config(String),

    /// An operation attempted in an invalid lifecycle state, such as
    /// `get` before the bus factory is installed or use of a closed bus.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// A lookup for a name that does not exist (unconstructed bus on
    /// `resolve`, unconfigured stream on `send`).
    #[error("Not found: {0}")]
    NotFound(String),

    /// An operation invoked on a bus lacking the required capability.
    #[error("Capability error: {0}")]
    Capability(String),

    /// A malformed serialized message.
    #[error("Format error: {0}")]
    Format(String),

    /// A transport failure reported by a broker backend.
    #[error("Broker error: {0}")]
    Broker(String),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`CourierError`].
pub type CourierResult<T> = Result<T, CourierError>;

pub use message::{Message, Payload};
