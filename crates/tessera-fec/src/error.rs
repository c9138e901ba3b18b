//! # Error taxonomy
//!
//! Failures that cross a module boundary. Recovery failure (not enough
//! information to restore a symbol) is deliberately absent: it is silent and
//! never observable outside the scheme that hit it.

use thiserror::Error;

/// Errors surfaced by the FEC core.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FecError {
    /// The sender window cannot accept a new source symbol right now.
    /// The caller retries after the next ACK frees the oldest id.
    #[error("sender window is full")]
    WindowFull,

    /// A repair symbol does not fit the available frame budget. Fully local:
    /// the caller reserves more space or defers the symbol.
    #[error("repair symbol does not fit in {available} bytes (needs {needed})")]
    FrameTooLarge { needed: usize, available: usize },

    /// A controller or scheme precondition was violated. Connection-fatal.
    #[error("unexpected state: {0}")]
    UnexpectedState(&'static str),

    /// Malformed FEC frame, symbol-size mismatch, or an id going backwards.
    /// Closes the connection with a transport error.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
}
