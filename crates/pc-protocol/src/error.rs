//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding a request payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload ended before the dimensions could be read
    #[error("Truncated payload: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}
