// src/core/errors.rs

//! Defines the primary error type for the bridge core.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all failures the core can report.
///
/// Errors raised on the event-loop thread are never thrown across threads;
/// they are folded into a `CommandOutcome` and observed by the request thread.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Syntax error")]
    SyntaxError,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Per-request or loop resources could not be created.
    #[error("Allocation failure: {0}")]
    AllocationFailure(String),

    /// The backend reported a connect/disconnect failure.
    #[error("Backend connection failure: {0}")]
    ConnectionFailure(String),

    /// The connection went away before a reply arrived.
    #[error("No reply from backend")]
    NoReply,

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Continuation already signaled")]
    AlreadySignaled,

    #[error("Continuation already consumed")]
    AlreadyConsumed,

    #[error("Event loop is not running")]
    LoopClosed,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for BridgeError {
    fn clone(&self) -> Self {
        match self {
            BridgeError::Io(e) => BridgeError::Io(Arc::clone(e)),
            BridgeError::IncompleteData => BridgeError::IncompleteData,
            BridgeError::SyntaxError => BridgeError::SyntaxError,
            BridgeError::InvalidRequest(s) => BridgeError::InvalidRequest(s.clone()),
            BridgeError::AllocationFailure(s) => BridgeError::AllocationFailure(s.clone()),
            BridgeError::ConnectionFailure(s) => BridgeError::ConnectionFailure(s.clone()),
            BridgeError::NoReply => BridgeError::NoReply,
            BridgeError::Timeout(d) => BridgeError::Timeout(*d),
            BridgeError::AlreadySignaled => BridgeError::AlreadySignaled,
            BridgeError::AlreadyConsumed => BridgeError::AlreadyConsumed,
            BridgeError::LoopClosed => BridgeError::LoopClosed,
            BridgeError::InvalidState(s) => BridgeError::InvalidState(s.clone()),
        }
    }
}

impl PartialEq for BridgeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BridgeError::Io(e1), BridgeError::Io(e2)) => e1.to_string() == e2.to_string(),
            (BridgeError::InvalidRequest(s1), BridgeError::InvalidRequest(s2)) => s1 == s2,
            (BridgeError::AllocationFailure(s1), BridgeError::AllocationFailure(s2)) => s1 == s2,
            (BridgeError::ConnectionFailure(s1), BridgeError::ConnectionFailure(s2)) => s1 == s2,
            (BridgeError::Timeout(d1), BridgeError::Timeout(d2)) => d1 == d2,
            (BridgeError::InvalidState(s1), BridgeError::InvalidState(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(Arc::new(e))
    }
}
