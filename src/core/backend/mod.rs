// src/core/backend/mod.rs

//! The single asynchronous connection to the backend, owned by the event loop.

pub mod connection;
pub mod observer;

pub use connection::BackendConnection;
pub use observer::{ConnectionObserver, TracingObserver};

use crate::core::protocol::RespFrame;
use std::fmt;

/// Identifies one issued command, for logging and correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd-{}", self.0)
    }
}

/// The result handed to a completion callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Reply(RespFrame),
    /// The connection was torn down (or never usable) before a reply arrived.
    NoReply,
}

/// Runs on the event-loop thread, exactly once per issued command.
/// It may use the connection (e.g. to `disconnect()`) but must not block.
pub type CompletionCallback = Box<dyn FnOnce(&mut BackendConnection, CommandReply) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error(String),
}
