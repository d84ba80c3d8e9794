// src/core/mod.rs

//! The core of the bridge: the event loop, its backend connection, and the
//! continuation protocol that lets synchronous handlers wait on them.

pub mod backend;
pub mod continuation;
pub mod errors;
pub mod event_loop;
pub mod handler;
pub mod metrics;
pub mod protocol;
pub mod reentry;
pub mod service;

pub use errors::BridgeError;
pub use service::BridgeService;
