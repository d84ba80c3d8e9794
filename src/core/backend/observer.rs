// src/core/backend/observer.rs

use crate::core::BridgeError;
use std::net::SocketAddr;
use tracing::{error, info};

/// Observes connect/disconnect results. Purely informational: the connection
/// never retries or changes behaviour based on what an observer does.
pub trait ConnectionObserver: Send {
    fn on_connect(&mut self, addr: SocketAddr, result: &Result<(), BridgeError>) {
        match result {
            Ok(()) => info!("Connected to backend at {}.", addr),
            Err(e) => error!("Backend connect to {} failed: {}", addr, e),
        }
    }

    fn on_disconnect(&mut self, addr: SocketAddr, result: &Result<(), BridgeError>) {
        match result {
            Ok(()) => info!("Disconnected from backend at {}.", addr),
            Err(e) => error!("Backend connection to {} lost: {}", addr, e),
        }
    }
}

/// The default observer: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ConnectionObserver for TracingObserver {}
