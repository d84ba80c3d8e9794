// src/core/service.rs

//! The process-wide service object: the event loop and its backend connection,
//! created once at startup and passed explicitly to every handler.

use crate::config::Config;
use crate::core::BridgeError;
use crate::core::backend::{BackendConnection, ConnectionObserver, TracingObserver};
use crate::core::continuation::RequestId;
use crate::core::event_loop::{EventLoop, EventLoopHandle};
use crate::core::metrics;
use parking_lot::Mutex;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub struct BridgeService {
    config: Config,
    handle: EventLoopHandle,
    event_loop: Mutex<Option<EventLoop>>,
    next_request_id: AtomicU64,
}

impl BridgeService {
    /// Starts the event loop and begins connecting to the backend.
    ///
    /// Errors here are fatal for the process: an unresolvable backend address
    /// or an event loop that cannot start.
    pub fn init(config: Config) -> Result<Arc<Self>, BridgeError> {
        Self::init_with_observer(config, Box::new(TracingObserver))
    }

    pub fn init_with_observer(
        config: Config,
        observer: Box<dyn ConnectionObserver>,
    ) -> Result<Arc<Self>, BridgeError> {
        let backend_addr = resolve_backend(&config)?;
        let backend = BackendConnection::new(backend_addr, config.backend.connect_timeout, observer);
        let event_loop = EventLoop::start(&config.event_loop, backend)?;
        let handle = event_loop.handle();

        handle.schedule_async(|conn| conn.connect())?;

        let heartbeat = config.event_loop.heartbeat_interval;
        if !heartbeat.is_zero() {
            handle.schedule_periodic(heartbeat, |conn| {
                metrics::HEARTBEATS_TOTAL.inc();
                debug!(
                    "Heartbeat: backend {} is {:?} with {} pending command(s).",
                    conn.addr(),
                    conn.state(),
                    conn.pending_len()
                );
            })?;
        }

        info!(
            "Bridge service initialized (backend {}, policy {:?}).",
            backend_addr, config.backend.policy
        );
        Ok(Arc::new(Self {
            config,
            handle,
            event_loop: Mutex::new(Some(event_loop)),
            next_request_id: AtomicU64::new(1),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn event_loop(&self) -> &EventLoopHandle {
        &self.handle
    }

    /// Allocates a process-unique request id.
    pub fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Stops the event loop and joins its thread. Safe to call more than once.
    pub fn shutdown(&self) {
        let event_loop = self.event_loop.lock().take();
        if let Some(mut event_loop) = event_loop {
            info!("Shutting down bridge service.");
            event_loop.shutdown();
        }
    }
}

impl Drop for BridgeService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn resolve_backend(config: &Config) -> Result<SocketAddr, BridgeError> {
    let target = (config.backend.host.as_str(), config.backend.port);
    target
        .to_socket_addrs()
        .map_err(|e| {
            BridgeError::ConnectionFailure(format!(
                "cannot resolve backend {}:{}: {e}",
                config.backend.host, config.backend.port
            ))
        })?
        .next()
        .ok_or_else(|| {
            BridgeError::ConnectionFailure(format!(
                "backend {}:{} resolved to no addresses",
                config.backend.host, config.backend.port
            ))
        })
}
