// src/core/event_loop/mod.rs

//! A single persistent event loop on its own OS thread.
//!
//! The loop owns the `BackendConnection`. Other threads never touch it
//! directly: they hand closures to the loop through an `EventLoopHandle`, and
//! those closures run on the loop thread with `&mut BackendConnection`.

mod reactor;

pub(crate) use reactor::run_contained;

use crate::config::EventLoopConfig;
use crate::core::backend::BackendConnection;
use crate::core::BridgeError;
use reactor::Reactor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, mpsc};
use tracing::{error, info};

/// A one-shot callback executed on the loop thread.
pub type LoopCallback = Box<dyn FnOnce(&mut BackendConnection) + Send>;
/// A repeating callback executed on the loop thread.
pub type PeriodicCallback = Box<dyn FnMut(&mut BackendConnection) + Send>;

/// Longest accepted periodic interval.
pub const MAX_PERIODIC_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub(crate) enum LoopMessage {
    Run(LoopCallback),
    AddPeriodic {
        interval: Duration,
        callback: PeriodicCallback,
    },
}

/// A cloneable, thread-safe handle for scheduling work on the loop.
#[derive(Clone)]
pub struct EventLoopHandle {
    tx: mpsc::UnboundedSender<LoopMessage>,
    wakeup: Arc<Notify>,
    wakeups: Arc<AtomicU64>,
    shutdown_tx: broadcast::Sender<()>,
}

impl EventLoopHandle {
    /// Runs `callback` once on the loop thread. This is the loop-safe handoff
    /// for issuing backend commands from a request thread.
    pub fn schedule_async<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut BackendConnection) + Send + 'static,
    {
        self.tx
            .send(LoopMessage::Run(Box::new(callback)))
            .map_err(|_| BridgeError::LoopClosed)
    }

    /// Runs `callback` on the loop thread every `interval`, first after one interval.
    pub fn schedule_periodic<F>(&self, interval: Duration, callback: F) -> Result<(), BridgeError>
    where
        F: FnMut(&mut BackendConnection) + Send + 'static,
    {
        if interval.is_zero() {
            return Err(BridgeError::InvalidRequest(
                "periodic interval must be greater than 0".to_string(),
            ));
        }
        if interval > MAX_PERIODIC_INTERVAL {
            return Err(BridgeError::InvalidRequest(format!(
                "periodic interval {interval:?} exceeds the maximum of {MAX_PERIODIC_INTERVAL:?}"
            )));
        }
        self.tx
            .send(LoopMessage::AddPeriodic {
                interval,
                callback: Box::new(callback),
            })
            .map_err(|_| BridgeError::LoopClosed)
    }

    /// Wakes the loop. Several notifications before the loop runs coalesce
    /// into one wakeup.
    pub fn notify(&self) {
        self.wakeup.notify_one();
    }

    /// Number of async wakeups the loop has processed.
    pub fn wakeups(&self) -> u64 {
        self.wakeups.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// The running loop: its handle plus the thread that drives it.
pub struct EventLoop {
    handle: EventLoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Spawns the loop thread with `backend` moved into it. Returns once the
    /// thread's runtime is up; any failure to get there is reported as an
    /// `AllocationFailure`.
    pub fn start(settings: &EventLoopConfig, backend: BackendConnection) -> Result<Self, BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let wakeup = Arc::new(Notify::new());
        let wakeups = Arc::new(AtomicU64::new(0));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let reactor = Reactor::new(rx, wakeup.clone(), wakeups.clone(), shutdown_rx, backend);

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), BridgeError>>();
        let thread = thread::Builder::new()
            .name(settings.thread_name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(BridgeError::AllocationFailure(format!(
                            "event loop runtime: {e}"
                        ))));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                runtime.block_on(reactor.run());
            })
            .map_err(|e| BridgeError::AllocationFailure(format!("event loop thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(BridgeError::AllocationFailure(
                    "event loop thread exited during startup".to_string(),
                ));
            }
        }
        info!("Event loop thread '{}' is running.", settings.thread_name);

        Ok(Self {
            handle: EventLoopHandle {
                tx,
                wakeup,
                wakeups,
                shutdown_tx,
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> EventLoopHandle {
        self.handle.clone()
    }

    /// Stops the loop and joins its thread. Pending commands complete with
    /// `NoReply` before the thread exits. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.handle.shutdown_tx.send(());
        if thread.join().is_err() {
            error!("Event loop thread panicked during shutdown.");
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
