// src/core/event_loop/reactor.rs

//! The loop body that runs on the dedicated thread.

use super::{LoopMessage, PeriodicCallback};
use crate::core::backend::BackendConnection;
use crate::core::metrics;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Poll;
use std::time::Duration;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

struct Periodic {
    interval: Interval,
    callback: PeriodicCallback,
}

pub(crate) struct Reactor {
    rx: mpsc::UnboundedReceiver<LoopMessage>,
    wakeup: Arc<Notify>,
    wakeups: Arc<AtomicU64>,
    shutdown_rx: broadcast::Receiver<()>,
    periodics: Vec<Periodic>,
    backend: BackendConnection,
}

impl Reactor {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<LoopMessage>,
        wakeup: Arc<Notify>,
        wakeups: Arc<AtomicU64>,
        shutdown_rx: broadcast::Receiver<()>,
        backend: BackendConnection,
    ) -> Self {
        Self {
            rx,
            wakeup,
            wakeups,
            shutdown_rx,
            periodics: Vec::new(),
            backend,
        }
    }

    /// Multiplexes the message channel, the async wakeup, the periodic timers
    /// and the backend socket until shutdown.
    pub(crate) async fn run(mut self) {
        info!("Event loop started.");
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Event loop received shutdown signal.");
                    break;
                }
                msg = self.rx.recv() => match msg {
                    Some(LoopMessage::Run(callback)) => {
                        run_contained("async callback", || callback(&mut self.backend));
                    }
                    Some(LoopMessage::AddPeriodic { interval, callback }) => {
                        self.add_periodic(interval, callback);
                    }
                    None => {
                        info!("All event loop handles dropped. Stopping.");
                        break;
                    }
                },
                _ = self.wakeup.notified() => {
                    let n = self.wakeups.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!("Event loop woken by async notify (#{}).", n);
                }
                index = next_due(&mut self.periodics) => {
                    let periodic = &mut self.periodics[index];
                    run_contained("periodic callback", || (periodic.callback)(&mut self.backend));
                }
                event = self.backend.next_event() => {
                    self.backend.handle_event(event);
                }
            }
        }

        self.backend.shutdown();
        // Drain what was queued before the channel closed. The connection is
        // closed now, so any command these issue completes with `NoReply`.
        self.rx.close();
        let mut drained = 0usize;
        while let Ok(msg) = self.rx.try_recv() {
            if let LoopMessage::Run(callback) = msg {
                run_contained("async callback", || callback(&mut self.backend));
            }
            drained += 1;
        }
        if drained > 0 {
            debug!("Drained {} queued loop message(s) at shutdown.", drained);
        }
        info!("Event loop stopped.");
    }

    fn add_periodic(&mut self, period: Duration, callback: PeriodicCallback) {
        let Some(start) = Instant::now().checked_add(period) else {
            warn!("Ignoring periodic callback: interval {:?} is out of range.", period);
            return;
        };
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.periodics.push(Periodic { interval, callback });
        debug!(
            "Registered periodic callback every {:?} ({} active).",
            period,
            self.periodics.len()
        );
    }
}

/// Resolves with the index of the first periodic timer that is due.
async fn next_due(periodics: &mut [Periodic]) -> usize {
    if periodics.is_empty() {
        return std::future::pending().await;
    }
    futures::future::poll_fn(|cx| {
        for (index, periodic) in periodics.iter_mut().enumerate() {
            if periodic.interval.poll_tick(cx).is_ready() {
                return Poll::Ready(index);
            }
        }
        Poll::Pending
    })
    .await
}

/// Runs a loop-thread callback, containing any panic so the loop survives.
pub(crate) fn run_contained<F: FnOnce()>(label: &str, f: F) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        metrics::LOOP_CALLBACK_PANICS_TOTAL.inc();
        error!("Event loop {} panicked: {}. The loop keeps running.", label, reason);
    }
}
