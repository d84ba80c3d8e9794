// src/core/continuation/mod.rs

//! Per-request continuation state bridging a handler's first invocation and
//! its re-invocation after the backend completion.
//!
//! # Handoff protocol
//!
//! 1. The request thread creates a `RequestContinuation` (latch pending,
//!    readiness descriptor unsignaled) and keeps the only strong reference in
//!    its `RequestSlot`.
//! 2. The completion closure handed to the event loop holds a `Weak`. When the
//!    reply (or the connection teardown) arrives, it signals the latch first
//!    and then the readiness descriptor.
//! 3. The dispatcher sees the descriptor become readable and re-invokes the
//!    handler, whose `wait` returns at once with the stored outcome.
//!
//! If the request thread is re-invoked early, `wait` blocks until the
//! completion or the request deadline, whichever comes first.

pub mod latch;
pub mod readiness;

pub use latch::CompletionLatch;
pub use readiness::{ReadinessFd, poll_readable};

use crate::core::backend::CommandReply;
use crate::core::metrics;
use crate::core::protocol::RespFrame;
use crate::core::BridgeError;
use std::fmt;
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Identity of one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// What the request thread observes after its wait returns.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The backend replied.
    Value(RespFrame),
    /// The connection went away before a reply arrived.
    NoReply,
    /// The request deadline passed before any completion.
    TimedOut,
}

impl CommandOutcome {
    /// The reply frame, or the error a missing reply maps to. `timeout` is the
    /// bound the request waited with.
    pub fn into_reply(self, timeout: Duration) -> Result<RespFrame, BridgeError> {
        match self {
            CommandOutcome::Value(frame) => Ok(frame),
            CommandOutcome::NoReply => Err(BridgeError::NoReply),
            CommandOutcome::TimedOut => Err(BridgeError::Timeout(timeout)),
        }
    }
}

impl From<CommandReply> for CommandOutcome {
    fn from(reply: CommandReply) -> Self {
        match reply {
            CommandReply::Reply(frame) => CommandOutcome::Value(frame),
            CommandReply::NoReply => CommandOutcome::NoReply,
        }
    }
}

/// The per-request slot a dispatcher keeps across re-invocations.
#[derive(Debug, Default)]
pub enum RequestSlot {
    #[default]
    NotStarted,
    Pending(Arc<RequestContinuation>),
    Complete(CommandOutcome),
}

impl RequestSlot {
    pub fn outcome(&self) -> Option<&CommandOutcome> {
        match self {
            RequestSlot::Complete(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn continuation(&self) -> Option<&Arc<RequestContinuation>> {
        match self {
            RequestSlot::Pending(continuation) => Some(continuation),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct RequestContinuation {
    id: RequestId,
    latch: CompletionLatch,
    readiness: ReadinessFd,
    created_at: Instant,
}

impl RequestContinuation {
    /// Allocates the continuation and its readiness descriptor.
    pub fn new(id: RequestId) -> Result<Arc<Self>, BridgeError> {
        let readiness = ReadinessFd::new()?;
        metrics::SUSPENDED_REQUESTS.inc();
        Ok(Arc::new(Self {
            id,
            latch: CompletionLatch::new(),
            readiness,
            created_at: Instant::now(),
        }))
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// The descriptor that becomes readable once the outcome is stored.
    pub fn readiness_fd(&self) -> RawFd {
        self.readiness.raw_fd()
    }

    pub fn is_complete(&self) -> bool {
        self.latch.is_complete()
    }

    /// Stores the outcome and wakes whoever watches this request.
    pub fn complete(&self, outcome: CommandOutcome) -> Result<(), BridgeError> {
        self.latch.signal(outcome)?;
        if let Err(e) = self.readiness.signal() {
            // The latch already holds the outcome; a blocked wait still returns.
            warn!("{}: failed to signal readiness descriptor: {}", self.id, e);
        }
        Ok(())
    }

    /// Blocks until the outcome is available or `deadline` passes.
    pub fn wait(&self, deadline: Instant) -> Result<CommandOutcome, BridgeError> {
        let outcome = self.latch.wait_until(deadline)?;
        Ok(self.record(outcome))
    }

    /// Blocks until the outcome is available or `timeout` has passed since the
    /// continuation was created. A timeout too large to express as an instant
    /// waits without a deadline.
    pub fn wait_for(&self, timeout: Duration) -> Result<CommandOutcome, BridgeError> {
        let outcome = match self.created_at.checked_add(timeout) {
            Some(deadline) => self.latch.wait_until(deadline)?,
            None => self.latch.wait()?,
        };
        Ok(self.record(outcome))
    }

    fn record(&self, outcome: CommandOutcome) -> CommandOutcome {
        match outcome {
            CommandOutcome::TimedOut => metrics::REQUEST_TIMEOUTS_TOTAL.inc(),
            CommandOutcome::Value(_) | CommandOutcome::NoReply => {
                metrics::REQUESTS_COMPLETED_TOTAL.inc()
            }
        }
        metrics::REQUEST_LATENCY_SECONDS.observe(self.created_at.elapsed().as_secs_f64());
        outcome
    }

    /// Delivers a backend reply to the continuation behind `weak`, if the
    /// request is still alive. Runs on the event-loop thread.
    pub fn deliver(weak: &Weak<Self>, reply: CommandReply) {
        let Some(continuation) = weak.upgrade() else {
            debug!("Dropping completion for a request that no longer exists.");
            return;
        };
        let label = match &reply {
            CommandReply::Reply(_) => "reply",
            CommandReply::NoReply => "no_reply",
        };
        metrics::COMPLETIONS_TOTAL.with_label_values(&[label]).inc();
        if let Err(e) = continuation.complete(reply.into()) {
            debug!("{}: completion not delivered: {}", continuation.id, e);
        }
    }
}

impl Drop for RequestContinuation {
    fn drop(&mut self) {
        metrics::SUSPENDED_REQUESTS.dec();
    }
}
