// src/core/continuation/latch.rs

//! A signal-once, wait-once latch handing a `CommandOutcome` from the event-loop
//! thread to the request thread.
//!
//! This is a binary semaphore, not a mutex: the thread that releases it (the
//! loop thread running the completion) is never the thread that acquires it.

use super::CommandOutcome;
use crate::core::BridgeError;
use parking_lot::{Condvar, Mutex};
use std::time::Instant;

#[derive(Debug)]
enum LatchState {
    /// Created, command issued, no completion yet.
    Pending,
    /// The completion ran; the outcome waits to be read.
    Complete(CommandOutcome),
    /// The request thread took the outcome.
    Consumed,
    /// The request thread stopped waiting before a completion arrived.
    Abandoned,
}

#[derive(Debug)]
pub struct CompletionLatch {
    state: Mutex<LatchState>,
    cond: Condvar,
}

impl Default for CompletionLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState::Pending),
            cond: Condvar::new(),
        }
    }

    /// Moves the latch from pending to complete. Only the first call succeeds;
    /// the stored outcome is never overwritten.
    pub fn signal(&self, outcome: CommandOutcome) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        match *state {
            LatchState::Pending => {
                *state = LatchState::Complete(outcome);
                self.cond.notify_all();
                Ok(())
            }
            LatchState::Abandoned => Err(BridgeError::InvalidState(
                "completion arrived after the request stopped waiting".to_string(),
            )),
            LatchState::Complete(_) | LatchState::Consumed => Err(BridgeError::AlreadySignaled),
        }
    }

    /// Blocks until the latch is signaled or `deadline` passes.
    ///
    /// Returns the outcome exactly once. On deadline the latch is abandoned and
    /// `CommandOutcome::TimedOut` is returned, so a late completion is dropped.
    pub fn wait_until(&self, deadline: Instant) -> Result<CommandOutcome, BridgeError> {
        self.wait_inner(Some(deadline))
    }

    /// Blocks until the latch is signaled, with no deadline.
    pub fn wait(&self) -> Result<CommandOutcome, BridgeError> {
        self.wait_inner(None)
    }

    fn wait_inner(&self, deadline: Option<Instant>) -> Result<CommandOutcome, BridgeError> {
        let mut state = self.state.lock();
        loop {
            match std::mem::replace(&mut *state, LatchState::Consumed) {
                LatchState::Complete(outcome) => return Ok(outcome),
                LatchState::Pending => {
                    *state = LatchState::Pending;
                    let Some(deadline) = deadline else {
                        self.cond.wait(&mut state);
                        continue;
                    };
                    if self.cond.wait_until(&mut state, deadline).timed_out()
                        && matches!(*state, LatchState::Pending)
                    {
                        *state = LatchState::Abandoned;
                        return Ok(CommandOutcome::TimedOut);
                    }
                }
                previous @ (LatchState::Consumed | LatchState::Abandoned) => {
                    *state = previous;
                    return Err(BridgeError::AlreadyConsumed);
                }
            }
        }
    }

    /// True once a completion has been stored and not yet consumed.
    pub fn is_complete(&self) -> bool {
        matches!(*self.state.lock(), LatchState::Complete(_))
    }
}
