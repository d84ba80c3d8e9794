// src/server/dispatcher.rs

//! A reference request dispatcher.
//!
//! It plays the host's role: invoke a handler on the calling thread, keep the
//! per-request state between invocations, and honour the interest the handler
//! registered before suspending. Waiting happens here, in `poll(2)` or a sleep,
//! never on the event-loop thread.

use crate::core::BridgeError;
use crate::core::continuation::poll_readable;
use crate::core::handler::{Handler, Request, RequestEnv};
use crate::core::reentry::{Interest, Reentry, Step, WakeRegistration};
use bytes::BytesMut;
use std::thread;
use tracing::{debug, trace};

const DEFAULT_MAX_INVOCATIONS: u32 = 64;

/// What a finished request leaves behind.
#[derive(Debug)]
pub struct DispatchResult<S> {
    pub reply: BytesMut,
    pub state: S,
    pub invocations: u32,
    /// Whether the last descriptor wait ended because the descriptor was ready
    /// (as opposed to its timeout).
    pub woke_on_ready: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    max_invocations: u32,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            max_invocations: DEFAULT_MAX_INVOCATIONS,
        }
    }
}

impl Dispatcher {
    /// Caps how many times one request may be invoked before it is failed.
    pub fn with_max_invocations(max_invocations: u32) -> Self {
        Self {
            max_invocations: max_invocations.max(1),
        }
    }

    /// Drives `request` through `handler` until it is done or fails.
    pub fn run<H: Handler>(
        &self,
        handler: &H,
        request: &Request,
    ) -> Result<DispatchResult<H::State>, BridgeError> {
        let mut reply = BytesMut::new();
        let mut state = H::State::default();
        let mut wake = WakeRegistration::default();
        let mut invocations = 0u32;
        let mut woke_on_ready = false;

        loop {
            invocations += 1;
            let step = {
                let mut env = RequestEnv::new(request, &mut reply, &mut state, &mut wake, invocations);
                handler.invoke(&mut env)
            };

            match step {
                Err(e) => {
                    wake.deregister_interest();
                    debug!("{}: handler failed on invocation {}: {}", request.id, invocations, e);
                    return Err(e);
                }
                Ok(Step::Done) => {
                    if wake.interest().is_some() {
                        debug!("{}: finished with an interest still registered; clearing it.", request.id);
                        wake.deregister_interest();
                    }
                    return Ok(DispatchResult {
                        reply,
                        state,
                        invocations,
                        woke_on_ready,
                    });
                }
                Ok(Step::Suspend) => {
                    if invocations >= self.max_invocations {
                        wake.deregister_interest();
                        return Err(BridgeError::InvalidState(format!(
                            "{} suspended {} times without finishing",
                            request.id, invocations
                        )));
                    }
                    let Some(interest) = wake.interest().copied() else {
                        return Err(BridgeError::InvalidState(format!(
                            "{} suspended without registering interest",
                            request.id
                        )));
                    };
                    woke_on_ready = wait_for(interest)?;
                    trace!("{}: re-invoking (ready: {}).", request.id, woke_on_ready);
                }
            }
        }
    }
}

/// Blocks the calling thread until `interest` fires.
fn wait_for(interest: Interest) -> Result<bool, BridgeError> {
    match interest {
        Interest::Timer(duration) => {
            thread::sleep(duration);
            Ok(false)
        }
        Interest::Descriptor { fd, timeout } => Ok(poll_readable(fd, timeout)?),
    }
}
