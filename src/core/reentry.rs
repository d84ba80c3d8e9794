// src/core/reentry.rs

//! The contract between a handler and the dispatcher that re-invokes it.
//!
//! A handler never blocks the dispatcher waiting for backend I/O. It registers
//! an `Interest` (re-invoke me when this descriptor is readable, or after this
//! long), returns `Step::Suspend`, and synchronizes locally once re-invoked.

use std::os::fd::RawFd;
use std::time::Duration;
use tracing::trace;

/// When the dispatcher should re-invoke a suspended handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// When `fd` becomes readable, or after `timeout` if one is given,
    /// whichever comes first.
    Descriptor {
        fd: RawFd,
        timeout: Option<Duration>,
    },
    /// After `duration`.
    Timer(Duration),
}

/// What a handler invocation asks of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Re-invoke according to the registered interest.
    Suspend,
    /// The request is finished; no further invocations.
    Done,
}

/// Registration side of the bridge, implemented by whatever carries a
/// request's invocation context.
pub trait Reentry {
    /// Replaces any existing registration for this request.
    fn register_interest(&mut self, interest: Interest);

    /// Cancels future re-invocations. Calling it when nothing is registered
    /// is a no-op.
    fn deregister_interest(&mut self);

    fn interest(&self) -> Option<&Interest>;
}

/// The registration held for one request. Lives and dies with the request,
/// so nothing registered here can leak into another request.
#[derive(Debug, Default, Clone)]
pub struct WakeRegistration {
    current: Option<Interest>,
    registrations: u32,
}

impl WakeRegistration {
    /// How many times an interest was registered over the request's life.
    pub fn registrations(&self) -> u32 {
        self.registrations
    }
}

impl Reentry for WakeRegistration {
    fn register_interest(&mut self, interest: Interest) {
        trace!("Registering re-entry interest: {:?}", interest);
        self.current = Some(interest);
        self.registrations += 1;
    }

    fn deregister_interest(&mut self) {
        if let Some(previous) = self.current.take() {
            trace!("Deregistered re-entry interest: {:?}", previous);
        }
    }

    fn interest(&self) -> Option<&Interest> {
        self.current.as_ref()
    }
}
