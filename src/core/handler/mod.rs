// src/core/handler/mod.rs

//! Request handlers and the per-invocation environment a dispatcher hands them.

pub mod set_get;

pub use set_get::SetGetHandler;

use crate::core::BridgeError;
use crate::core::continuation::RequestId;
use crate::core::reentry::{Interest, Reentry, Step, WakeRegistration};
use bytes::{BufMut, Bytes, BytesMut};

/// One logical request as the dispatcher sees it.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub args: Vec<Bytes>,
}

impl Request {
    pub fn new(id: RequestId, args: Vec<Bytes>) -> Self {
        Self { id, args }
    }
}

/// Everything a handler can see during one invocation: the request, the
/// connection's output buffer, the state that persists across re-invocations
/// of this request, and its re-entry registration.
pub struct RequestEnv<'a, S> {
    pub request: &'a Request,
    pub reply: &'a mut BytesMut,
    pub state: &'a mut S,
    wake: &'a mut WakeRegistration,
    invocation: u32,
}

impl<'a, S> RequestEnv<'a, S> {
    pub fn new(
        request: &'a Request,
        reply: &'a mut BytesMut,
        state: &'a mut S,
        wake: &'a mut WakeRegistration,
        invocation: u32,
    ) -> Self {
        Self {
            request,
            reply,
            state,
            wake,
            invocation,
        }
    }

    /// 1 on the first call for this request, then 2, 3, ...
    pub fn invocation(&self) -> u32 {
        self.invocation
    }
}

impl<S> Reentry for RequestEnv<'_, S> {
    fn register_interest(&mut self, interest: Interest) {
        self.wake.register_interest(interest);
    }

    fn deregister_interest(&mut self) {
        self.wake.deregister_interest();
    }

    fn interest(&self) -> Option<&Interest> {
        self.wake.interest()
    }
}

/// A synchronous, re-entrant request handler.
///
/// The dispatcher calls `invoke` once, then again each time the interest the
/// handler registered fires, until it returns `Step::Done` or an error. An
/// error from the first invocation is an immediate failure response.
pub trait Handler: Send + Sync {
    type State: Default + Send;

    fn invoke(&self, env: &mut RequestEnv<'_, Self::State>) -> Result<Step, BridgeError>;
}

/// Appends `payload` as one chunked-transfer chunk: `<len hex>\r\n<payload>\r\n`.
/// An empty payload writes nothing, since a zero-length chunk ends the body.
pub fn write_chunk(buf: &mut BytesMut, payload: &[u8]) {
    if payload.is_empty() {
        return;
    }
    let header = format!("{:x}\r\n", payload.len());
    buf.reserve(header.len() + payload.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    buf.put_slice(b"\r\n");
}
