// src/core/handler/set_get.rs

//! A handler that stores the request's last argument under a per-request key
//! and answers with what the backend returns for that key.
//!
//! First invocation: issue `SET` + `GET` on the loop thread, register the
//! continuation's readiness descriptor, open the response, suspend.
//! Re-invocation: wait for the `GET` outcome, write it, close the response.

use super::{Handler, RequestEnv, write_chunk};
use crate::config::ConnectionPolicy;
use crate::core::BridgeError;
use crate::core::backend::{BackendConnection, CommandReply};
use crate::core::continuation::{RequestContinuation, RequestSlot};
use crate::core::metrics;
use crate::core::protocol::RespFrame;
use crate::core::reentry::{Interest, Reentry, Step};
use crate::core::service::BridgeService;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opens a `<pre>` block in the chunked body.
const BODY_OPEN: &[u8] = b"5\r\n<pre>\r\n";
/// Closes the `<pre>` block and terminates the chunked body.
const BODY_CLOSE: &[u8] = b"6\r\n</pre>\r\n0\r\n\r\n";

pub struct SetGetHandler {
    service: Arc<BridgeService>,
}

impl SetGetHandler {
    pub fn new(service: Arc<BridgeService>) -> Self {
        Self { service }
    }

    fn begin(&self, env: &mut RequestEnv<'_, RequestSlot>) -> Result<Step, BridgeError> {
        let value = env
            .request
            .args
            .last()
            .cloned()
            .ok_or_else(|| BridgeError::InvalidRequest("missing value argument".to_string()))?;

        // Nothing is registered or written until the continuation exists.
        let continuation = RequestContinuation::new(env.request.id)?;
        let event_loop = self.service.event_loop();
        event_loop.notify();

        let settings = &self.service.config().request;
        let key = Bytes::from(format!("{}{}", settings.key_prefix, env.request.id.0));
        let close_after_reply = self.service.config().backend.policy == ConnectionPolicy::SingleUse;
        let weak = Arc::downgrade(&continuation);

        event_loop.schedule_async(move |conn| {
            conn.issue_command(
                RespFrame::command([Bytes::from_static(b"SET"), key.clone(), value]),
                None,
            );
            conn.issue_command(
                RespFrame::command([Bytes::from_static(b"GET"), key]),
                Some(Box::new(move |conn: &mut BackendConnection, reply: CommandReply| {
                    RequestContinuation::deliver(&weak, reply);
                    if close_after_reply {
                        conn.disconnect();
                    }
                })),
            );
        })?;

        env.register_interest(Interest::Descriptor {
            fd: continuation.readiness_fd(),
            timeout: Some(settings.timeout),
        });
        env.reply.extend_from_slice(BODY_OPEN);
        debug!("{}: suspended waiting for backend GET.", env.request.id);
        metrics::REQUESTS_STARTED_TOTAL.inc();
        *env.state = RequestSlot::Pending(continuation);
        Ok(Step::Suspend)
    }

    fn resume(
        &self,
        env: &mut RequestEnv<'_, RequestSlot>,
        continuation: Arc<RequestContinuation>,
    ) -> Result<Step, BridgeError> {
        let timeout = self.service.config().request.timeout;
        let outcome = continuation.wait_for(timeout)?;

        match outcome.clone().into_reply(timeout) {
            Ok(RespFrame::Error(msg)) => {
                warn!("{}: backend returned an error: {}", env.request.id, msg);
            }
            Ok(frame) => match frame.as_bytes() {
                Some(payload) => write_chunk(env.reply, payload),
                None => debug!("{}: backend returned no value ({:?}).", env.request.id, frame),
            },
            // The body is still closed so the response stays well-formed.
            Err(e) => warn!("{}: {}", env.request.id, e),
        }

        env.reply.extend_from_slice(BODY_CLOSE);
        env.deregister_interest();
        *env.state = RequestSlot::Complete(outcome);
        Ok(Step::Done)
    }
}

impl Handler for SetGetHandler {
    type State = RequestSlot;

    fn invoke(&self, env: &mut RequestEnv<'_, RequestSlot>) -> Result<Step, BridgeError> {
        let pending = match &*env.state {
            RequestSlot::NotStarted => None,
            RequestSlot::Pending(continuation) => Some(Arc::clone(continuation)),
            RequestSlot::Complete(_) => {
                return Err(BridgeError::InvalidState(format!(
                    "{} invoked after completion",
                    env.request.id
                )));
            }
        };
        match pending {
            None => self.begin(env),
            Some(continuation) => self.resume(env, continuation),
        }
    }
}
