// src/core/backend/connection.rs

//! The backend connection state machine.
//!
//! Every method here runs on the event-loop thread. Commands are encoded into
//! an outbound buffer that the reactor flushes; replies are matched to pending
//! commands in FIFO order, which is the ordering RESP guarantees per connection.

use super::{CommandId, CommandReply, CompletionCallback, ConnectionObserver, ConnectionState};
use crate::core::event_loop::run_contained;
use crate::core::metrics;
use crate::core::protocol::{RespFrame, RespFrameCodec};
use crate::core::BridgeError;
use bytes::BytesMut;
use futures::StreamExt;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{Encoder, FramedRead};
use tracing::{debug, trace, warn};

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

enum Transport {
    Idle,
    Connecting(ConnectFuture),
    Open {
        reader: FramedRead<OwnedReadHalf, RespFrameCodec>,
        writer: OwnedWriteHalf,
    },
}

/// Something the reactor observed on the connection's socket.
pub(crate) enum BackendEvent {
    Connected(io::Result<TcpStream>),
    Written(io::Result<usize>),
    Frame(Option<Result<RespFrame, BridgeError>>),
}

struct PendingCommand {
    id: CommandId,
    name: String,
    completion: Option<CompletionCallback>,
}

pub struct BackendConnection {
    addr: SocketAddr,
    connect_timeout: Duration,
    state: ConnectionState,
    transport: Transport,
    outbound: BytesMut,
    pending: VecDeque<PendingCommand>,
    next_id: u64,
    closing: bool,
    terminated: bool,
    observer: Box<dyn ConnectionObserver>,
}

impl BackendConnection {
    pub fn new(
        addr: SocketAddr,
        connect_timeout: Duration,
        observer: Box<dyn ConnectionObserver>,
    ) -> Self {
        Self {
            addr,
            connect_timeout,
            state: ConnectionState::Disconnected,
            transport: Transport::Idle,
            outbound: BytesMut::with_capacity(4096),
            pending: VecDeque::new(),
            next_id: 0,
            closing: false,
            terminated: false,
            observer,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Commands still owed a reply.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The socket descriptor while a socket exists.
    pub fn raw_fd(&self) -> Option<RawFd> {
        match &self.transport {
            Transport::Open { writer, .. } => Some(writer.as_ref().as_raw_fd()),
            _ => None,
        }
    }

    /// Starts an asynchronous connect. The outcome is reported to the observer
    /// once the reactor drives it. Calling this on a live connection is a no-op.
    pub fn connect(&mut self) {
        if self.terminated {
            debug!("connect() ignored: event loop is shutting down.");
            return;
        }
        if !matches!(self.transport, Transport::Idle) {
            debug!("connect() ignored: backend connection already active.");
            return;
        }
        let addr = self.addr;
        let timeout = self.connect_timeout;
        self.closing = false;
        self.state = ConnectionState::Connecting;
        self.transport = Transport::Connecting(Box::pin(async move {
            match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(res) => res,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {timeout:?}"),
                )),
            }
        }));
        debug!("Connecting to backend at {}...", addr);
    }

    fn accepts_commands(&self) -> bool {
        !self.closing
            && matches!(
                self.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
    }

    /// Queues `frame` for sending. `completion` runs exactly once, with the
    /// reply or with `NoReply` if the connection cannot deliver one.
    pub fn issue_command(
        &mut self,
        frame: RespFrame,
        completion: Option<CompletionCallback>,
    ) -> CommandId {
        self.next_id += 1;
        let id = CommandId(self.next_id);
        let name = frame.command_name();

        if !self.accepts_commands() {
            debug!(
                "{} {} rejected: connection is {:?}{}.",
                id,
                name,
                self.state,
                if self.closing { " (closing)" } else { "" }
            );
            if let Some(completion) = completion {
                self.run_completion(id, completion, CommandReply::NoReply);
            }
            return id;
        }

        if let Err(e) = RespFrameCodec.encode(frame, &mut self.outbound) {
            warn!("{} {} could not be encoded: {}", id, name, e);
            if let Some(completion) = completion {
                self.run_completion(id, completion, CommandReply::NoReply);
            }
            return id;
        }

        trace!("{} {} queued.", id, name);
        self.pending.push_back(PendingCommand {
            id,
            name,
            completion,
        });
        metrics::COMMANDS_ISSUED_TOTAL.inc();
        metrics::PENDING_COMMANDS.set(self.pending.len() as f64);
        id
    }

    /// Graceful close: new commands are refused, replies still owed are
    /// delivered, then the socket is closed.
    pub fn disconnect(&mut self) {
        if self.closing {
            return;
        }
        self.closing = true;
        debug!(
            "Backend disconnect requested with {} command(s) pending.",
            self.pending.len()
        );
        if self.pending.is_empty() && !matches!(self.transport, Transport::Idle) {
            self.close(Ok(()));
        }
    }

    /// Waits for the next socket event. Never resolves while idle.
    /// Cancel-safe: the reactor may drop this future at any await point.
    pub(crate) async fn next_event(&mut self) -> BackendEvent {
        match &mut self.transport {
            Transport::Idle => std::future::pending().await,
            Transport::Connecting(fut) => BackendEvent::Connected(fut.await),
            Transport::Open { reader, writer } => {
                if self.outbound.is_empty() {
                    BackendEvent::Frame(reader.next().await)
                } else {
                    tokio::select! {
                        res = writer.write_buf(&mut self.outbound) => BackendEvent::Written(res),
                        frame = reader.next() => BackendEvent::Frame(frame),
                    }
                }
            }
        }
    }

    pub(crate) fn handle_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Connected(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY on backend socket: {}", e);
                }
                let (read_half, write_half) = stream.into_split();
                self.transport = Transport::Open {
                    reader: FramedRead::new(read_half, RespFrameCodec),
                    writer: write_half,
                };
                self.state = ConnectionState::Connected;
                metrics::BACKEND_CONNECTED.set(1.0);
                self.observer.on_connect(self.addr, &Ok(()));
                if self.closing && self.pending.is_empty() {
                    self.close(Ok(()));
                }
            }
            BackendEvent::Connected(Err(e)) => {
                let err = BridgeError::ConnectionFailure(e.to_string());
                self.transport = Transport::Idle;
                self.outbound.clear();
                self.state = ConnectionState::Error(e.to_string());
                self.observer.on_connect(self.addr, &Err(err));
                self.fail_pending();
            }
            BackendEvent::Written(Ok(0)) => {
                self.close(Err(BridgeError::ConnectionFailure(
                    "backend socket closed for writing".to_string(),
                )));
            }
            BackendEvent::Written(Ok(n)) => trace!("Flushed {} byte(s) to backend.", n),
            BackendEvent::Written(Err(e)) => {
                self.close(Err(BridgeError::ConnectionFailure(e.to_string())));
            }
            BackendEvent::Frame(Some(Ok(frame))) => self.dispatch_reply(frame),
            BackendEvent::Frame(Some(Err(e))) => {
                self.close(Err(BridgeError::ConnectionFailure(format!(
                    "protocol error: {e}"
                ))));
            }
            BackendEvent::Frame(None) => {
                if self.closing {
                    self.close(Ok(()));
                } else {
                    self.close(Err(BridgeError::ConnectionFailure(
                        "connection closed by peer".to_string(),
                    )));
                }
            }
        }
    }

    fn dispatch_reply(&mut self, frame: RespFrame) {
        let Some(command) = self.pending.pop_front() else {
            warn!("Dropping unsolicited backend reply: {:?}", frame);
            return;
        };
        metrics::PENDING_COMMANDS.set(self.pending.len() as f64);
        if let RespFrame::Error(msg) = &frame {
            debug!("{} {} returned an error: {}", command.id, command.name, msg);
        }
        if let Some(completion) = command.completion {
            self.run_completion(command.id, completion, CommandReply::Reply(frame));
        }
        let still_open = !matches!(self.transport, Transport::Idle);
        if self.closing && still_open && self.pending.is_empty() {
            self.close(Ok(()));
        }
    }

    fn run_completion(&mut self, id: CommandId, completion: CompletionCallback, reply: CommandReply) {
        trace!("{} completing with {:?}.", id, reply);
        run_contained("completion callback", || completion(self, reply));
    }

    /// Closes the socket or abandons an in-flight connect, then fails every
    /// pending command with `NoReply`. Only an open socket reports a disconnect.
    fn close(&mut self, result: Result<(), BridgeError>) {
        let was_open = matches!(self.transport, Transport::Open { .. });
        self.transport = Transport::Idle;
        self.outbound.clear();
        self.state = match &result {
            Ok(()) => ConnectionState::Disconnected,
            Err(e) => ConnectionState::Error(e.to_string()),
        };
        metrics::BACKEND_CONNECTED.set(0.0);
        if was_open {
            self.observer.on_disconnect(self.addr, &result);
        }
        self.fail_pending();
    }

    fn fail_pending(&mut self) {
        while let Some(command) = self.pending.pop_front() {
            if let Some(completion) = command.completion {
                self.run_completion(command.id, completion, CommandReply::NoReply);
            }
        }
        metrics::PENDING_COMMANDS.set(0.0);
    }

    /// Tears everything down when the event loop stops.
    pub(crate) fn shutdown(&mut self) {
        self.terminated = true;
        self.closing = true;
        if matches!(self.transport, Transport::Idle) && self.pending.is_empty() {
            return;
        }
        self.close(Ok(()));
    }
}
