//! Lifecycle of one relayed connection.
//!
//! A connection owns the accepted socket from the moment it is created. It dials the target,
//! runs the [handshake] on the ciphertext side, relays both directions, and finally tears
//! everything down and reports a single [Reason].
//!
//! ```text
//! encrypting half:  connect ----> handshake(target) ----> relay
//! decrypting half:  connect --+
//!                   handshake(source) -+--------------> relay
//! ```
//!
//! Connecting and handshaking each race a timer of [Config::timeout]. The connect timer starts
//! when the connection is created; the handshake timer starts with the handshake.
//!
//! Every outstanding operation is a [Pending] future polled from a single loop, so cancelling
//! an operation (on timeout, failure, or shutdown) is just dropping it.

use crate::{
    handshake::handshake,
    keys::SessionKeys,
    pipe::{self, Mode},
    Config, Error, Role,
};
use futures::{
    channel::oneshot,
    future::{self, BoxFuture},
};
use rand::rngs::OsRng;
use spiped_cryptography::SharedSecret;
use spiped_runtime::{dial_first, Endpoint, Error as RuntimeError, Network, Socket as _};
use std::{future::Future, sync::Arc};
use tokio::{select, time::sleep};
use tracing::debug;

/// Why a connection was torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    /// Both directions reached EOF.
    Closed,
    /// A direction failed while relaying.
    Broken,
    /// The target could not be reached in time.
    ConnectFailed,
    /// The handshake failed or timed out.
    HandshakeFailed,
    /// The owner asked for the connection to be dropped.
    Cancelled,
}

/// An operation that is either outstanding or absent.
enum Pending<T> {
    Idle,
    Running(BoxFuture<'static, T>),
}

impl<T: Send + 'static> Pending<T> {
    fn start<F: Future<Output = T> + Send + 'static>(&mut self, future: F) {
        *self = Self::Running(Box::pin(future));
    }

    fn cancel(&mut self) {
        *self = Self::Idle;
    }

    /// Wait for the operation to complete. Never completes if idle.
    async fn next(&mut self) -> T {
        let Self::Running(future) = self else {
            return future::pending().await;
        };
        let output = future.await;
        *self = Self::Idle;
        output
    }
}

enum Event<S> {
    Cancelled,
    Connected(Result<S, RuntimeError>),
    ConnectTimeout,
    Handshake(S, Result<SessionKeys, Error>),
    HandshakeTimeout,
    Forward(Result<(), Error>),
    Reverse(Result<(), Error>),
}

/// A connection accepted from the source, relayed to the target.
pub struct Connection<N: Network> {
    id: u64,
    network: N,
    config: Config,
    secret: Arc<SharedSecret>,
    targets: Vec<Endpoint>,

    incoming: Option<N::Socket>,
    outgoing: Option<N::Socket>,
    keys: Option<SessionKeys>,

    connect: Pending<Result<N::Socket, RuntimeError>>,
    connect_timer: Pending<()>,
    handshake: Pending<(N::Socket, Result<SessionKeys, Error>)>,
    handshake_timer: Pending<()>,
    forward: Pending<Result<(), Error>>,
    reverse: Pending<Result<(), Error>>,
    forward_closed: bool,
    reverse_closed: bool,
}

impl<N: Network> Connection<N> {
    /// Create a connection for the accepted socket `incoming`. Nothing happens until
    /// [Connection::run] is called.
    pub fn new(
        id: u64,
        network: N,
        config: Config,
        secret: Arc<SharedSecret>,
        incoming: N::Socket,
        targets: Vec<Endpoint>,
    ) -> Self {
        Self {
            id,
            network,
            config,
            secret,
            targets,
            incoming: Some(incoming),
            outgoing: None,
            keys: None,
            connect: Pending::Idle,
            connect_timer: Pending::Idle,
            handshake: Pending::Idle,
            handshake_timer: Pending::Idle,
            forward: Pending::Idle,
            reverse: Pending::Idle,
            forward_closed: false,
            reverse_closed: false,
        }
    }

    /// Drive the connection until it is torn down. Resolving (or dropping the sender of)
    /// `cancel` tears it down with [Reason::Cancelled].
    pub async fn run(mut self, mut cancel: oneshot::Receiver<()>) -> Reason {
        debug!(id = self.id, role = ?self.config.role, "connection started");
        self.start_connect();
        if self.config.role == Role::Decrypt {
            if let Some(incoming) = self.incoming.take() {
                self.start_handshake(incoming);
            }
        }

        loop {
            let event = select! {
                _ = &mut cancel => Event::Cancelled,
                result = self.connect.next() => Event::Connected(result),
                _ = self.connect_timer.next() => Event::ConnectTimeout,
                (socket, result) = self.handshake.next() => Event::Handshake(socket, result),
                _ = self.handshake_timer.next() => Event::HandshakeTimeout,
                result = self.forward.next() => Event::Forward(result),
                result = self.reverse.next() => Event::Reverse(result),
            };
            if let Some(reason) = self.handle(event) {
                self.teardown();
                debug!(id = self.id, ?reason, "connection dropped");
                return reason;
            }
        }
    }

    fn handle(&mut self, event: Event<N::Socket>) -> Option<Reason> {
        match event {
            Event::Cancelled => Some(Reason::Cancelled),
            Event::Connected(Ok(outgoing)) => {
                self.connect_timer.cancel();
                match self.config.role {
                    Role::Encrypt => self.start_handshake(outgoing),
                    Role::Decrypt => self.outgoing = Some(outgoing),
                }
                self.launch();
                None
            }
            Event::Connected(Err(err)) => {
                debug!(id = self.id, ?err, "failed to connect to target");
                Some(Reason::ConnectFailed)
            }
            Event::ConnectTimeout => {
                debug!(id = self.id, "timed out connecting to target");
                Some(Reason::ConnectFailed)
            }
            Event::Handshake(socket, Ok(keys)) => {
                self.handshake_timer.cancel();
                match self.config.role {
                    Role::Encrypt => self.outgoing = Some(socket),
                    Role::Decrypt => self.incoming = Some(socket),
                }
                self.keys = Some(keys);
                self.launch();
                None
            }
            Event::Handshake(_, Err(err)) => {
                debug!(id = self.id, ?err, "handshake failed");
                Some(Reason::HandshakeFailed)
            }
            Event::HandshakeTimeout => {
                debug!(id = self.id, "handshake timed out");
                Some(Reason::HandshakeFailed)
            }
            Event::Forward(result) => self.relay_done(true, result),
            Event::Reverse(result) => self.relay_done(false, result),
        }
    }

    fn start_connect(&mut self) {
        let network = self.network.clone();
        let targets = std::mem::take(&mut self.targets);
        self.connect.start(async move { dial_first(&network, &targets).await });
        self.connect_timer.start(sleep(self.config.timeout));
    }

    fn start_handshake(&mut self, mut socket: N::Socket) {
        let config = self.config.clone();
        let secret = self.secret.clone();
        self.handshake.start(async move {
            let result = handshake(&mut socket, &config, &secret, &mut OsRng).await;
            (socket, result)
        });
        self.handshake_timer.start(sleep(self.config.timeout));
    }

    /// Start relaying once both sockets and the session keys are available.
    fn launch(&mut self) {
        let (incoming, outgoing, keys) =
            match (self.incoming.take(), self.outgoing.take(), self.keys.take()) {
                (Some(incoming), Some(outgoing), Some(keys)) => (incoming, outgoing, keys),
                (incoming, outgoing, keys) => {
                    self.incoming = incoming;
                    self.outgoing = outgoing;
                    self.keys = keys;
                    return;
                }
            };

        if self.config.keepalive {
            for socket in [&incoming, &outgoing] {
                if let Err(err) = socket.set_keepalive(true) {
                    debug!(id = self.id, ?err, "failed to enable keepalive");
                }
            }
        }

        // Forward carries source to target and always uses the client keys; reverse carries
        // target to source with the server keys.
        let mode = match self.config.role {
            Role::Encrypt => Mode::Encrypt,
            Role::Decrypt => Mode::Decrypt,
        };
        let SessionKeys { client, server } = keys;
        let (incoming_reader, incoming_writer) = tokio::io::split(incoming);
        let (outgoing_reader, outgoing_writer) = tokio::io::split(outgoing);
        self.forward.start(pipe::relay(mode, client, incoming_reader, outgoing_writer));
        self.reverse.start(pipe::relay(
            mode.reverse(),
            server,
            outgoing_reader,
            incoming_writer,
        ));
        debug!(id = self.id, "relaying");
    }

    fn relay_done(&mut self, forward: bool, result: Result<(), Error>) -> Option<Reason> {
        if let Err(err) = result {
            debug!(id = self.id, forward, ?err, "relay failed");
            return Some(Reason::Broken);
        }
        if forward {
            self.forward_closed = true;
        } else {
            self.reverse_closed = true;
        }
        (self.forward_closed && self.reverse_closed).then_some(Reason::Closed)
    }

    /// Cancel every outstanding operation and close both sockets.
    fn teardown(&mut self) {
        self.connect.cancel();
        self.connect_timer.cancel();
        self.handshake.cancel();
        self.handshake_timer.cancel();
        self.forward.cancel();
        self.reverse.cancel();
        self.incoming = None;
        self.outgoing = None;
        self.keys = None;
    }
}
