//! Bind, dial, and resolve the endpoints of a secure pipe.
//!
//! The [Network] trait abstracts over the transport so that connection handling can be driven
//! by real sockets (see [tokio]) or by the in-memory network in [mocks]. Name resolution is kept
//! out of the event loop by the [Resolver] trait, implemented for production by
//! [resolver::Dns].
//!
//! # Status
//!
//! `spiped-runtime` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

#[cfg(not(unix))]
compile_error!("spiped-runtime requires a unix platform");

use ::tokio::io::{AsyncRead, AsyncWrite};
use futures::future::BoxFuture;
use std::{future::Future, io::Error as IoError};
use thiserror::Error;
use tracing::debug;

mod endpoint;
pub use endpoint::Endpoint;
pub mod mocks;
mod network;
pub use network::tokio;
pub mod resolver;

/// Errors that can occur when interacting with the network.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("unable to resolve {0}: {1}")]
    ResolveFailed(String, IoError),
    #[error("no addresses found for {0}")]
    NoAddresses(String),
    #[error("resolver closed")]
    ResolverClosed,
    #[error("bind failed: {0}: {1}")]
    BindFailed(Endpoint, IoError),
    #[error("connection failed")]
    ConnectionFailed,
    #[error("closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] IoError),
}

/// A bidirectional byte stream. Shutting down the write side half-closes the connection.
pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Enable or disable transport keep-alives.
    fn set_keepalive(&self, enabled: bool) -> Result<(), IoError>;
}

/// Interface that any network must implement to create and accept connections.
pub trait Network: Clone + Send + Sync + 'static {
    /// The type of [Socket] produced by dialing or accepting.
    type Socket: Socket;

    /// The type of [Listener] that's returned when binding to an endpoint.
    type Listener: Listener<Socket = Self::Socket>;

    /// Bind to the given endpoint.
    fn bind(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Listener, Error>> + Send;

    /// Dial the given endpoint.
    fn dial(&self, endpoint: &Endpoint)
        -> impl Future<Output = Result<Self::Socket, Error>> + Send;
}

/// Interface that any network must implement to handle incoming connections.
pub trait Listener: Send + 'static {
    /// The type of [Socket] returned when accepting a connection.
    type Socket: Socket;

    /// Accept an incoming connection.
    fn accept(&mut self) -> impl Future<Output = Result<Self::Socket, Error>> + Send;

    /// Returns the local endpoint of the listener.
    fn local_endpoint(&self) -> Result<Endpoint, IoError>;
}

/// Interface for turning an address string into the [Endpoint]s it names.
pub trait Resolver: Send + 'static {
    /// Resolve `address`. The returned future does not borrow the resolver.
    fn resolve(&self, address: &str) -> BoxFuture<'static, Result<Vec<Endpoint>, Error>>;
}

/// Dial each of `targets` in order, returning the first connection that succeeds.
pub async fn dial_first<N: Network>(
    network: &N,
    targets: &[Endpoint],
) -> Result<N::Socket, Error> {
    for endpoint in targets {
        match network.dial(endpoint).await {
            Ok(socket) => return Ok(socket),
            Err(err) => debug!(%endpoint, ?err, "dial failed"),
        }
    }
    Err(Error::ConnectionFailed)
}
