//! Create secure pipes between sockets that share a key.
//!
//! An encrypting daemon accepts plaintext connections and forwards them, encrypted and
//! authenticated, to a decrypting daemon, which forwards the plaintext on to the target:
//!
//! ```text
//! client --> spiped -e --(ciphertext)--> spiped -d --> server
//! ```
//!
//! The [dispatcher] accepts connections and enforces limits, [shutdown] turns process
//! signals into dispatcher requests, and the per-connection protocol lives in
//! [spiped_stream].

use spiped_runtime::{Endpoint, Error as RuntimeError, Resolver};
use std::{io, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

pub mod dispatcher;
pub mod shutdown;

/// How long to wait between attempts when waiting for an address to resolve.
pub const RESOLVE_RETRY: Duration = Duration::from_secs(1);

/// Errors that stop the daemon.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to load key: {0}")]
    Secret(#[from] spiped_cryptography::Error),
    #[error("unable to start resolver: {0}")]
    Resolver(RuntimeError),
    #[error("unable to resolve {0}: {1}")]
    Resolve(String, RuntimeError),
    #[error("unable to bind source: {0}")]
    Bind(RuntimeError),
    #[error("accept failed: {0}")]
    AcceptFailed(RuntimeError),
    #[error("unable to start: {0}")]
    Startup(#[from] io::Error),
}

/// Resolve `address` to at least one endpoint. With `wait`, lookups that fail or find nothing
/// are retried every [RESOLVE_RETRY] until they succeed; malformed addresses fail immediately
/// either way.
pub async fn resolve<R: Resolver>(
    resolver: &R,
    address: &str,
    wait: bool,
) -> Result<Vec<Endpoint>, Error> {
    loop {
        let result = resolver.resolve(address).await.and_then(|endpoints| {
            if endpoints.is_empty() {
                return Err(RuntimeError::NoAddresses(address.to_string()));
            }
            Ok(endpoints)
        });
        match result {
            Ok(endpoints) => return Ok(endpoints),
            Err(err @ (RuntimeError::ResolveFailed(..) | RuntimeError::NoAddresses(_))) if wait => {
                warn!(address, ?err, "unable to resolve; retrying");
                sleep(RESOLVE_RETRY).await;
            }
            Err(err) => return Err(Error::Resolve(address.to_string(), err)),
        }
    }
}
