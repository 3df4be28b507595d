//! An in-memory [crate::Network] for tests.
//!
//! Connections are [DuplexStream] pairs. Endpoints can be bound, left unbound (dials fail
//! immediately), or [Network::blackhole]d (dials never complete). Dials can be slowed down
//! with [Network::with_latency].
//!
//! [Resolver] answers from a scripted queue of results.

use crate::{Endpoint, Error};
use futures::{
    channel::mpsc,
    future::{self, BoxFuture},
    StreamExt as _,
};
use std::{
    collections::{HashMap, VecDeque},
    io,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::io::DuplexStream;

/// Capacity of each direction of a mock connection.
const BUFFER_SIZE: usize = 64 * 1024;

impl crate::Socket for DuplexStream {
    fn set_keepalive(&self, _enabled: bool) -> Result<(), io::Error> {
        Ok(())
    }
}

#[derive(Clone)]
enum Route {
    Listening(mpsc::UnboundedSender<DuplexStream>),
    Blackhole,
}

/// In-memory network. Clones share the same endpoints.
#[derive(Clone, Default)]
pub struct Network {
    routes: Arc<Mutex<HashMap<Endpoint, Route>>>,
    latency: Duration,
}

impl Network {
    /// Delay every dial made through this handle by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every dial to `endpoint` hang forever.
    pub fn blackhole(&self, endpoint: Endpoint) {
        self.routes.lock().unwrap().insert(endpoint, Route::Blackhole);
    }

    /// Forget `endpoint`. A listener bound to it fails its next accept.
    pub fn unbind(&self, endpoint: &Endpoint) {
        self.routes.lock().unwrap().remove(endpoint);
    }
}

impl crate::Network for Network {
    type Socket = DuplexStream;
    type Listener = Listener;

    async fn bind(&self, endpoint: &Endpoint) -> Result<Self::Listener, Error> {
        let mut routes = self.routes.lock().unwrap();
        if let Some(Route::Listening(sender)) = routes.get(endpoint) {
            if !sender.is_closed() {
                return Err(Error::BindFailed(
                    endpoint.clone(),
                    io::ErrorKind::AddrInUse.into(),
                ));
            }
        }
        let (sender, receiver) = mpsc::unbounded();
        routes.insert(endpoint.clone(), Route::Listening(sender));
        Ok(Listener {
            endpoint: endpoint.clone(),
            receiver,
        })
    }

    async fn dial(&self, endpoint: &Endpoint) -> Result<Self::Socket, Error> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let route = self.routes.lock().unwrap().get(endpoint).cloned();
        match route {
            Some(Route::Listening(sender)) => {
                let (local, remote) = tokio::io::duplex(BUFFER_SIZE);
                sender
                    .unbounded_send(remote)
                    .map_err(|_| Error::ConnectionFailed)?;
                Ok(local)
            }
            Some(Route::Blackhole) => future::pending().await,
            None => Err(Error::ConnectionFailed),
        }
    }
}

/// [crate::Listener] returned by [Network].
pub struct Listener {
    endpoint: Endpoint,
    receiver: mpsc::UnboundedReceiver<DuplexStream>,
}

impl crate::Listener for Listener {
    type Socket = DuplexStream;

    async fn accept(&mut self) -> Result<Self::Socket, Error> {
        self.receiver.next().await.ok_or(Error::Closed)
    }

    fn local_endpoint(&self) -> Result<Endpoint, io::Error> {
        Ok(self.endpoint.clone())
    }
}

/// [crate::Resolver] that pops one scripted result per call. Once the script runs out,
/// every call fails with [Error::NoAddresses].
#[derive(Clone, Default)]
pub struct Resolver {
    script: Arc<Mutex<VecDeque<Result<Vec<Endpoint>, Error>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Resolver {
    /// Append a result to the script.
    pub fn push(&self, result: Result<Vec<Endpoint>, Error>) {
        self.script.lock().unwrap().push_back(result);
    }

    /// Addresses resolved so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl crate::Resolver for Resolver {
    fn resolve(&self, address: &str) -> BoxFuture<'static, Result<Vec<Endpoint>, Error>> {
        self.calls.lock().unwrap().push(address.to_string());
        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::NoAddresses(address.to_string())));
        Box::pin(future::ready(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{network::tests, Listener as _, Network as _, Resolver as _};

    #[tokio::test]
    async fn test_trait() {
        tests::test_network_trait(Network::default(), "10.0.0.1:80".parse().unwrap()).await;
    }

    #[tokio::test]
    async fn test_bind_in_use() {
        let network = Network::default();
        let endpoint: Endpoint = "10.0.0.1:80".parse().unwrap();
        let listener = network.bind(&endpoint).await.unwrap();
        assert!(matches!(
            network.bind(&endpoint).await,
            Err(Error::BindFailed(_, _))
        ));

        // Dropping the listener frees the endpoint and refuses new dials.
        drop(listener);
        assert!(matches!(
            network.dial(&endpoint).await,
            Err(Error::ConnectionFailed)
        ));
        assert!(network.bind(&endpoint).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency() {
        let network = Network::default();
        let endpoint: Endpoint = "10.0.0.1:80".parse().unwrap();
        let _listener = network.bind(&endpoint).await.unwrap();
        let slow = network.clone().with_latency(Duration::from_secs(3));

        let start = tokio::time::Instant::now();
        slow.dial(&endpoint).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));

        // The original handle is unaffected.
        let start = tokio::time::Instant::now();
        network.dial(&endpoint).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blackhole() {
        let network = Network::default();
        let endpoint: Endpoint = "10.0.0.1:80".parse().unwrap();
        network.blackhole(endpoint.clone());
        let result = tokio::time::timeout(Duration::from_secs(60), network.dial(&endpoint)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unbind_fails_accept() {
        let network = Network::default();
        let endpoint: Endpoint = "10.0.0.1:80".parse().unwrap();
        let mut listener = network.bind(&endpoint).await.unwrap();
        network.unbind(&endpoint);
        assert!(matches!(listener.accept().await, Err(Error::Closed)));
        assert!(matches!(
            network.dial(&endpoint).await,
            Err(Error::ConnectionFailed)
        ));
    }

    #[tokio::test]
    async fn test_scripted_resolver() {
        let resolver = Resolver::default();
        let endpoint: Endpoint = "10.0.0.1:80".parse().unwrap();
        resolver.push(Ok(vec![endpoint.clone()]));
        resolver.push(Err(Error::ResolverClosed));

        assert_eq!(resolver.resolve("a").await.unwrap(), vec![endpoint]);
        assert!(matches!(
            resolver.resolve("b").await,
            Err(Error::ResolverClosed)
        ));
        assert!(matches!(
            resolver.resolve("c").await,
            Err(Error::NoAddresses(address)) if address == "c"
        ));
        assert_eq!(resolver.calls(), vec!["a", "b", "c"]);
    }
}
