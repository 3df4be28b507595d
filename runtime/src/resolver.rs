//! Name resolution on a dedicated thread.
//!
//! The system resolver blocks, so requests are handed to a worker thread that owns nothing
//! but its request queue. Results come back over a oneshot channel that the event loop can
//! await. The worker exits once every [Dns] handle has been dropped and the request in
//! progress (if any) completes.

use crate::{Endpoint, Error};
use futures::{channel::oneshot, future::BoxFuture};
use std::{sync::mpsc, thread};
use tracing::debug;

struct Request {
    address: String,
    responder: oneshot::Sender<Result<Vec<Endpoint>, Error>>,
}

/// Handle to the resolver thread.
#[derive(Clone)]
pub struct Dns {
    sender: mpsc::Sender<Request>,
}

impl Dns {
    /// Start the resolver thread.
    pub fn spawn() -> Result<Self, Error> {
        let (sender, receiver) = mpsc::channel::<Request>();
        thread::Builder::new()
            .name("resolver".into())
            .spawn(move || {
                while let Ok(request) = receiver.recv() {
                    let result = Endpoint::resolve(&request.address);
                    debug!(address = %request.address, ok = result.is_ok(), "resolved");
                    let _ = request.responder.send(result);
                }
            })?;
        Ok(Self { sender })
    }
}

impl crate::Resolver for Dns {
    fn resolve(&self, address: &str) -> BoxFuture<'static, Result<Vec<Endpoint>, Error>> {
        let (responder, receiver) = oneshot::channel();
        let submitted = self.sender.send(Request {
            address: address.to_string(),
            responder,
        });
        Box::pin(async move {
            submitted.map_err(|_| Error::ResolverClosed)?;
            receiver.await.map_err(|_| Error::ResolverClosed)?
        })
    }
}
