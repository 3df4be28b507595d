use super::{
    ingress::{Mailbox, Message},
    Config,
};
use crate::Error;
use futures::{
    channel::{mpsc, oneshot},
    future::{self, BoxFuture},
    StreamExt as _,
};
use spiped_cryptography::SharedSecret;
use spiped_runtime::{Endpoint, Error as RuntimeError, Listener as _, Network, Resolver};
use spiped_stream::conn::{Connection, Reason};
use std::{collections::HashMap, mem, pin::Pin, sync::Arc, time::Duration};
use tokio::{
    select,
    task::JoinHandle,
    time::{sleep, Sleep},
};
use tracing::{debug, error, info, warn};

/// State of the periodic target re-resolution.
enum Refresh {
    Disabled,
    Waiting(Pin<Box<Sleep>>),
    Resolving(BoxFuture<'static, Result<Vec<Endpoint>, RuntimeError>>),
}

enum Refreshed {
    Due,
    Resolved(Result<Vec<Endpoint>, RuntimeError>),
}

impl Refresh {
    fn schedule(interval: Option<Duration>) -> Self {
        match interval {
            Some(interval) => Self::Waiting(Box::pin(sleep(interval))),
            None => Self::Disabled,
        }
    }

    /// Never completes if disabled. The caller must replace the state after every event.
    async fn next(&mut self) -> Refreshed {
        match self {
            Self::Disabled => future::pending().await,
            Self::Waiting(timer) => {
                timer.await;
                Refreshed::Due
            }
            Self::Resolving(lookup) => Refreshed::Resolved(lookup.await),
        }
    }
}

/// Accepts connections from a listener and relays each one to the target.
pub struct Actor<N: Network, R: Resolver> {
    network: N,
    resolver: R,
    listener: N::Listener,
    secret: Arc<SharedSecret>,
    cfg: Config,

    control: mpsc::Receiver<Message>,
    reports: mpsc::UnboundedReceiver<(u64, Reason)>,
    reporter: mpsc::UnboundedSender<(u64, Reason)>,

    targets: Vec<Endpoint>,
    refresh: Refresh,
    connections: HashMap<u64, oneshot::Sender<()>>,
    next_id: u64,
    accepted: u64,
    draining: bool,
    limited: bool,
}

impl<N: Network, R: Resolver> Actor<N, R> {
    /// Create a dispatcher that accepts from `listener` and relays to `targets`, which were
    /// resolved from [Config::target].
    pub fn new(
        network: N,
        resolver: R,
        listener: N::Listener,
        secret: Arc<SharedSecret>,
        targets: Vec<Endpoint>,
        cfg: Config,
    ) -> (Self, Mailbox) {
        let (sender, control) = mpsc::channel(cfg.mailbox_size);
        let (reporter, reports) = mpsc::unbounded();
        let refresh = Refresh::schedule(cfg.resolve_interval);
        (
            Self {
                network,
                resolver,
                listener,
                secret,
                cfg,
                control,
                reports,
                reporter,
                targets,
                refresh,
                connections: HashMap::new(),
                next_id: 0,
                accepted: 0,
                draining: false,
                limited: false,
            },
            Mailbox::new(sender),
        )
    }

    /// Run the dispatcher on a new task.
    pub fn start(self) -> JoinHandle<Result<(), Error>> {
        tokio::spawn(self.run())
    }

    /// Run until drained, shut down, or the listener fails.
    pub async fn run(mut self) -> Result<(), Error> {
        loop {
            if self.finished() {
                break;
            }
            let accepting = self.accepting();
            select! {
                result = self.listener.accept(), if accepting => {
                    match result {
                        Ok(socket) => self.spawn(socket),
                        Err(err) => {
                            error!(?err, "failed to accept connection");
                            self.shutdown().await;
                            return Err(Error::AcceptFailed(err));
                        }
                    }
                },
                Some((id, reason)) = self.reports.next() => {
                    self.closed(id, reason);
                },
                message = self.control.next() => {
                    match message {
                        Some(Message::RequestShutdown) => {
                            if !self.draining {
                                info!(active = self.connections.len(), "draining connections");
                                self.draining = true;
                            }
                        }
                        Some(Message::Shutdown) | None => {
                            self.shutdown().await;
                            break;
                        }
                    }
                },
                refreshed = self.refresh.next() => {
                    self.refreshed(refreshed);
                },
            }
        }
        info!(accepted = self.accepted, "dispatcher stopped");
        Ok(())
    }

    fn accepting(&self) -> bool {
        !self.draining
            && self.connections.len() < self.cfg.max_connections
            && !(self.cfg.oneshot && self.accepted > 0)
    }

    fn finished(&self) -> bool {
        self.connections.is_empty() && (self.draining || (self.cfg.oneshot && self.accepted > 0))
    }

    fn spawn(&mut self, socket: N::Socket) {
        let id = self.next_id;
        self.next_id += 1;
        self.accepted += 1;

        let (cancel, cancelled) = oneshot::channel();
        let connection = Connection::new(
            id,
            self.network.clone(),
            self.cfg.connection.clone(),
            self.secret.clone(),
            socket,
            self.targets.clone(),
        );
        let reporter = self.reporter.clone();
        tokio::spawn(async move {
            let reason = connection.run(cancelled).await;
            let _ = reporter.unbounded_send((id, reason));
        });
        self.connections.insert(id, cancel);
        debug!(id, active = self.connections.len(), "accepted connection");

        if self.connections.len() >= self.cfg.max_connections && !self.limited {
            warn!(
                max = self.cfg.max_connections,
                "connection limit reached; not accepting"
            );
            self.limited = true;
        }
    }

    fn closed(&mut self, id: u64, reason: Reason) {
        self.connections.remove(&id);
        debug!(id, ?reason, active = self.connections.len(), "connection closed");
        if self.connections.len() < self.cfg.max_connections {
            self.limited = false;
        }
    }

    fn refreshed(&mut self, refreshed: Refreshed) {
        match refreshed {
            Refreshed::Due => {
                debug!(address = %self.cfg.target, "re-resolving target");
                self.refresh = Refresh::Resolving(self.resolver.resolve(&self.cfg.target));
            }
            Refreshed::Resolved(result) => {
                match result {
                    Ok(targets) if !targets.is_empty() => {
                        debug!(?targets, "re-resolved target");
                        self.targets = targets;
                    }
                    Ok(_) => warn!(
                        address = %self.cfg.target,
                        "target resolved to nothing; keeping previous addresses"
                    ),
                    Err(err) => warn!(
                        address = %self.cfg.target,
                        ?err,
                        "failed to re-resolve target; keeping previous addresses"
                    ),
                }
                self.refresh = Refresh::schedule(self.cfg.resolve_interval);
            }
        }
    }

    /// Cancel every connection and wait for each to report.
    async fn shutdown(&mut self) {
        let active = self.connections.len();
        info!(active, "dropping connections");
        for cancel in mem::take(&mut self.connections).into_values() {
            let _ = cancel.send(());
        }
        for _ in 0..active {
            if self.reports.next().await.is_none() {
                break;
            }
        }
    }
}
