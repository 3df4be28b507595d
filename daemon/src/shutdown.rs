//! Turn process signals into dispatcher shutdown requests.
//!
//! `SIGTERM` asks the dispatcher to drain. `SIGINT`, or a `SIGTERM` during the drain, drops
//! every open connection.

use crate::dispatcher::Mailbox;
use futures::{
    stream::{self, BoxStream},
    Stream, StreamExt as _,
};
use std::io;
use tokio::{
    select,
    signal::unix::{signal, SignalKind},
};
use tracing::{info, warn};

/// A shutdown signal delivered to the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// `SIGTERM`
    Terminate,
    /// `SIGINT`
    Interrupt,
}

/// Stream of `SIGTERM` and `SIGINT` deliveries.
pub fn signals() -> Result<BoxStream<'static, Signal>, io::Error> {
    let terminate = signal(SignalKind::terminate())?;
    let interrupt = signal(SignalKind::interrupt())?;
    let signals = stream::unfold(
        (terminate, interrupt),
        |(mut terminate, mut interrupt)| async move {
            let signal = select! {
                Some(()) = terminate.recv() => Signal::Terminate,
                Some(()) = interrupt.recv() => Signal::Interrupt,
                else => return None,
            };
            Some((signal, (terminate, interrupt)))
        },
    );
    Ok(signals.boxed())
}

/// Forward `signals` to the dispatcher behind `mailbox`.
pub async fn forward<S>(mut signals: S, mut mailbox: Mailbox)
where
    S: Stream<Item = Signal> + Unpin,
{
    let mut draining = false;
    while let Some(signal) = signals.next().await {
        if signal == Signal::Terminate && !draining {
            info!(?signal, "shutdown requested; draining connections");
            mailbox.request_shutdown().await;
            draining = true;
            continue;
        }
        warn!(?signal, "shutdown requested; dropping connections");
        mailbox.shutdown().await;
        return;
    }
}
