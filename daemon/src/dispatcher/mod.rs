//! Accept connections on the source socket and hand each one to a [Connection].
//!
//! The dispatcher enforces the connection limit, periodically re-resolves the target
//! address, and coordinates shutdown:
//!
//! - [Mailbox::request_shutdown] stops accepting and waits for open connections to close.
//! - [Mailbox::shutdown] drops every open connection immediately.
//!
//! [Connection]: spiped_stream::conn::Connection

use std::time::Duration;

mod actor;
mod ingress;

pub use actor::Actor;
pub use ingress::{Mailbox, Message};

/// Configuration for the dispatcher [Actor].
#[derive(Clone, Debug)]
pub struct Config {
    /// Settings shared by every connection.
    pub connection: spiped_stream::Config,

    /// Address the target endpoints were resolved from.
    pub target: String,

    /// Maximum number of connections open at once.
    pub max_connections: usize,

    /// How often to re-resolve [Config::target]. `None` disables re-resolution.
    pub resolve_interval: Option<Duration>,

    /// Accept a single connection and finish once it closes.
    pub oneshot: bool,

    /// Size of the control mailbox.
    pub mailbox_size: usize,
}
