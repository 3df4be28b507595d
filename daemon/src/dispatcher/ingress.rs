use futures::{channel::mpsc, SinkExt};

/// Messages that can be sent to the dispatcher [super::Actor].
#[derive(Debug)]
pub enum Message {
    /// Stop accepting and finish once every open connection has closed on its own.
    RequestShutdown,
    /// Drop every open connection and finish.
    Shutdown,
}

/// Ingress mailbox for the dispatcher [super::Actor].
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Ask the dispatcher to drain. Does nothing if the dispatcher has already finished.
    pub async fn request_shutdown(&mut self) {
        let _ = self.sender.send(Message::RequestShutdown).await;
    }

    /// Ask the dispatcher to drop every connection. Does nothing if the dispatcher has
    /// already finished.
    pub async fn shutdown(&mut self) {
        let _ = self.sender.send(Message::Shutdown).await;
    }
}
