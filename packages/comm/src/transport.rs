//! The outer message transport seam.
//!
//! The comm layer only needs "send this message". Framing, sockets and
//! signing belong to whatever implements [`Transport`].

use embedkern_wire::Message;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Something that delivers outbound messages to the peer.
pub trait Transport: Send + Sync {
    fn send(&self, message: Message) -> Result<(), TransportError>;
}

/// In-process transport backed by a tokio unbounded channel.
///
/// Messages sent here come out of the paired [`Outbox`] in order.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelTransport {
    /// Create a transport and the outbox that receives what it sends.
    pub fn pair() -> (Self, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, Outbox { rx })
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: Message) -> Result<(), TransportError> {
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }
}

/// Receiving end of a [`ChannelTransport`].
#[derive(Debug)]
pub struct Outbox {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Outbox {
    /// Take the next message if one is waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Block until a message arrives. `None` once every sender is gone.
    ///
    /// Must not be called from inside an async runtime.
    pub fn recv(&mut self) -> Option<Message> {
        self.rx.blocking_recv()
    }

    /// Take everything currently waiting.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.try_recv() {
            messages.push(message);
        }
        messages
    }
}
