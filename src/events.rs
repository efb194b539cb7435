//! # Local Event Sink
//!
//! The node never talks to a user interface directly. Everything a frontend
//! might show is reported through an [`EventSink`] handed to the node at
//! construction time.
//!
//! Two implementations ship with the crate:
//! - [`ChannelSink`]: forwards [`NodeEvent`]s into an unbounded channel, for
//!   frontends and tests that consume events as a stream
//! - [`TracingSink`]: only logs, for headless nodes

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Callbacks invoked by the node. Implementations must be cheap and must
/// not block: they run on the tasks handling network traffic.
pub trait EventSink: Send + Sync + 'static {
    /// A new peer announced itself with a JOIN.
    fn on_peer_joined(&self, name: &str);

    /// A chat message should be displayed (received, or our own local echo).
    fn on_message_received(&self, text: &str);

    /// Sending to or reading from `peer` failed. Never fatal.
    fn on_transport_error(&self, peer: &str, detail: &str);

    /// The listener is up and the node is reachable at `address`.
    fn on_started(&self, _name: &str, _address: &str) {}

    /// Our JOIN handshake to `address` was sent.
    fn on_peer_connected(&self, _address: &str) {}
}

/// Owned form of every [`EventSink`] callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    Started { name: String, address: String },
    PeerConnected(String),
    PeerJoined(String),
    MessageReceived(String),
    TransportError { peer: String, detail: String },
}

/// Sink that turns callbacks into [`NodeEvent`]s on a channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<NodeEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: NodeEvent) {
        // Receiver gone means nobody is listening anymore; drop the event.
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelSink {
    fn on_peer_joined(&self, name: &str) {
        self.emit(NodeEvent::PeerJoined(name.to_string()));
    }

    fn on_message_received(&self, text: &str) {
        self.emit(NodeEvent::MessageReceived(text.to_string()));
    }

    fn on_transport_error(&self, peer: &str, detail: &str) {
        self.emit(NodeEvent::TransportError {
            peer: peer.to_string(),
            detail: detail.to_string(),
        });
    }

    fn on_started(&self, name: &str, address: &str) {
        self.emit(NodeEvent::Started {
            name: name.to_string(),
            address: address.to_string(),
        });
    }

    fn on_peer_connected(&self, address: &str) {
        self.emit(NodeEvent::PeerConnected(address.to_string()));
    }
}

/// Sink that only writes to the `tracing` log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_peer_joined(&self, name: &str) {
        info!(peer_name = %name, "peer joined the network");
    }

    fn on_message_received(&self, text: &str) {
        info!(%text, "message");
    }

    fn on_transport_error(&self, peer: &str, detail: &str) {
        warn!(peer = %peer, error = %detail, "transport error");
    }

    fn on_started(&self, name: &str, address: &str) {
        info!(%name, %address, "node started");
    }

    fn on_peer_connected(&self, address: &str) {
        info!(peer = %address, "connected to peer");
    }
}
