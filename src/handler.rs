//! # Protocol Handler
//!
//! Turns inbound frames into state transitions.
//!
//! | Frame | Effect |
//! |-------|--------|
//! | `JOIN:<name>:<address>` | Register the newcomer, send it our peer list, flood the JOIN |
//! | `PEERS:<addr>,...` | Handshake with every address we did not know |
//! | chat | Hand to [`Propagator::accept`] |
//!
//! ## Membership convergence
//!
//! A node that joins through a bootstrap peer receives that peer's full
//! PEERS list and sends its own JOIN to every address in it. Meanwhile the
//! bootstrap peer floods the newcomer's JOIN, so every existing node learns
//! the newcomer too, without any central directory.
//!
//! Handshakes are fire-and-forget: a JOIN counts as delivered once it is
//! written, and no reply is awaited.

use std::net::SocketAddr;

use async_trait::async_trait;
use tracing::{debug, info, trace};

use crate::messages::Frame;
use crate::propagation::Propagator;
use crate::protocols::{FrameHandler, FrameSender};

pub struct ProtocolHandler<N: FrameSender> {
    name: String,
    propagator: Propagator<N>,
}

impl<N: FrameSender> ProtocolHandler<N> {
    pub fn new(name: &str, propagator: Propagator<N>) -> Self {
        Self {
            name: name.to_string(),
            propagator,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn propagator(&self) -> &Propagator<N> {
        &self.propagator
    }

    pub async fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Join { name, address } => self.handle_join(&name, &address).await,
            Frame::Peers(peers) => self.handle_peers(&peers).await,
            Frame::Chat(message) => {
                self.propagator.accept(message).await;
            }
        }
    }

    async fn handle_join(&self, name: &str, address: &str) {
        if name == self.name {
            trace!(peer = %address, "ignoring our own JOIN");
            return;
        }

        let membership = self.propagator.membership();
        if !membership.bind(name, address).await {
            trace!(peer_name = %name, "ignoring JOIN for a name we already know");
            return;
        }
        membership.add_peer(address).await;

        info!(peer_name = %name, peer = %address, "peer joined");
        self.propagator.events().on_peer_joined(name);

        // Reply to the address in the frame, not to the socket it came from.
        let peers = membership.all_peers().await;
        self.propagator.send_to(address, &Frame::Peers(peers)).await;

        self.propagator.broadcast(&Frame::join(name, address)).await;
    }

    async fn handle_peers(&self, peers: &[String]) {
        let own = self.propagator.local_address();
        for peer in peers {
            if peer == own {
                continue;
            }
            if self.propagator.membership().add_peer(peer).await {
                debug!(peer = %peer, "learned peer from PEERS");
                self.handshake(peer).await;
            }
        }
    }

    /// Announce ourselves to `address` unless it is us or already known.
    /// On a successful send the address joins the membership.
    ///
    /// Returns true if a JOIN was sent.
    pub async fn connect_to_peer(&self, address: &str) -> bool {
        let membership = self.propagator.membership();
        if address == self.propagator.local_address() || membership.has(address).await {
            return false;
        }

        if !self.handshake(address).await {
            return false;
        }
        membership.add_peer(address).await;
        true
    }

    async fn handshake(&self, address: &str) -> bool {
        let join = Frame::join(&self.name, self.propagator.local_address());
        if !self.propagator.send_to(address, &join).await {
            return false;
        }
        info!(peer = %address, "connected to peer");
        self.propagator.events().on_peer_connected(address);
        true
    }
}

#[async_trait]
impl<N: FrameSender> FrameHandler for ProtocolHandler<N> {
    async fn handle_line(&self, remote: SocketAddr, line: &str) {
        match Frame::parse(line) {
            Ok(frame) => {
                trace!(remote = %remote, kind = frame.kind(), "frame received");
                self.handle_frame(frame).await;
            }
            Err(e) => debug!(remote = %remote, error = %e, "dropping malformed frame"),
        }
    }

    fn on_transport_error(&self, remote: &str, detail: &str) {
        self.propagator.events().on_transport_error(remote, detail);
    }
}
