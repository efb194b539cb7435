//! # Flood Propagation
//!
//! Chat messages and JOIN announcements spread by flooding: a node forwards
//! every new frame to every peer it knows, except itself. Loops are cut by
//! the [`SeenSet`]: a chat id is accepted, displayed and forwarded at most
//! once per node, so in a mesh of N nodes each node forwards a given message
//! exactly once and propagation stops after every node has seen it.
//!
//! ## Fan-out
//!
//! Each broadcast takes a snapshot of the membership and sends to every
//! target on its own task. A slow or dead peer delays nobody else, and every
//! failure is reported to the event sink tagged with the peer's address.
//! Dead peers are never evicted and are tried again on the next broadcast.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

use crate::dedup::SeenSet;
use crate::events::EventSink;
use crate::membership::Membership;
use crate::messages::{ChatMessage, Frame};
use crate::protocols::FrameSender;

/// Outcome of one broadcast, by peer address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

struct Shared<N: FrameSender> {
    local_address: String,
    membership: Membership,
    seen: SeenSet,
    network: Arc<N>,
    events: Arc<dyn EventSink>,
}

/// The flood-broadcast engine. Cheap to clone; clones share state.
pub struct Propagator<N: FrameSender> {
    shared: Arc<Shared<N>>,
}

impl<N: FrameSender> Clone for Propagator<N> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<N: FrameSender> Propagator<N> {
    pub fn new(
        local_address: String,
        membership: Membership,
        seen: SeenSet,
        network: Arc<N>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                local_address,
                membership,
                seen,
                network,
                events,
            }),
        }
    }

    pub fn local_address(&self) -> &str {
        &self.shared.local_address
    }

    pub fn membership(&self) -> &Membership {
        &self.shared.membership
    }

    pub fn seen(&self) -> &SeenSet {
        &self.shared.seen
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.shared.events
    }

    /// Handle a chat message received from the network.
    ///
    /// Returns false if the id was already seen, in which case nothing is
    /// displayed or forwarded. Otherwise the message is displayed and the
    /// original frame is forwarded unchanged.
    pub async fn accept(&self, message: ChatMessage) -> bool {
        if !self.shared.seen.try_mark_seen(message.id()).await {
            trace!(msg_id = %message.id(), "duplicate message dropped");
            return false;
        }

        debug!(msg_id = %message.id(), "accepted new message");
        self.shared.events.on_message_received(message.display_text());
        self.broadcast(&Frame::Chat(message)).await;
        true
    }

    /// Publish a new chat message from this node under a fresh id.
    pub async fn originate(&self, label: &str, text: &str) -> ChatMessage {
        let message = ChatMessage::new(label, text);
        self.publish(message.clone()).await;
        message
    }

    /// Publish an already built message that originates here.
    ///
    /// The id is marked seen before anything goes out, so an echo relayed
    /// back by the mesh is dropped instead of shown twice. The local echo is
    /// emitted before the network fan-out.
    pub async fn publish(&self, message: ChatMessage) -> BroadcastReport {
        self.shared.seen.try_mark_seen(message.id()).await;
        self.shared.events.on_message_received(message.display_text());

        let msg_id = message.id().to_string();
        let report = self.broadcast(&Frame::Chat(message)).await;
        debug!(
            %msg_id,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "published message"
        );
        report
    }

    /// Send `frame` to every known peer except this node.
    pub async fn broadcast(&self, frame: &Frame) -> BroadcastReport {
        let targets: Vec<String> = self
            .shared
            .membership
            .all_peers()
            .await
            .into_iter()
            .filter(|peer| peer != &self.shared.local_address)
            .collect();

        let mut report = BroadcastReport::default();
        if targets.is_empty() {
            return report;
        }

        let mut join_set = JoinSet::new();
        for peer in targets {
            let this = self.clone();
            let frame = frame.clone();
            join_set.spawn(async move {
                let ok = this.send_to(&peer, &frame).await;
                (peer, ok)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((peer, true)) => report.delivered.push(peer),
                Ok((peer, false)) => report.failed.push(peer),
                Err(e) => warn!(error = %e, "broadcast task failed"),
            }
        }

        trace!(
            kind = frame.kind(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "broadcast complete"
        );
        report
    }

    /// Send one frame to one peer, reporting failure to the event sink.
    pub async fn send_to(&self, peer: &str, frame: &Frame) -> bool {
        match self.shared.network.send_frame(peer, frame).await {
            Ok(()) => true,
            Err(e) => {
                let detail = format!("{:#}", e);
                warn!(peer = %peer, kind = frame.kind(), error = %detail, "send failed");
                self.shared.events.on_transport_error(peer, &detail);
                false
            }
        }
    }
}
