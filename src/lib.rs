//! # Floodmesh - Serverless Peer-to-Peer Chat
//!
//! Floodmesh lets a group of processes discover each other and exchange chat
//! messages with no central server:
//!
//! - **Discovery**: a newcomer sends `JOIN` to any one member and learns the
//!   rest from the `PEERS` reply and from the JOIN being flooded onward
//! - **Broadcast**: every chat message is flooded to all known peers and
//!   each node displays and forwards a given message id at most once
//! - **Transport**: one newline-terminated frame per short-lived TCP
//!   connection
//!
//! ## Architecture
//!
//! All shared state lives behind async mutexes and is never held across a
//! network call. The listener runs one acceptor task plus one task per
//! inbound connection; every broadcast fans out on its own tasks so a slow
//! or dead peer delays nobody else.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `node` | High-level API: connect, send, shut down |
//! | `handler` | Inbound JOIN / PEERS / chat processing |
//! | `propagation` | Flood broadcast with duplicate suppression |
//! | `membership` | Known peer addresses and name bindings |
//! | `dedup` | Set of message ids already seen |
//! | `transport` | TCP listener and one-shot frame sender |
//! | `protocols` | Trait seams between transport and protocol logic |
//! | `messages` | Wire frame types and parsing |
//! | `events` | Notifications delivered to the frontend |

mod dedup;
mod events;
mod handler;
mod membership;
mod messages;
mod node;
mod propagation;
mod protocols;
mod transport;

#[cfg(test)]
mod testing;

pub use dedup::SeenSet;
pub use events::{ChannelSink, EventSink, NodeEvent, TracingSink};
pub use handler::ProtocolHandler;
pub use membership::Membership;
pub use messages::{is_valid_address, ChatMessage, Frame, ParseError, MAX_FRAME_LEN};
pub use node::{
    ConnectError, Node, NodeConfig, NodeIdentity, SendError, DEFAULT_LISTEN_HOST, NO_BOOTSTRAP,
};
pub use propagation::{BroadcastReport, Propagator};
pub use protocols::{FrameHandler, FrameSender};
pub use transport::{Listener, ListenerConfig, TcpTransport};
