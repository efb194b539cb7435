//! Trait seams between the mesh logic and the network.
//!
//! | Trait | Direction | Implemented by |
//! |-------|-----------|----------------|
//! | [`FrameSender`] | outbound, one frame per connection | `TcpTransport` |
//! | [`FrameHandler`] | inbound, one call per received line | `ProtocolHandler` |
//!
//! Keeping these separate lets the propagation and protocol logic run over
//! an in-memory network in tests, and keeps the transport unaware of frame
//! semantics.

use std::net::SocketAddr;

use anyhow::Result;
use async_trait::async_trait;

use crate::messages::Frame;

/// Delivers a single frame to a peer address.
#[async_trait]
pub trait FrameSender: Send + Sync + 'static {
    /// Open a connection to `to`, write `frame`, and close.
    ///
    /// Returns once the frame has been handed to the network; there is no
    /// acknowledgement from the remote side.
    async fn send_frame(&self, to: &str, frame: &Frame) -> Result<()>;
}

/// Consumes lines read from inbound connections.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    /// Handle one line received from `remote`. Lines that do not parse are
    /// the handler's business to drop.
    async fn handle_line(&self, remote: SocketAddr, line: &str);

    /// Reading from `remote` failed for a reason other than a clean close,
    /// or the listener itself hit an error.
    fn on_transport_error(&self, remote: &str, detail: &str);
}
