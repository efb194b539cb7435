//! # TCP Transport
//!
//! Outbound and inbound halves of the line-based TCP transport.
//!
//! ## Outbound
//!
//! [`TcpTransport`] opens a fresh connection for every frame: connect, write
//! one `\n`-terminated line, flush, shut down, close. There is no pooling;
//! each send is independent, so a dead peer only costs its own connect
//! attempt.
//!
//! ## Inbound
//!
//! [`Listener`] binds an OS-assigned port. Once spawned, an acceptor task
//! hands every accepted connection to its own worker task, which reads lines
//! until the peer closes and passes each one to a [`FrameHandler`].
//!
//! ```text
//! accept loop ──► worker (conn 1) ──► FrameHandler::handle_line
//!             ──► worker (conn 2) ──► FrameHandler::handle_line
//!             ──► ...
//! ```
//!
//! Both halves stop when the shutdown watch flips; stopping is not reported
//! as an error.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, trace, warn};

use crate::messages::{Frame, MAX_FRAME_LEN};
use crate::protocols::{FrameHandler, FrameSender};

/// Pause after a failed `accept` before trying again.
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Sends each frame over its own short-lived TCP connection.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    connect_timeout: Option<Duration>,
    max_frame_len: usize,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(None, MAX_FRAME_LEN)
    }
}

impl TcpTransport {
    /// `connect_timeout` of `None` leaves the OS default in place. Frames
    /// longer than `max_frame_len` bytes are refused before connecting,
    /// since the receiving listener would drop them.
    pub fn new(connect_timeout: Option<Duration>, max_frame_len: usize) -> Self {
        Self {
            connect_timeout,
            max_frame_len,
        }
    }

    async fn connect(&self, to: &str) -> Result<TcpStream> {
        let connect = TcpStream::connect(to);
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| anyhow::anyhow!("connect timed out after {:?}", limit))?,
            None => connect.await,
        };
        stream.context("connect failed")
    }
}

#[async_trait]
impl FrameSender for TcpTransport {
    async fn send_frame(&self, to: &str, frame: &Frame) -> Result<()> {
        let wire = frame.to_wire();
        if wire.len() > self.max_frame_len {
            bail!(
                "frame of {} bytes exceeds the {} byte limit",
                wire.len(),
                self.max_frame_len
            );
        }

        let stream = self.connect(to).await?;

        let mut framed = FramedWrite::new(stream, LinesCodec::new());
        framed
            .send(wire)
            .await
            .context("failed to write frame")?;

        let mut stream = framed.into_inner();
        stream.shutdown().await.context("failed to close connection")?;

        trace!(peer = %to, kind = frame.kind(), "frame sent");
        Ok(())
    }
}

/// Tunables for the inbound side.
#[derive(Clone, Copy, Debug)]
pub struct ListenerConfig {
    /// Lines longer than this abort the connection.
    pub max_frame_len: usize,
    /// Pause after a failed `accept`.
    pub accept_backoff: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
        }
    }
}

/// A bound, not yet accepting, listening socket.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind `host` on an ephemeral port chosen by the OS.
    pub async fn bind(host: &str) -> io::Result<Self> {
        let inner = TcpListener::bind((host, 0)).await?;
        let local_addr = inner.local_addr()?;
        debug!(addr = %local_addr, "listener bound");
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the acceptor loop. The socket is closed when the returned task
    /// finishes, which happens once `shutdown` flips to true or its sender
    /// is dropped.
    pub fn spawn<H: FrameHandler>(
        self,
        handler: Arc<H>,
        config: ListenerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(accept_loop(self, handler, config, shutdown))
    }
}

async fn accept_loop<H: FrameHandler>(
    listener: Listener,
    handler: Arc<H>,
    config: ListenerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let local = listener.local_addr.to_string();

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                // Sender gone means the node was dropped.
                if changed.is_err() {
                    break;
                }
            }
            accepted = listener.inner.accept() => match accepted {
                Ok((stream, remote)) => {
                    trace!(remote = %remote, "accepted connection");
                    let handler = handler.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(serve_connection(
                        stream,
                        remote,
                        handler,
                        config.max_frame_len,
                        shutdown,
                    ));
                }
                Err(e) => {
                    warn!(addr = %local, error = %e, "accept failed");
                    handler.on_transport_error(&local, &e.to_string());
                    tokio::time::sleep(config.accept_backoff).await;
                }
            }
        }
    }

    debug!(addr = %local, "listener stopped");
}

async fn serve_connection<H: FrameHandler>(
    stream: TcpStream,
    remote: SocketAddr,
    handler: Arc<H>,
    max_frame_len: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(max_frame_len));

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            next = lines.next() => match next {
                Some(Ok(line)) => handler.handle_line(remote, &line).await,
                Some(Err(LinesCodecError::Io(e))) if is_disconnect(&e) => {
                    trace!(remote = %remote, "peer disconnected");
                    break;
                }
                Some(Err(e)) => {
                    debug!(remote = %remote, error = %e, "inbound connection failed");
                    handler.on_transport_error(&remote.to_string(), &e.to_string());
                    break;
                }
                None => break,
            }
        }
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
