//! # Node Controller
//!
//! A [`Node`] owns this process's identity and wires the pieces together:
//! listener, protocol handler, flood engine and shared state. A frontend
//! needs only two calls:
//!
//! ```ignore
//! let (sink, mut events) = ChannelSink::new();
//! let node = Node::new(NodeConfig::default(), Arc::new(sink));
//!
//! // Start listening and join the mesh through a known peer
//! // (or pass NO_BOOTSTRAP to start a new mesh).
//! node.connect("alice", "192.168.1.20:41234").await?;
//!
//! // Publish to everyone
//! node.send_chat("hello").await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! ```
//!
//! Until `connect` succeeds the node has no identity and `send_chat` does
//! nothing. `connect` may only succeed once per node.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::dedup::SeenSet;
use crate::events::EventSink;
use crate::handler::ProtocolHandler;
use crate::membership::Membership;
use crate::messages::{is_valid_address, ChatMessage, MAX_FRAME_LEN};
use crate::propagation::Propagator;
use crate::transport::{ListenerConfig, Listener, TcpTransport, DEFAULT_ACCEPT_BACKOFF};

/// Bootstrap address meaning "start a new mesh, contact nobody".
pub const NO_BOOTSTRAP: &str = "localhost:0";

/// Interface the listener binds to unless configured otherwise.
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";

/// Host advertised when the listener is bound to an unspecified address.
const FALLBACK_ADVERTISE_HOST: &str = "127.0.0.1";

/// Node configuration.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Interface to bind the listener on. The port is always chosen by the OS.
    pub listen_host: String,
    /// Host other nodes should use to reach us. Defaults to the bound IP.
    pub advertise_host: Option<String>,
    /// Limit on outbound connects. `None` keeps the OS default.
    pub connect_timeout: Option<Duration>,
    /// Maximum inbound frame length in bytes.
    pub max_frame_len: usize,
    /// Pause after a failed accept.
    pub accept_backoff: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_host: DEFAULT_LISTEN_HOST.to_string(),
            advertise_host: None,
            connect_timeout: None,
            max_frame_len: MAX_FRAME_LEN,
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
        }
    }
}

/// Why [`Node::connect`] refused to start.
#[derive(Debug)]
pub enum ConnectError {
    /// The name is empty or only whitespace.
    EmptyName,
    /// The name contains `:` or a line break, which would corrupt JOIN frames.
    InvalidName(String),
    /// The bootstrap address is not `host:port`.
    InvalidAddress(String),
    /// `connect` already succeeded on this node.
    AlreadyConnected,
    /// The listening socket could not be bound.
    Bind(io::Error),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "please enter a unique name"),
            Self::InvalidName(name) => {
                write!(f, "name {:?} must not contain ':' or line breaks", name)
            }
            Self::InvalidAddress(addr) => {
                write!(f, "{:?} is not a valid host:port (e.g. localhost:5000)", addr)
            }
            Self::AlreadyConnected => write!(f, "node is already connected"),
            Self::Bind(e) => write!(f, "failed to start listener: {}", e),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind(e) => Some(e),
            _ => None,
        }
    }
}

impl ConnectError {
    /// True for input problems, false for runtime failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyName | Self::InvalidName(_) | Self::InvalidAddress(_)
        )
    }
}

/// Why [`Node::send_chat`] refused a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The encoded frame is `len` bytes, over the `max` frame length.
    TooLong { len: usize, max: usize },
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong { len, max } => {
                write!(f, "message is {} bytes, the limit is {} bytes", len, max)
            }
        }
    }
}

impl std::error::Error for SendError {}

/// Who this node is on the mesh. Fixed once `connect` succeeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    pub name: String,
    pub address: String,
}

struct Session {
    identity: NodeIdentity,
    local_addr: SocketAddr,
    handler: Arc<ProtocolHandler<TcpTransport>>,
    shutdown: watch::Sender<bool>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

pub struct Node {
    config: NodeConfig,
    events: Arc<dyn EventSink>,
    session: OnceCell<Session>,
    connect_lock: Mutex<()>,
}

impl Node {
    /// Create an unconnected node. No sockets are opened until
    /// [`Node::connect`].
    pub fn new(config: NodeConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            events,
            session: OnceCell::new(),
            connect_lock: Mutex::new(()),
        }
    }

    /// Bind the listener, register ourselves and, unless `bootstrap` is
    /// [`NO_BOOTSTRAP`], send a JOIN to the bootstrap peer.
    ///
    /// Validation failures have no side effects. A bootstrap peer that
    /// cannot be reached is reported to the event sink but does not fail
    /// the call: the node is up and others can still join through it.
    pub async fn connect(&self, name: &str, bootstrap: &str) -> Result<(), ConnectError> {
        let name = name.trim();
        let bootstrap = bootstrap.trim();

        if name.is_empty() {
            return Err(ConnectError::EmptyName);
        }
        if name.contains([':', '\r', '\n']) {
            return Err(ConnectError::InvalidName(name.to_string()));
        }
        if !is_valid_address(bootstrap) {
            return Err(ConnectError::InvalidAddress(bootstrap.to_string()));
        }

        let guard = self.connect_lock.lock().await;
        if self.session.initialized() {
            return Err(ConnectError::AlreadyConnected);
        }

        let session = self.start(name).await?;
        let handler = session.handler.clone();
        if self.session.set(session).is_err() {
            return Err(ConnectError::AlreadyConnected);
        }
        drop(guard);

        if bootstrap != NO_BOOTSTRAP {
            handler.connect_to_peer(bootstrap).await;
        }
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<Session, ConnectError> {
        let listener = match Listener::bind(&self.config.listen_host).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(host = %self.config.listen_host, error = %e, "failed to bind listener");
                return Err(ConnectError::Bind(e));
            }
        };
        let local_addr = listener.local_addr();
        let address = advertised_address(&self.config, local_addr);

        let membership = Membership::new();
        membership.add_peer(&address).await;
        membership.bind(name, &address).await;

        let network = Arc::new(TcpTransport::new(
            self.config.connect_timeout,
            self.config.max_frame_len,
        ));
        let propagator = Propagator::new(
            address.clone(),
            membership,
            SeenSet::new(),
            network,
            self.events.clone(),
        );
        let handler = Arc::new(ProtocolHandler::new(name, propagator));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let listener_config = ListenerConfig {
            max_frame_len: self.config.max_frame_len,
            accept_backoff: self.config.accept_backoff,
        };
        let acceptor = listener.spawn(handler.clone(), listener_config, shutdown_rx);

        info!(%name, %address, bound = %local_addr, "node started");
        self.events.on_started(name, &address);

        Ok(Session {
            identity: NodeIdentity {
                name: name.to_string(),
                address,
            },
            local_addr,
            handler,
            shutdown,
            acceptor: Mutex::new(Some(acceptor)),
        })
    }

    /// Publish `text` to the mesh. Does nothing for empty text or before
    /// `connect` has succeeded.
    ///
    /// A message whose frame would exceed `max_frame_len` is refused before
    /// the local echo, since no peer would accept it.
    pub async fn send_chat(&self, text: &str) -> Result<(), SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let Some(session) = self.session.get() else {
            return Ok(());
        };

        let message = ChatMessage::new(&session.identity.name, text);
        let len = message.to_wire().len();
        if len > self.config.max_frame_len {
            warn!(len, max = self.config.max_frame_len, "refusing oversized message");
            return Err(SendError::TooLong {
                len,
                max: self.config.max_frame_len,
            });
        }

        session.handler.propagator().publish(message).await;
        Ok(())
    }

    /// Send our JOIN to `address` if it is not us and not already known.
    /// Returns true if the JOIN was sent.
    pub async fn connect_to_peer(&self, address: &str) -> bool {
        match self.session.get() {
            Some(session) => session.handler.connect_to_peer(address).await,
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.initialized()
    }

    pub fn identity(&self) -> Option<&NodeIdentity> {
        self.session.get().map(|session| &session.identity)
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session.get().map(|session| session.local_addr)
    }

    /// Every known peer address, including our own.
    pub async fn peers(&self) -> Vec<String> {
        match self.session.get() {
            Some(session) => session.handler.propagator().membership().all_peers().await,
            None => Vec::new(),
        }
    }

    /// Known `(name, address)` bindings, including our own.
    pub async fn names(&self) -> Vec<(String, String)> {
        match self.session.get() {
            Some(session) => session.handler.propagator().membership().names().await,
            None => Vec::new(),
        }
    }

    /// Close the listener and stop every inbound worker. Outbound sends
    /// already in flight are left to finish on their own.
    pub async fn shutdown(&self) {
        let Some(session) = self.session.get() else {
            return;
        };
        let _ = session.shutdown.send(true);

        let acceptor = session.acceptor.lock().await.take();
        if let Some(acceptor) = acceptor {
            let _ = acceptor.await;
            info!(address = %session.identity.address, "node stopped");
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(session) = self.session.get() {
            let _ = session.shutdown.send(true);
        }
    }
}

fn advertised_address(config: &NodeConfig, local_addr: SocketAddr) -> String {
    let host = match &config.advertise_host {
        Some(host) => host.clone(),
        None if local_addr.ip().is_unspecified() => FALLBACK_ADVERTISE_HOST.to_string(),
        None => local_addr.ip().to_string(),
    };
    format!("{}:{}", host, local_addr.port())
}
