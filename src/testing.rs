//! In-memory networks for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::dedup::SeenSet;
use crate::events::{ChannelSink, NodeEvent};
use crate::handler::ProtocolHandler;
use crate::membership::Membership;
use crate::messages::Frame;
use crate::propagation::Propagator;
use crate::protocols::FrameSender;

pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<NodeEvent>) -> Vec<NodeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Records every send; delivers nothing. Addresses marked with
/// [`RecordingNetwork::fail`] return an error.
#[derive(Default)]
pub(crate) struct RecordingNetwork {
    sent: Mutex<Vec<(String, String)>>,
    failures: Mutex<HashSet<String>>,
}

impl RecordingNetwork {
    pub fn fail(&self, address: &str) {
        self.failures.lock().unwrap().insert(address.to_string());
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameSender for RecordingNetwork {
    async fn send_frame(&self, to: &str, frame: &Frame) -> anyhow::Result<()> {
        if self.failures.lock().unwrap().contains(to) {
            return Err(anyhow!("injected network failure"));
        }
        self.sent.lock().unwrap().push((to.to_string(), frame.to_wire()));
        Ok(())
    }
}

/// Registry of in-memory nodes reachable by address.
#[derive(Default)]
pub(crate) struct MeshRegistry {
    nodes: RwLock<HashMap<String, Arc<ProtocolHandler<MeshNetwork>>>>,
    /// Every send as `(from, to, wire)`.
    log: Mutex<Vec<(String, String, String)>>,
    down: Mutex<HashSet<String>>,
}

impl MeshRegistry {
    pub fn log(&self) -> Vec<(String, String, String)> {
        self.log.lock().unwrap().clone()
    }

    pub fn take_down(&self, address: &str) {
        self.down.lock().unwrap().insert(address.to_string());
    }

    fn get(&self, address: &str) -> Option<Arc<ProtocolHandler<MeshNetwork>>> {
        self.nodes.read().unwrap().get(address).cloned()
    }
}

/// Sender for one node of a [`MeshRegistry`]; frames are handed straight
/// to the target's handler.
pub(crate) struct MeshNetwork {
    registry: Arc<MeshRegistry>,
    local: String,
}

#[async_trait]
impl FrameSender for MeshNetwork {
    async fn send_frame(&self, to: &str, frame: &Frame) -> anyhow::Result<()> {
        if self.registry.down.lock().unwrap().contains(to) {
            return Err(anyhow!("connection refused"));
        }
        let Some(target) = self.registry.get(to) else {
            return Err(anyhow!("peer not reachable"));
        };
        self.registry
            .log
            .lock()
            .unwrap()
            .push((self.local.clone(), to.to_string(), frame.to_wire()));
        target.handle_frame(frame.clone()).await;
        Ok(())
    }
}

pub(crate) struct TestNode {
    pub handler: Arc<ProtocolHandler<MeshNetwork>>,
    pub events: mpsc::UnboundedReceiver<NodeEvent>,
}

impl TestNode {
    /// Create a node registered with `registry`, knowing only itself.
    pub async fn spawn(registry: &Arc<MeshRegistry>, name: &str, address: &str) -> Self {
        let membership = Membership::new();
        membership.add_peer(address).await;
        membership.bind(name, address).await;

        let (sink, events) = ChannelSink::new();
        let network = Arc::new(MeshNetwork {
            registry: registry.clone(),
            local: address.to_string(),
        });
        let propagator = Propagator::new(
            address.to_string(),
            membership,
            SeenSet::new(),
            network,
            Arc::new(sink),
        );
        let handler = Arc::new(ProtocolHandler::new(name, propagator));
        registry
            .nodes
            .write()
            .unwrap()
            .insert(address.to_string(), handler.clone());

        Self { handler, events }
    }

    pub fn drain(&mut self) -> Vec<NodeEvent> {
        drain(&mut self.events)
    }

    pub fn messages(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                NodeEvent::MessageReceived(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub async fn peers(&self) -> Vec<String> {
        self.handler.propagator().membership().all_peers().await
    }
}
