//! # Membership Registry
//!
//! Tracks every peer address this node has heard of, plus the partial
//! `name → address` directory built from JOIN announcements.
//!
//! Membership only grows: there is no removal, and a peer that went away is
//! still a broadcast target. Names are first-come: once a name is bound to an
//! address, later JOINs for the same name are ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Mutex;

#[derive(Default)]
struct MembershipState {
    peers: BTreeSet<String>,
    names: BTreeMap<String, String>,
}

/// Shared view of the mesh. Cheap to clone; clones share the same state.
///
/// Every method takes the inner lock once, so add/check sequences are atomic
/// with respect to concurrent workers and to [`Membership::all_peers`]
/// snapshots taken for a broadcast.
#[derive(Clone, Default)]
pub struct Membership {
    state: Arc<Mutex<MembershipState>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer address. Returns true if it was not known before.
    pub async fn add_peer(&self, address: &str) -> bool {
        self.state.lock().await.peers.insert(address.to_string())
    }

    pub async fn has(&self, address: &str) -> bool {
        self.state.lock().await.peers.contains(address)
    }

    /// Point-in-time copy of all known addresses, including our own.
    pub async fn all_peers(&self) -> Vec<String> {
        self.state.lock().await.peers.iter().cloned().collect()
    }

    pub async fn peer_count(&self) -> usize {
        self.state.lock().await.peers.len()
    }

    /// Bind `name` to `address` unless the name is already bound.
    ///
    /// Returns true only when a new binding was recorded. A name that is
    /// already bound, to this or any other address, is left untouched.
    pub async fn bind(&self, name: &str, address: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.names.contains_key(name) {
            return false;
        }
        state.names.insert(name.to_string(), address.to_string());
        true
    }

    pub async fn address_of(&self, name: &str) -> Option<String> {
        self.state.lock().await.names.get(name).cloned()
    }

    /// Snapshot of the name directory as `(name, address)` pairs.
    pub async fn names(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .await
            .names
            .iter()
            .map(|(name, addr)| (name.clone(), addr.clone()))
            .collect()
    }
}
