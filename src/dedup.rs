//! # Message Deduplication
//!
//! The seen set is the only thing standing between a flood broadcast and an
//! infinite forwarding loop: every node forwards a chat message exactly once,
//! the first time its id is marked here.
//!
//! The set grows for the lifetime of the process and is never pruned.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

/// Thread-safe set of message ids this node has already accepted or
/// originated. Cheap to clone; clones share the same set.
#[derive(Clone, Default)]
pub struct SeenSet {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` and return true if it was not present before.
    ///
    /// Check and insert happen under one lock acquisition, so across any
    /// number of concurrent callers exactly one sees `true` for a given id.
    pub async fn try_mark_seen(&self, id: &str) -> bool {
        let mut ids = self.ids.lock().await;
        if ids.contains(id) {
            return false;
        }
        ids.insert(id.to_string())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.ids.lock().await.contains(id)
    }

    pub async fn len(&self) -> usize {
        self.ids.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.lock().await.is_empty()
    }
}
