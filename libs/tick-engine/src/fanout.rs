use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;

use tick_api::Payload;

use crate::{lock, read, write};

/// Numeric id assigned to each data-channel connection.
pub type ConnectionId = u64;

// ═══════════════════════════════════════════════════════════════
//  Member
// ═══════════════════════════════════════════════════════════════

pub struct Member {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Payload>,
    identity: Mutex<Option<String>>,
}

impl Member {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> Option<String> {
        lock(&self.identity).clone()
    }
}

/// Immutable view of the subscriber set at one instant.
pub type Snapshot = Arc<[Arc<Member>]>;

// ═══════════════════════════════════════════════════════════════
//  Fanout
// ═══════════════════════════════════════════════════════════════

/// Copy-on-write subscriber set.
///
/// Connect and disconnect build a new slice and swap it in; delivery only
/// clones the current `Arc`, so a burst iterates one consistent snapshot and
/// never holds the lock while pushing. Queues are unbounded: a slow subscriber
/// accumulates backlog but never blocks the others.
pub struct Fanout {
    members: RwLock<Snapshot>,
    next_id: AtomicU64,
    sent_window: AtomicU64,
    sent_total: AtomicU64,
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(Arc::from(Vec::new())),
            next_id: AtomicU64::new(1),
            sent_window: AtomicU64::new(0),
            sent_total: AtomicU64::new(0),
        }
    }

    /// Register a new connection and hand back its receiving end.
    pub fn add(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Payload>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let member = Arc::new(Member {
            id,
            tx,
            identity: Mutex::new(None),
        });

        let mut guard = write(&self.members);
        let mut next: Vec<Arc<Member>> = guard.iter().cloned().collect();
        next.push(member);
        *guard = Arc::from(next);
        (id, rx)
    }

    /// Returns the removed member, `None` if the id was unknown.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Member>> {
        let mut guard = write(&self.members);
        let position = guard.iter().position(|m| m.id == id)?;
        let mut next: Vec<Arc<Member>> = guard.iter().cloned().collect();
        let removed = next.remove(position);
        *guard = Arc::from(next);
        Some(removed)
    }

    /// Drop every member, closing all receivers. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut guard = write(&self.members);
        let removed = guard.len();
        *guard = Arc::from(Vec::new());
        removed
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&read(&self.members))
    }

    pub fn len(&self) -> usize {
        read(&self.members).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deliver(&self, payload: Payload) {
        let members = self.snapshot();
        self.deliver_to(&members, payload);
    }

    /// Push one message to every still-open member of `members` and count it
    /// once toward the egress window.
    pub fn deliver_to(&self, members: &[Arc<Member>], payload: Payload) {
        for member in members {
            if member.tx.is_closed() {
                continue;
            }
            let _ = member.tx.send(payload.clone());
        }
        self.sent_window.fetch_add(1, Ordering::Relaxed);
        self.sent_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages delivered since the previous call.
    pub fn take_sent(&self) -> u64 {
        self.sent_window.swap(0, Ordering::Relaxed)
    }

    pub fn total_sent(&self) -> u64 {
        self.sent_total.load(Ordering::Relaxed)
    }

    /// Bind a logical identity to a connection; the last call wins.
    pub fn set_identity(&self, id: ConnectionId, identity: &str) -> bool {
        match read(&self.members).iter().find(|m| m.id == id) {
            Some(member) => {
                *lock(&member.identity) = Some(identity.to_string());
                true
            }
            None => false,
        }
    }

    pub fn identity(&self, id: ConnectionId) -> Option<String> {
        read(&self.members)
            .iter()
            .find(|m| m.id == id)
            .and_then(|m| m.identity())
    }
}
