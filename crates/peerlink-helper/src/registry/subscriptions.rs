use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use peerlink_core::error::{PeerlinkError, Result};

use super::arena::Arena;

/// A live topic subscription. The forwarder turns accepted messages into upcalls.
pub struct Subscription {
    pub topic: String,
    pub forwarder: JoinHandle<()>,
}

/// `subscription_id -> Subscription`, plus a `topic -> id` index.
///
/// A topic holds at most one subscription. `reserve` claims the topic before
/// the host join so two concurrent subscribes cannot both join.
pub struct SubscriptionRegistry {
    arena: Arena<Subscription>,
    by_topic: DashMap<String, u64>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            arena: Arena::new("subscription"),
            by_topic: DashMap::new(),
        }
    }

    /// Claim `topic` and allocate its id.
    pub fn reserve(&self, topic: &str) -> Result<u64> {
        match self.by_topic.entry(topic.to_string()) {
            Entry::Occupied(e) => Err(PeerlinkError::AlreadyExists(format!(
                "topic {topic} already subscribed as {}",
                e.get()
            ))),
            Entry::Vacant(v) => {
                let id = self.arena.next_id();
                v.insert(id);
                Ok(id)
            }
        }
    }

    /// Undo a `reserve` whose join failed.
    pub fn release(&self, topic: &str, id: u64) {
        self.by_topic.remove_if(topic, |_, v| *v == id);
    }

    /// Make a reserved subscription live.
    pub fn commit(&self, id: u64, sub: Subscription) -> Result<()> {
        let topic = sub.topic.clone();
        self.arena.insert(id, sub).inspect_err(|_| self.release(&topic, id))
    }

    pub fn remove(&self, id: u64) -> Option<Subscription> {
        let sub = self.arena.remove(id)?;
        self.release(&sub.topic, id);
        Some(sub)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn drain(&self) -> Vec<(u64, Subscription)> {
        let all = self.arena.drain();
        self.by_topic.clear();
        all
    }
}
