use bytes::Bytes;
use tokio::sync::oneshot;

use peerlink_core::error::{PeerlinkError, Result};
use peerlink_core::{PeerId, Verdict};

use super::arena::Arena;

/// A gossip message parked until the daemon answers `validation_result`.
pub struct PendingValidation {
    pub subscription_id: u64,
    pub sender: PeerId,
    pub data: Bytes,
    verdict: oneshot::Sender<Verdict>,
}

/// `validation_id -> PendingValidation`.
///
/// Dropping a record without resolving it closes the one-shot, which the
/// waiting validator hook reads as `Ignore`.
pub struct ValidationRegistry {
    arena: Arena<PendingValidation>,
}

impl Default for ValidationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationRegistry {
    pub fn new() -> Self {
        Self { arena: Arena::new("validation") }
    }

    pub fn open(
        &self,
        subscription_id: u64,
        sender: PeerId,
        data: Bytes,
    ) -> Result<(u64, oneshot::Receiver<Verdict>)> {
        let (tx, rx) = oneshot::channel();
        let id = self.arena.alloc(PendingValidation { subscription_id, sender, data, verdict: tx })?;
        Ok((id, rx))
    }

    /// Deliver the daemon's verdict and drop the record.
    pub fn resolve(&self, id: u64, verdict: Verdict) -> Result<()> {
        let pending = self
            .arena
            .remove(id)
            .ok_or_else(|| PeerlinkError::NotFound(format!("validation {id}")))?;
        if pending.verdict.send(verdict).is_err() {
            tracing::debug!(validation_id = id, "validator hook no longer waiting");
        }
        Ok(())
    }

    pub fn cancel(&self, id: u64) -> bool {
        self.arena.remove(id).is_some()
    }

    /// Cancel every pending record belonging to one subscription.
    pub fn cancel_subscription(&self, subscription_id: u64) -> usize {
        self.arena
            .ids_where(|p| p.subscription_id == subscription_id)
            .into_iter()
            .filter(|id| self.cancel(*id))
            .count()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn drain(&self) -> usize {
        self.arena.drain().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> PeerId {
        PeerId::from_public_key(&[9; 32])
    }

    #[tokio::test]
    async fn resolve_wakes_the_waiter_once() {
        let r = ValidationRegistry::new();
        let (id, rx) = r.open(1, sender(), Bytes::from_static(b"m")).unwrap();
        r.resolve(id, Verdict::Reject).unwrap();
        assert_eq!(rx.await.unwrap(), Verdict::Reject);
        assert_eq!(r.resolve(id, Verdict::Accept).unwrap_err().code().as_str(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn drain_releases_waiters() {
        let r = ValidationRegistry::new();
        let (_, rx) = r.open(1, sender(), Bytes::new()).unwrap();
        assert_eq!(r.drain(), 1);
        assert!(rx.await.is_err());
    }

    #[test]
    fn cancel_subscription_only_touches_its_records() {
        let r = ValidationRegistry::new();
        let _a = r.open(1, sender(), Bytes::new()).unwrap();
        let _b = r.open(2, sender(), Bytes::new()).unwrap();
        let _c = r.open(1, sender(), Bytes::new()).unwrap();
        assert_eq!(r.cancel_subscription(1), 2);
        assert_eq!(r.len(), 1);
    }
}
