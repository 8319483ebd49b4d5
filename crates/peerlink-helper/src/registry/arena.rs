use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use peerlink_core::error::{PeerlinkError, Result};

/// Id-keyed handle store: a monotonic counter plus `id -> T`.
///
/// Ids start at 1 and are never handed out twice, so an id seen by the daemon
/// refers to at most one object over the process lifetime.
pub struct Arena<T> {
    kind: &'static str,
    next: AtomicU64,
    items: DashMap<u64, T>,
}

impl<T> Arena<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            next: AtomicU64::new(1),
            items: DashMap::new(),
        }
    }

    /// Reserve the next id without storing anything under it.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Store `item` under a reserved id. A live duplicate is rejected, never overwritten.
    pub fn insert(&self, id: u64, item: T) -> Result<()> {
        match self.items.entry(id) {
            Entry::Occupied(_) => {
                tracing::error!(kind = self.kind, id, "registry id collision");
                Err(PeerlinkError::Internal(format!("duplicate {} id {id}", self.kind)))
            }
            Entry::Vacant(v) => {
                v.insert(item);
                Ok(())
            }
        }
    }

    pub fn alloc(&self, item: T) -> Result<u64> {
        let id = self.next_id();
        self.insert(id, item)?;
        Ok(id)
    }

    pub fn remove(&self, id: u64) -> Option<T> {
        self.items.remove(&id).map(|(_, v)| v)
    }

    /// Run `f` against a live entry. The shard lock is held only for the call.
    pub fn with<R>(&self, id: u64, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.items.get(&id).map(|r| f(r.value()))
    }

    pub fn with_mut<R>(&self, id: u64, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.items.get_mut(&id).map(|mut r| f(r.value_mut()))
    }

    /// Ids of entries matching `pred`.
    pub fn ids_where(&self, pred: impl Fn(&T) -> bool) -> Vec<u64> {
        self.items.iter().filter(|r| pred(r.value())).map(|r| *r.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Remove every entry, lowest id first.
    pub fn drain(&self) -> Vec<(u64, T)> {
        let mut ids: Vec<u64> = self.items.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.items.remove(&id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_not_reused() {
        let a: Arena<&str> = Arena::new("thing");
        let x = a.alloc("x").unwrap();
        let y = a.alloc("y").unwrap();
        assert_eq!((x, y), (1, 2));
        assert_eq!(a.remove(x), Some("x"));
        assert_eq!(a.alloc("z").unwrap(), 3);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let a: Arena<u8> = Arena::new("thing");
        let id = a.next_id();
        a.insert(id, 1).unwrap();
        let e = a.insert(id, 2).unwrap_err();
        assert_eq!(e.code().as_str(), "INTERNAL");
        assert_eq!(a.with(id, |v| *v), Some(1));
    }

    #[test]
    fn drain_empties_in_id_order() {
        let a: Arena<u8> = Arena::new("thing");
        for v in [10, 20, 30] {
            a.alloc(v).unwrap();
        }
        let all: Vec<u8> = a.drain().into_iter().map(|(_, v)| v).collect();
        assert_eq!(all, vec![10, 20, 30]);
        assert!(a.is_empty());
    }
}
