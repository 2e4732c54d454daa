//! Per-identity state owned by a single limiter.
//!
//! Entries live in a sharded map. The shard lock is held for the whole
//! read-modify-write of one identity, so two concurrent checks for the same
//! identity are serialized while checks for unrelated identities proceed in
//! parallel.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Slot<S> {
    state: S,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct KeyedState<S> {
    entries: DashMap<String, Slot<S>>,
}

impl<S> KeyedState<S> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Run `f` against the state for `key`, creating it with `init` first if
    /// the identity has not been seen before.
    ///
    /// `f` must not block or await: it runs under the shard lock.
    pub fn with_entry<R>(
        &self,
        key: &str,
        now: Instant,
        init: impl FnOnce() -> S,
        f: impl FnOnce(&mut S) -> R,
    ) -> R {
        if let Some(mut slot) = self.entries.get_mut(key) {
            slot.last_seen = now;
            return f(&mut slot.state);
        }

        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Slot {
            state: init(),
            last_seen: now,
        });
        slot.last_seen = now;
        f(&mut slot.state)
    }

    /// Read the state for `key` without creating it.
    pub fn inspect<R>(&self, key: &str, f: impl FnOnce(&S) -> R) -> Option<R> {
        self.entries.get(key).map(|slot| f(&slot.state))
    }

    /// Drop identities not seen for `max_idle` whose state the predicate
    /// reports as spent, i.e. no longer limiting the identity. State that
    /// still restricts a client is kept however long it sits idle. Returns
    /// the number of entries removed.
    pub fn evict(&self, now: Instant, max_idle: Duration, is_spent: impl Fn(&S) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| {
            now.saturating_duration_since(slot.last_seen) < max_idle || !is_spent(&slot.state)
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S> Default for KeyedState<S> {
    fn default() -> Self {
        Self::new()
    }
}
